// SPDX-License-Identifier: Apache-2.0

//! Shared `wicket` item definitions.

mod block;

pub use block::*;

use crate::param::PARAM_COUNT;
use crate::status::ResultCode;

use core::mem::size_of;

/// Size of a block word.
pub const WORD: usize = size_of::<u64>();

/// Number of words describing one parameter slot.
pub const SLOT_WORDS: usize = 3;

/// Size of an item [`Header`].
pub const HEADER_SIZE: usize = 2 * WORD;

/// Size of a call [`Payload`], excluding its data section.
pub const PAYLOAD_SIZE: usize = (2 + PARAM_COUNT * SLOT_WORDS + 2) * WORD;

/// `wicket` item kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum Kind {
    End = 0x00,

    Call = 0x01,
}

impl TryFrom<u64> for Kind {
    type Error = ResultCode;

    #[inline]
    fn try_from(kind: u64) -> Result<Self, Self::Error> {
        match kind {
            kind if kind == Kind::End as _ => Ok(Kind::End),
            kind if kind == Kind::Call as _ => Ok(Kind::Call),
            _ => Err(ResultCode::BadParameters),
        }
    }
}

/// `wicket` item header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub size: u64,
    pub kind: Kind,
}

/// Words describing one parameter slot.
pub type Slot = [u64; SLOT_WORDS];

/// Call item payload, as found in a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    pub num: u64,
    pub types: u64,
    pub argv: [Slot; PARAM_COUNT],
    pub ret: [u64; 2],
}
