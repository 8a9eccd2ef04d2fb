// SPDX-License-Identifier: Apache-2.0

//! API for the host/trusted-peer call boundary
//!
//! `wicket` is a protocol crate for invoking commands of trusted applications running in a
//! trusted peer and, while such a command is executing, letting the trusted application call back
//! into the host application that issued it. A wicket is the small door set into a larger gate:
//! the host goes in through the gate, the trusted application comes back out through the wicket.
//!
//! # Mechanism of action
//!
//! A [`host::Session`] stages a call into an owned, mutually-distrusted [block](item::Block) and
//! enters the peer. The peer thread serving the session decodes the block, dispatches the command
//! to the trusted application and writes the results back into the same block. While it does so,
//! the trusted application may [call the host](peer::PeerContext::call_host): the call is marshaled
//! into a block of its own, carried to the routing service through the trusted application's
//! [proxy channel](peer::Router), and handed to the host thread that is blocked waiting for the
//! forward call to complete. That thread runs the host's [reverse handler](host::ReverseHandler)
//! and resumes the peer with the results.
//!
//! # Block format
//!
//! The [block](item::Block) is a sequence of little-endian `u64` words. It starts with an item
//! [header](item::Header):
//!
//! * size: `u64`
//! * kind: `u64`
//!
//! The size includes the full length of the item except the header. A block carries exactly one
//! [`CALL`](item::Kind::Call) item followed by an [`END`](item::Kind::End) item.
//!
//! ### Call
//!
//! A `CALL` item has the following contents:
//!
//! * `num`: `u64` - the command identifier
//! * `types`: `u64` - the packed [parameter types](param::ParamTypes)
//! * `argv`: `[[u64; 3]; 4]` - one triple per parameter slot
//! * `ret0`: `u64` - the result code
//! * `ret1`: `u64` - the origin of the result code
//! * `data`: `...` - data referenced by memory reference slots
//!
//! A value slot carries `[a, b, 0]`. A memory reference slot carries `[offset, size, shm]`, where
//! `offset` is relative to the beginning of the data section (or [`NULL`] for a null reference) and
//! `shm` is [`NULL`] unless the reference points into [registered memory](shm::SharedMemory).

#![deny(clippy::all)]
#![warn(rust_2018_idioms)]

pub mod host;
pub mod item;
pub mod param;
pub mod peer;
pub mod settings;
pub mod shm;
pub mod status;
pub mod uuid;

mod link;

pub use host::{Context, ReverseCall, ReverseHandler, Session, SessionBuilder, UserData};
pub use param::{Memref, Param, ParamType, ParamTypes, Params, Value};
pub use peer::{ClientIdentity, Command, PeerContext, TaSession, TrustedApp, TrustedPeer};
pub use settings::{Login, Settings, Timeout};
pub use shm::{SharedMemory, ShmFlags};
pub use status::{Error, Origin, ResultCode};
pub use self::uuid::Uuid;

/// Result type returned by functionality exposed by this crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Internal representation of a null reference in the block.
pub const NULL: u64 = u64::MAX;

/// The wicket version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
