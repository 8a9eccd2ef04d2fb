// SPDX-License-Identifier: Apache-2.0

//! Result codes and the origin of a result.

use core::fmt;

/// Raw result code of a successful call.
pub const SUCCESS: u32 = 0x0000_0000;

/// Failure of a call, as seen by the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(u32)]
pub enum ResultCode {
    #[error("generic error")]
    Generic = 0xFFFF_0000,
    #[error("access denied")]
    AccessDenied = 0xFFFF_0001,
    #[error("cancelled")]
    Cancel = 0xFFFF_0002,
    #[error("bad parameters")]
    BadParameters = 0xFFFF_0006,
    #[error("bad state")]
    BadState = 0xFFFF_0007,
    #[error("item not found")]
    ItemNotFound = 0xFFFF_0008,
    #[error("not supported")]
    NotSupported = 0xFFFF_000A,
    #[error("out of memory")]
    OutOfMemory = 0xFFFF_000C,
    #[error("busy")]
    Busy = 0xFFFF_000D,
    #[error("communication failure")]
    Communication = 0xFFFF_000E,
    #[error("short buffer")]
    ShortBuffer = 0xFFFF_0010,
    #[error("timeout")]
    Timeout = 0xFFFF_3001,
    #[error("target dead")]
    TargetDead = 0xFFFF_3024,
}

impl ResultCode {
    const ALL: [ResultCode; 13] = [
        ResultCode::Generic,
        ResultCode::AccessDenied,
        ResultCode::Cancel,
        ResultCode::BadParameters,
        ResultCode::BadState,
        ResultCode::ItemNotFound,
        ResultCode::NotSupported,
        ResultCode::OutOfMemory,
        ResultCode::Busy,
        ResultCode::Communication,
        ResultCode::ShortBuffer,
        ResultCode::Timeout,
        ResultCode::TargetDead,
    ];
}

impl TryFrom<u32> for ResultCode {
    type Error = u32;

    #[inline]
    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|code| *code as u32 == raw)
            .ok_or(raw)
    }
}

/// Packs an application status into its raw form.
#[inline]
pub fn encode(status: Result<(), ResultCode>) -> u32 {
    match status {
        Ok(()) => SUCCESS,
        Err(code) => code as _,
    }
}

/// Unpacks a raw status. Codes this crate does not know are reported as [`ResultCode::Generic`].
#[inline]
pub fn decode(raw: u32) -> Result<(), ResultCode> {
    match raw {
        SUCCESS => Ok(()),
        raw => Err(ResultCode::try_from(raw).unwrap_or(ResultCode::Generic)),
    }
}

/// The layer a result code was produced by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Origin {
    /// The host client API.
    Api = 0x1,
    /// The communication stack between host and peer.
    Comms = 0x2,
    /// The trusted peer framework.
    Tee = 0x3,
    /// A trusted application.
    TrustedApp = 0x4,
    /// A host application, reached through a reverse call.
    ClientApp = 0x5,
}

impl TryFrom<u32> for Origin {
    type Error = u32;

    #[inline]
    fn try_from(origin: u32) -> Result<Self, Self::Error> {
        match origin {
            origin if origin == Origin::Api as _ => Ok(Origin::Api),
            origin if origin == Origin::Comms as _ => Ok(Origin::Comms),
            origin if origin == Origin::Tee as _ => Ok(Origin::Tee),
            origin if origin == Origin::TrustedApp as _ => Ok(Origin::TrustedApp),
            origin if origin == Origin::ClientApp as _ => Ok(Origin::ClientApp),
            origin => Err(origin),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Origin::Api => "api",
            Origin::Comms => "comms",
            Origin::Tee => "tee",
            Origin::TrustedApp => "trusted application",
            Origin::ClientApp => "client application",
        })
    }
}

/// A failed call: what went wrong and which layer said so.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{code} (origin: {origin})")]
pub struct Error {
    pub code: ResultCode,
    pub origin: Origin,
}

impl Error {
    #[inline]
    pub const fn new(code: ResultCode, origin: Origin) -> Self {
        Self { code, origin }
    }

    /// Shorthand for a failure of the communication stack.
    #[inline]
    pub(crate) const fn comms() -> Self {
        Self::new(ResultCode::Communication, Origin::Comms)
    }
}
