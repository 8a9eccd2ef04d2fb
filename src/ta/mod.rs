// SPDX-License-Identifier: Apache-2.0

//! The demo trusted application `postern` talks to.

use log::{info, warn};
use wicket::param::{ParamType, ParamTypes};
use wicket::{
    Command, Memref, Param, Params, PeerContext, ResultCode, TaSession, TrustedApp, Uuid, Value,
};

pub const OCALL_TA_UUID: Uuid = Uuid::new(
    0x9b0d_4c6e,
    0x1f3a,
    0x4d52,
    [0x8a, 0x7e, 0x21, 0xc4, 0x05, 0x6b, 0x90, 0x3d],
);

/// Host command the demo application calls back with.
pub const CA_CMD_REPLY: u32 = 0;

/// The string the demo application sends with its call-back.
pub const TA_GREETING: &[u8] = b"This string was sent by the TA.\0";

/// Capacity of the buffer the host replies into.
const REPLY_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OcallCommand {
    /// Calls back into the host and reports what came back.
    Test = 0,
    /// Answers the inout value with `(0xE, 0xF)` and copies the input string to the inout buffer.
    Params = 1,
}

impl Command for OcallCommand {
    fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::Test),
            1 => Some(Self::Params),
            _ => None,
        }
    }

    fn param_types(self) -> ParamTypes {
        use ParamType::*;
        match self {
            Self::Test => ParamTypes::NONE,
            Self::Params => ParamTypes::new(ValueInput, ValueInout, MemrefInput, MemrefInout),
        }
    }
}

pub struct OcallApp;

pub struct OcallSession;

impl TrustedApp for OcallApp {
    type Session = OcallSession;

    fn open_session(
        &self,
        ctx: &mut PeerContext<'_>,
        _params: &mut Params,
    ) -> Result<OcallSession, ResultCode> {
        info!("session opened by {:?}", ctx.client());
        Ok(OcallSession)
    }
}

impl TaSession for OcallSession {
    type Command = OcallCommand;

    fn invoke(
        &mut self,
        ctx: &mut PeerContext<'_>,
        command: OcallCommand,
        params: &mut Params,
    ) -> Result<(), ResultCode> {
        match command {
            OcallCommand::Test => test(ctx),
            OcallCommand::Params => answer(params),
        }
    }

    fn close(&mut self) {
        info!("session closed");
    }
}

fn test(ctx: &mut PeerContext<'_>) -> Result<(), ResultCode> {
    let mut call = Params::new([
        Param::MemrefInput(Memref::new(TA_GREETING.to_vec())),
        Param::ValueInout(Value::new(1, 2)),
        Param::MemrefOutput(Memref::new(vec![0; REPLY_CAPACITY])),
        Param::None,
    ]);

    if let Err(error) = ctx.call_host(CA_CMD_REPLY, &mut call) {
        warn!("call-back to the host failed: {error}");
        return Err(error.code);
    }

    let value = call.value(1)?;
    let reply = call.memref(2)?.data().unwrap_or_default();
    info!(
        "host replied with ({:#x}, {:#x}) and {:?}",
        value.a,
        value.b,
        String::from_utf8_lossy(until_nul(reply))
    );
    Ok(())
}

fn answer(params: &mut Params) -> Result<(), ResultCode> {
    let input = *params.value(0)?;
    let inout = *params.value(1)?;
    info!("values in: ({}, {}) and ({}, {})", input.a, input.b, inout.a, inout.b);
    *params.value_mut(1)? = Value::new(0xE, 0xF);

    let mut text = until_nul(params.memref(2)?.data().unwrap_or_default()).to_vec();
    text.push(0);
    params.memref_mut(3)?.write(&text)
}

/// The bytes before the first NUL.
pub fn until_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}
