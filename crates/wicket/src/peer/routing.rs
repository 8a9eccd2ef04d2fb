// SPDX-License-Identifier: Apache-2.0

//! The routing service: the peer-side end of every proxy channel.
//!
//! Only trusted applications may open it. Its single command takes a marshaled reverse call and
//! hands it to the host thread blocked in the forward call being served.

use super::{ClientIdentity, PeerContext, TaSession, TrustedApp};
use crate::item::Block;
use crate::param::{ParamType, ParamTypes, Params, Value};
use crate::settings::Login;
use crate::status::ResultCode;
use crate::uuid::Uuid;

use tracing::trace;

/// Uuid the routing service is installed under.
pub const ROUTING_SERVICE_UUID: Uuid = Uuid::new(
    0xa8cf_3f0e,
    0x51b2,
    0x4c7e,
    [0x9d, 0x3a, 0x5e, 0x0b, 0x6f, 0x21, 0xc4, 0x87],
);

/// Commands of the routing service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    /// Slot 0 carries `(command id, parameter types)` in and `(status, origin)` out, slot 1 the
    /// marshaled call in and its reply out.
    Send = 0x0,
}

impl super::Command for Command {
    fn from_id(id: u32) -> Option<Self> {
        match id {
            id if id == Command::Send as _ => Some(Command::Send),
            _ => None,
        }
    }

    fn param_types(self) -> ParamTypes {
        match self {
            Command::Send => ParamTypes::new(
                ParamType::ValueInout,
                ParamType::MemrefInout,
                ParamType::None,
                ParamType::None,
            ),
        }
    }
}

pub(crate) struct RoutingService;

impl TrustedApp for RoutingService {
    type Session = RoutingSession;

    fn open_session(
        &self,
        ctx: &mut PeerContext<'_>,
        _params: &mut Params,
    ) -> Result<RoutingSession, ResultCode> {
        match *ctx.client() {
            ClientIdentity {
                login: Login::TrustedApp,
                uuid: Some(caller),
            } => Ok(RoutingSession { caller }),
            _ => Err(ResultCode::AccessDenied),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RoutingSession {
    caller: Uuid,
}

impl TaSession for RoutingSession {
    type Command = Command;

    fn invoke(
        &mut self,
        ctx: &mut PeerContext<'_>,
        command: Command,
        params: &mut Params,
    ) -> Result<(), ResultCode> {
        match command {
            Command::Send => {
                let control = *params.value(0)?;
                let block = params
                    .memref(1)?
                    .data()
                    .map(|bytes| Block::from(bytes.to_vec()))
                    .ok_or(ResultCode::BadParameters)?;

                let payload = block.payload()?;
                if payload.num != u64::from(control.a) || payload.types != u64::from(control.b) {
                    return Err(ResultCode::BadParameters);
                }

                trace!(caller = %self.caller, command_id = control.a, "routing reverse call");
                let timeout = ctx.timeout();
                let (status, origin) = match ctx.conduit().reverse(self.caller, block, timeout) {
                    Ok(reply) => {
                        let [status, origin] = reply.payload()?.ret;
                        params.memref_mut(1)?.write(reply.as_ref())?;
                        (
                            u32::try_from(status).map_err(|_| ResultCode::BadParameters)?,
                            u32::try_from(origin).map_err(|_| ResultCode::BadParameters)?,
                        )
                    }
                    Err(error) => (error.code as u32, error.origin as u32),
                };

                *params.value_mut(0)? = Value::new(status, origin);
                Ok(())
            }
        }
    }
}
