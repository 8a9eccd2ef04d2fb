// SPDX-License-Identifier: Apache-2.0

use super::routing::{self, RoutingService, RoutingSession, ROUTING_SERVICE_UUID};
use super::{Dispatch, Instance, PeerContext, TaSession, TrustedApp};
use crate::item::Block;
use crate::param::{Memref, Param, Params, Value};
use crate::peer::Command;
use crate::status::{self, Error, Origin, ResultCode};
use crate::Result;

use once_cell::sync::OnceCell;
use std::sync::Arc;

use tracing::{debug, warn};

/// Per-application gateway for reverse calls.
///
/// The router of a trusted application owns its [`ProxyChannel`], a session with the routing
/// service opened by the application's first reverse call and reused by every later one. The
/// channel is closed when the application is uninstalled together with the peer.
#[derive(Default)]
pub struct Router {
    channel: OnceCell<ProxyChannel>,
}

impl Router {
    /// Whether the proxy channel has been opened.
    pub fn is_open(&self) -> bool {
        self.channel.get().is_some()
    }

    pub(crate) fn send(
        &self,
        ctx: &mut PeerContext<'_>,
        command_id: u32,
        params: &mut Params,
    ) -> Result<()> {
        let channel = self
            .channel
            .get_or_try_init(|| ProxyChannel::open(ctx))
            .map_err(|error| {
                warn!(%error, "cannot open the proxy channel");
                Error::new(error.code, Origin::Comms)
            })?;
        channel.send(ctx, command_id, params)
    }
}

/// Session of a trusted application with the routing service.
///
/// The session holds no state of its own calls, so every reverse call runs on a copy of it and
/// reverse calls of different call chains proceed in parallel.
pub(crate) struct ProxyChannel {
    routing: Arc<Instance>,
    session: RoutingSession,
}

impl ProxyChannel {
    fn open(ctx: &mut PeerContext<'_>) -> Result<Self> {
        let routing = ctx
            .peer()
            .instance(&ROUTING_SERVICE_UUID)
            .ok_or(Error::new(ResultCode::ItemNotFound, Origin::Tee))?;

        let caller = ctx.uuid();
        let session = {
            let mut nested = ctx.nested(&routing);
            RoutingService
                .open_session(&mut nested, &mut Params::default())
                .map_err(|code| Error::new(code, Origin::Tee))?
        };

        debug!(%caller, "proxy channel opened");
        Ok(Self { routing, session })
    }

    /// Marshals the call, has the routing service carry it to the host and collects the reply.
    ///
    /// The control value goes out as `(command id, parameter types)` and comes back as
    /// `(status, origin)`. The status it reports wins over the one in the block, which nobody
    /// may have answered.
    fn send(&self, ctx: &mut PeerContext<'_>, command_id: u32, params: &mut Params) -> Result<()> {
        let types = params.types();
        let (block, staged) = Block::stage(command_id, params, ctx.limit())
            .map_err(|code| Error::new(code, Origin::Tee))?;

        let mut rpc = Params::new([
            Param::ValueInout(Value::new(command_id, types.raw())),
            Param::MemrefInout(Memref::new(block.into())),
            Param::None,
            Param::None,
        ]);

        {
            let command = routing::Command::Send;
            let mut session = self.session;
            let mut nested = ctx.nested(&self.routing);
            session
                .dispatch(&mut nested, command as u32, command.param_types(), &mut rpc)
                .map_err(|error| {
                    warn!(%error, "routing service failed");
                    Error::new(error.code, Origin::Comms)
                })?;
        }

        let control = *rpc
            .value(0)
            .map_err(|code| Error::new(code, Origin::Comms))?;
        let reported = status::decode(control.a).map_err(|code| {
            Error::new(code, Origin::try_from(control.b).unwrap_or(Origin::Comms))
        });

        let reply = match rpc.memref(1).ok().and_then(Memref::data) {
            Some(bytes) => Block::from(bytes.to_vec()),
            None => return Err(Error::comms()),
        };
        let collected = reply.collect(&staged, params);

        reported.and(collected)
    }
}

impl Drop for ProxyChannel {
    fn drop(&mut self) {
        TaSession::close(&mut self.session);
    }
}
