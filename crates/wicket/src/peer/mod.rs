// SPDX-License-Identifier: Apache-2.0

//! Peer-side functionality: hosting trusted applications and routing their calls to the host.

mod context;
mod router;
pub mod routing;
mod thread;

pub use context::PeerContext;
pub use router::Router;
pub use routing::ROUTING_SERVICE_UUID;

use crate::link::Link;
use crate::param::{validate, ParamTypes, Params};
use crate::settings::Login;
use crate::shm::Registry;
use crate::status::{Error, Origin, ResultCode};
use crate::uuid::Uuid;
use crate::Result;

use core::fmt;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

/// Who opened a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    pub login: Login,
    /// The calling trusted application, for [`Login::TrustedApp`] sessions.
    pub uuid: Option<Uuid>,
}

/// A command a trusted application serves.
pub trait Command: Copy + fmt::Debug + Sized {
    fn from_id(id: u32) -> Option<Self>;

    /// The parameter types the command must be invoked with.
    fn param_types(self) -> ParamTypes;
}

/// An open session of a trusted application.
pub trait TaSession: Send + 'static {
    type Command: Command;

    /// Serves `command`. The parameter types have been validated already.
    fn invoke(
        &mut self,
        ctx: &mut PeerContext<'_>,
        command: Self::Command,
        params: &mut Params,
    ) -> core::result::Result<(), ResultCode>;

    fn close(&mut self) {}
}

/// A trusted application.
pub trait TrustedApp: Send + Sync + 'static {
    type Session: TaSession;

    fn open_session(
        &self,
        ctx: &mut PeerContext<'_>,
        params: &mut Params,
    ) -> core::result::Result<Self::Session, ResultCode>;
}

/// Type-erased [`TrustedApp`].
pub(crate) trait Service: Send + Sync {
    fn open(&self, ctx: &mut PeerContext<'_>, params: &mut Params) -> Result<Box<dyn Dispatch>>;
}

impl<A: TrustedApp> Service for A {
    fn open(&self, ctx: &mut PeerContext<'_>, params: &mut Params) -> Result<Box<dyn Dispatch>> {
        match self.open_session(ctx, params) {
            Ok(session) => Ok(Box::new(session)),
            Err(code) => Err(Error::new(code, Origin::TrustedApp)),
        }
    }
}

/// Type-erased [`TaSession`]: checks a call before the application sees it.
pub(crate) trait Dispatch: Send {
    fn dispatch(
        &mut self,
        ctx: &mut PeerContext<'_>,
        command_id: u32,
        types: ParamTypes,
        params: &mut Params,
    ) -> Result<()>;

    fn close(&mut self);
}

impl<S: TaSession> Dispatch for S {
    fn dispatch(
        &mut self,
        ctx: &mut PeerContext<'_>,
        command_id: u32,
        types: ParamTypes,
        params: &mut Params,
    ) -> Result<()> {
        let command = S::Command::from_id(command_id).ok_or_else(|| {
            debug!(command_id, "unknown command");
            Error::new(ResultCode::BadParameters, Origin::Tee)
        })?;

        let expected = command.param_types();
        if !validate(types.raw(), expected.raw()) {
            debug!(
                ?command,
                actual = format_args!("{:#010x}", types),
                expected = format_args!("{:#010x}", expected),
                "parameter types do not match"
            );
            return Err(Error::new(ResultCode::BadParameters, Origin::Tee));
        }

        self.invoke(ctx, command, params)
            .map_err(|code| Error::new(code, Origin::TrustedApp))
    }

    fn close(&mut self) {
        TaSession::close(self)
    }
}

/// An installed trusted application.
pub(crate) struct Instance {
    pub(crate) uuid: Uuid,
    pub(crate) service: Box<dyn Service>,
    pub(crate) router: Router,
}

pub(crate) struct PeerInner {
    instances: RwLock<HashMap<Uuid, Arc<Instance>>>,
    threads: AtomicU64,
}

impl PeerInner {
    pub(crate) fn instance(&self, uuid: &Uuid) -> Option<Arc<Instance>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uuid)
            .cloned()
    }
}

/// The trusted peer: a set of installed trusted applications, each session served by a thread
/// of its own. Cheap to clone.
#[derive(Clone)]
pub struct TrustedPeer(Arc<PeerInner>);

impl Default for TrustedPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustedPeer {
    /// Creates a peer with only the routing service installed.
    pub fn new() -> Self {
        let peer = Self(Arc::new(PeerInner {
            instances: RwLock::default(),
            threads: AtomicU64::new(0),
        }));
        peer.insert(ROUTING_SERVICE_UUID, routing::RoutingService);
        peer
    }

    fn insert(&self, uuid: Uuid, service: impl Service + 'static) -> bool {
        let mut instances = self
            .0
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if instances.contains_key(&uuid) {
            return false;
        }

        instances.insert(
            uuid,
            Arc::new(Instance {
                uuid,
                service: Box::new(service),
                router: Router::default(),
            }),
        );
        true
    }

    /// Installs `app` under `uuid`.
    ///
    /// Fails with [`ResultCode::AccessDenied`] for the routing service's uuid and with
    /// [`ResultCode::BadState`] if `uuid` is taken.
    pub fn install<A: TrustedApp>(&self, uuid: Uuid, app: A) -> core::result::Result<(), ResultCode> {
        if uuid == ROUTING_SERVICE_UUID {
            return Err(ResultCode::AccessDenied);
        }
        if !self.insert(uuid, app) {
            return Err(ResultCode::BadState);
        }
        info!(%uuid, "installed trusted application");
        Ok(())
    }

    /// The installed services, in order.
    pub fn services(&self) -> Vec<Uuid> {
        let mut uuids: Vec<Uuid> = self
            .0
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        uuids.sort();
        uuids
    }

    /// Whether the trusted application `uuid` has opened its proxy channel, which happens on its
    /// first reverse call.
    pub fn proxy_channel_open(&self, uuid: Uuid) -> bool {
        self.0
            .instance(&uuid)
            .map_or(false, |instance| instance.router.is_open())
    }

    /// Starts a thread serving a new session of `uuid`.
    pub(crate) fn connect(
        &self,
        uuid: Uuid,
        client: ClientIdentity,
        registry: Arc<Registry>,
        limit: usize,
    ) -> Result<Link> {
        let instance = self.0.instance(&uuid).ok_or_else(|| {
            debug!(%uuid, "no such trusted application");
            Error::new(ResultCode::ItemNotFound, Origin::Tee)
        })?;
        thread::spawn(self.0.clone(), instance, client, registry, limit)
    }
}
