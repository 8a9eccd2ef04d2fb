// SPDX-License-Identifier: Apache-2.0

//! Host-side functionality: contexts, sessions and the serving of reverse calls.

mod session;

pub use session::{Session, SessionBuilder, State};

use crate::item::{Block, Responder};
use crate::param::{ParamTypes, Params};
use crate::peer::TrustedPeer;
use crate::settings::Settings;
use crate::shm::{Registry, SharedMemory, ShmFlags};
use crate::status::{Error, Origin, ResultCode};
use crate::uuid::Uuid;

use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

/// Opaque application data handed back to reverse handlers.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// A reverse call, as presented to the host application.
#[derive(Debug)]
pub struct ReverseCall<'a> {
    /// The trusted application making the call.
    pub caller: Uuid,
    pub command_id: u32,
    pub param_types: ParamTypes,
    pub params: &'a mut Params,
    /// The data registered together with the handler.
    pub user_data: Option<&'a UserData>,
}

/// Serves reverse calls made by trusted applications.
///
/// The handler runs on the host thread that is blocked in the forward call the reverse call was
/// made from. The outcome is reported to the trusted application with [`Origin::ClientApp`].
pub trait ReverseHandler: Send + Sync {
    fn handle(&self, call: ReverseCall<'_>) -> Result<(), ResultCode>;
}

impl<F> ReverseHandler for F
where
    F: Fn(ReverseCall<'_>) -> Result<(), ResultCode> + Send + Sync,
{
    #[inline]
    fn handle(&self, call: ReverseCall<'_>) -> Result<(), ResultCode> {
        self(call)
    }
}

/// A handler together with the data it is called with.
#[derive(Clone)]
pub(crate) struct Registration {
    handler: Arc<dyn ReverseHandler>,
    user_data: Option<UserData>,
}

impl Registration {
    pub(crate) fn new(handler: Arc<dyn ReverseHandler>, user_data: Option<UserData>) -> Self {
        Self { handler, user_data }
    }

    /// Serves the reverse call in `block` in place.
    pub(crate) fn serve(registration: Option<Self>, caller: Uuid, mut block: Block) -> Block {
        let mut request = match block.decode(None) {
            Ok(request) => request,
            Err(code) => {
                warn!(%caller, "malformed reverse call");
                block.fail(Error::new(code, Origin::Api));
                return block;
            }
        };

        debug!(
            %caller,
            command_id = request.command_id,
            param_types = format_args!("{:#010x}", request.types),
            "reverse call"
        );

        let result = match registration {
            None => {
                warn!(%caller, "no reverse handler registered");
                Err(Error::new(ResultCode::NotSupported, Origin::Api))
            }
            Some(Self { handler, user_data }) => handler
                .handle(ReverseCall {
                    caller,
                    command_id: request.command_id,
                    param_types: request.types,
                    params: &mut request.params,
                    user_data: user_data.as_ref(),
                })
                .map_err(|code| Error::new(code, Origin::ClientApp)),
        };

        if let Err(error) = block.respond(request, result, Responder::Host) {
            debug!(%caller, %error, "reverse call failed");
        }
        block
    }
}

pub(crate) struct ContextInner {
    peer: TrustedPeer,
    settings: Settings,
    registry: Arc<Registry>,
    fallback: RwLock<Option<Registration>>,
}

/// Connection to a trusted peer. Cheap to clone; clones share sessions, settings and handlers.
#[derive(Clone)]
pub struct Context(Arc<ContextInner>);

impl Context {
    pub fn new(peer: &TrustedPeer) -> Self {
        Self::with_settings(peer, Settings::default())
    }

    pub fn with_settings(peer: &TrustedPeer, settings: Settings) -> Self {
        Self(Arc::new(ContextInner {
            peer: peer.clone(),
            settings,
            registry: Arc::default(),
            fallback: RwLock::new(None),
        }))
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.0.settings
    }

    /// Registers the handler serving reverse calls of sessions opened without one.
    pub fn set_reverse_handler(
        &self,
        handler: impl ReverseHandler + 'static,
        user_data: Option<UserData>,
    ) {
        let registration = Registration::new(Arc::new(handler), user_data);
        *self
            .0
            .fallback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(registration);
    }

    pub fn clear_reverse_handler(&self) {
        *self
            .0
            .fallback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Starts opening a session to the trusted application `uuid`.
    pub fn session(&self, uuid: Uuid) -> SessionBuilder<'_> {
        SessionBuilder::new(self, uuid)
    }

    /// Registers a zeroed region of `size` bytes.
    pub fn allocate_shared_memory(&self, size: usize, flags: ShmFlags) -> SharedMemory {
        self.register_shared_memory(vec![0; size], flags)
    }

    /// Registers `buffer`. The registration lasts as long as a handle to it exists.
    pub fn register_shared_memory(&self, buffer: Vec<u8>, flags: ShmFlags) -> SharedMemory {
        self.0.registry.register(buffer, flags)
    }

    pub(crate) fn peer(&self) -> &TrustedPeer {
        &self.0.peer
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.0.registry
    }

    pub(crate) fn fallback(&self) -> Option<Registration> {
        self.0
            .fallback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
