// SPDX-License-Identifier: Apache-2.0

use super::{ClientIdentity, Instance, PeerInner};
use crate::link::Conduit;
use crate::param::Params;
use crate::settings::{Login, Timeout};
use crate::uuid::Uuid;
use crate::Result;

/// What a trusted application sees of the call it is serving.
pub struct PeerContext<'a> {
    peer: &'a PeerInner,
    instance: &'a Instance,
    client: ClientIdentity,
    conduit: &'a mut Conduit,
    timeout: Timeout,
    limit: usize,
}

impl<'a> PeerContext<'a> {
    pub(crate) fn new(
        peer: &'a PeerInner,
        instance: &'a Instance,
        client: ClientIdentity,
        conduit: &'a mut Conduit,
        timeout: Timeout,
        limit: usize,
    ) -> Self {
        Self {
            peer,
            instance,
            client,
            conduit,
            timeout,
            limit,
        }
    }

    /// The trusted application serving the call.
    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.instance.uuid
    }

    /// Who opened the session.
    #[inline]
    pub fn client(&self) -> &ClientIdentity {
        &self.client
    }

    /// The timeout the host gave the call; reverse calls wait for the host as long.
    #[inline]
    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    /// Calls the host application that issued the forward call being served.
    ///
    /// Blocks until the host's reverse handler returns. The call is carried through this
    /// application's proxy channel, which is opened by the first call.
    pub fn call_host(&mut self, command_id: u32, params: &mut Params) -> Result<()> {
        let instance = self.instance;
        instance.router.send(self, command_id, params)
    }

    /// A context for calling into `instance` on behalf of this application.
    pub(crate) fn nested<'b>(&'b mut self, instance: &'b Instance) -> PeerContext<'b> {
        PeerContext {
            peer: self.peer,
            instance,
            client: ClientIdentity {
                login: Login::TrustedApp,
                uuid: Some(self.instance.uuid),
            },
            conduit: &mut *self.conduit,
            timeout: self.timeout,
            limit: self.limit,
        }
    }

    pub(crate) fn peer(&self) -> &'a PeerInner {
        self.peer
    }

    pub(crate) fn conduit(&mut self) -> &mut Conduit {
        self.conduit
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }
}
