// SPDX-License-Identifier: Apache-2.0

use super::{ClientIdentity, Dispatch, Instance, PeerContext, PeerInner};
use crate::item::Responder;
use crate::link::{channel_pair, Conduit, Enter, Link};
use crate::shm::Registry;
use crate::status::{Error, Origin, ResultCode};
use crate::Result;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, instrument, trace};

/// Spawns the thread serving one session of `instance`.
pub(super) fn spawn(
    peer: Arc<PeerInner>,
    instance: Arc<Instance>,
    client: ClientIdentity,
    registry: Arc<Registry>,
    limit: usize,
) -> Result<Link> {
    let (tx, rx, mut conduit) = channel_pair();
    let n = peer.threads.fetch_add(1, Ordering::Relaxed);

    let handle = thread::Builder::new()
        .name(format!("peer-session-{n}"))
        .spawn(move || serve(&peer, &instance, client, &registry, limit, &mut conduit))
        .map_err(|e| {
            error!("failed to spawn peer session thread: {e}");
            Error::new(ResultCode::OutOfMemory, Origin::Tee)
        })?;

    Ok(Link::new(tx, rx, handle))
}

/// Serves the session until the host closes it or goes away.
#[instrument(level = "debug", skip_all, fields(uuid = %instance.uuid))]
fn serve(
    peer: &PeerInner,
    instance: &Instance,
    client: ClientIdentity,
    registry: &Registry,
    limit: usize,
    conduit: &mut Conduit,
) {
    let mut session: Option<Box<dyn Dispatch>> = None;

    while let Some(enter) = conduit.next() {
        match enter {
            Enter::Open {
                seq,
                mut block,
                timeout,
            } => {
                conduit.begin(seq);
                let opened = match block.decode(Some(registry)) {
                    Err(code) => {
                        block.fail(Error::new(code, Origin::Tee));
                        false
                    }
                    Ok(mut request) => {
                        let mut ctx =
                            PeerContext::new(peer, instance, client, conduit, timeout, limit);
                        let result = instance
                            .service
                            .open(&mut ctx, &mut request.params)
                            .map(|opened| session = Some(opened));
                        block.respond(request, result, Responder::Peer).is_ok()
                    }
                };

                if !conduit.done(block) || !opened {
                    debug!(opened, "session not opened");
                    break;
                }
            }

            Enter::Invoke {
                seq,
                mut block,
                timeout,
            } => {
                conduit.begin(seq);
                match (session.as_mut(), block.decode(Some(registry))) {
                    (None, _) => block.fail(Error::new(ResultCode::BadState, Origin::Tee)),
                    (Some(_), Err(code)) => block.fail(Error::new(code, Origin::Tee)),
                    (Some(session), Ok(mut request)) => {
                        let mut ctx =
                            PeerContext::new(peer, instance, client, conduit, timeout, limit);
                        let result = session.dispatch(
                            &mut ctx,
                            request.command_id,
                            request.types,
                            &mut request.params,
                        );
                        let command_id = request.command_id;
                        if let Err(error) = block.respond(request, result, Responder::Peer) {
                            debug!(command_id, %error, "call failed");
                        }
                    }
                }

                if !conduit.done(block) {
                    debug!("host is gone");
                    break;
                }
            }

            Enter::Resume { seq, .. } => trace!(seq, "dropping resume of an abandoned call"),

            Enter::Close => break,
        }
    }

    if let Some(mut session) = session {
        session.close();
    }
    debug!("session thread done");
}

