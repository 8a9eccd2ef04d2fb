// SPDX-License-Identifier: Apache-2.0

//! Enter/exit exchange between a host session and the peer thread serving it.
//!
//! The host enters the peer with a block and waits for the peer to exit. The peer exits either
//! because the call is done, or because the trusted application wants the host to serve a reverse
//! call; the host then resumes the peer with the answered reverse block and waits again.
//!
//! Forward calls are numbered by `seq`, the reverse calls of a peer by `call`. A reply is only
//! ever taken for the exchange it is numbered for.

use crate::item::Block;
use crate::settings::Timeout;
use crate::status::{Error, Origin, ResultCode};
use crate::uuid::Uuid;

use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace, warn};

/// Host to peer message.
#[derive(Debug)]
pub(crate) enum Enter {
    Open {
        seq: u64,
        block: Block,
        timeout: Timeout,
    },
    Invoke {
        seq: u64,
        block: Block,
        timeout: Timeout,
    },
    Resume {
        seq: u64,
        call: u64,
        block: Block,
    },
    Close,
}

/// Peer to host message.
#[derive(Debug)]
pub(crate) enum Exit {
    Done { seq: u64, block: Block },
    Reverse {
        seq: u64,
        call: u64,
        caller: Uuid,
        block: Block,
    },
}

/// Which forward call enters the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Entry {
    Open,
    Invoke,
}

/// Creates the two ends of a link.
pub(crate) fn channel_pair() -> (Sender<Enter>, Receiver<Exit>, Conduit) {
    let (enter_tx, enter_rx) = channel();
    let (exit_tx, exit_rx) = channel();
    (enter_tx, exit_rx, Conduit::new(exit_tx, enter_rx))
}

/// Host end of a link.
#[derive(Debug)]
pub(crate) struct Link {
    tx: Sender<Enter>,
    rx: Receiver<Exit>,
    seq: u64,
    thread: Option<JoinHandle<()>>,
    abandoned: bool,
}

impl Link {
    pub(crate) fn new(tx: Sender<Enter>, rx: Receiver<Exit>, thread: JoinHandle<()>) -> Self {
        Self {
            tx,
            rx,
            seq: 0,
            thread: Some(thread),
            abandoned: false,
        }
    }

    /// Enters the peer with `block` and serves reverse calls with `reverse` until the peer is done.
    ///
    /// `timeout` bounds the total time spent waiting for the peer. Time spent in `reverse` on the
    /// host does not count. On expiry the call is abandoned: its late reply is discarded and its
    /// late reverse calls are refused.
    #[instrument(level = "trace", skip(self, block, reverse))]
    pub(crate) fn call(
        &mut self,
        entry: Entry,
        block: Block,
        timeout: Timeout,
        mut reverse: impl FnMut(Uuid, Block) -> Block,
    ) -> Result<Block, Error> {
        self.seq += 1;
        let seq = self.seq;

        let enter = match entry {
            Entry::Open => Enter::Open {
                seq,
                block,
                timeout,
            },
            Entry::Invoke => Enter::Invoke {
                seq,
                block,
                timeout,
            },
        };
        self.tx.send(enter).map_err(|_| Self::disconnected())?;

        let mut budget = timeout.duration();
        loop {
            match self.recv(&mut budget)? {
                Exit::Done { seq: done, block } if done == seq => return Ok(block),

                Exit::Reverse {
                    seq: current,
                    call,
                    caller,
                    block,
                } if current == seq => {
                    let block = reverse(caller, block);
                    self.tx
                        .send(Enter::Resume { seq, call, block })
                        .map_err(|_| Self::disconnected())?;
                }

                Exit::Done { seq: stale, .. } => {
                    trace!(stale, "discarding reply to an abandoned call");
                }

                Exit::Reverse {
                    seq: stale,
                    call,
                    mut block,
                    ..
                } => {
                    debug!(stale, call, "refusing reverse call of an abandoned call");
                    block.fail(Error::comms());
                    self.tx
                        .send(Enter::Resume {
                            seq: stale,
                            call,
                            block,
                        })
                        .map_err(|_| Self::disconnected())?;
                }
            }
        }
    }

    /// Waits for the peer, charging the time waited to `budget`.
    fn recv(&mut self, budget: &mut Option<Duration>) -> Result<Exit, Error> {
        let left = match *budget {
            None => return self.rx.recv().map_err(|_| Self::disconnected()),
            Some(left) => left,
        };

        let start = Instant::now();
        match self.rx.recv_timeout(left) {
            Ok(exit) => {
                *budget = Some(left.saturating_sub(start.elapsed()));
                Ok(exit)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(seq = self.seq, "peer did not answer in time");
                self.abandoned = true;
                Err(Error::new(ResultCode::Timeout, Origin::Comms))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Self::disconnected()),
        }
    }

    fn disconnected() -> Error {
        warn!("peer thread is gone");
        Error::comms()
    }

    /// Tells the peer to close and waits for its thread, unless a call was abandoned.
    pub(crate) fn close(&mut self) {
        let _ = self.tx.send(Enter::Close);

        if let Some(thread) = self.thread.take() {
            if self.abandoned {
                debug!("detaching peer thread still serving an abandoned call");
            } else if thread.join().is_err() {
                warn!("peer thread panicked");
            }
        }
    }
}

/// Peer end of a link.
#[derive(Debug)]
pub(crate) struct Conduit {
    tx: Sender<Exit>,
    rx: Receiver<Enter>,
    pending: VecDeque<Enter>,
    seq: u64,
    call: u64,
}

impl Conduit {
    fn new(tx: Sender<Exit>, rx: Receiver<Enter>) -> Self {
        Self {
            tx,
            rx,
            pending: VecDeque::new(),
            seq: 0,
            call: 0,
        }
    }

    /// Waits for the next message from the host; `None` once the host is gone.
    pub(crate) fn next(&mut self) -> Option<Enter> {
        self.pending.pop_front().or_else(|| self.rx.recv().ok())
    }

    /// Starts serving forward call `seq`.
    pub(crate) fn begin(&mut self, seq: u64) {
        self.seq = seq;
    }

    /// Finishes the current forward call. Returns `false` if the host is gone.
    pub(crate) fn done(&mut self, block: Block) -> bool {
        self.tx
            .send(Exit::Done {
                seq: self.seq,
                block,
            })
            .is_ok()
    }

    /// Hands a reverse call to the host thread blocked in the current forward call and waits
    /// for its answer.
    ///
    /// Late replies to earlier reverse calls are dropped. Any other message arriving meanwhile
    /// means the host gave up on the forward call; it is kept for [`Conduit::next`] and the
    /// reverse call fails.
    #[instrument(level = "trace", skip(self, block))]
    pub(crate) fn reverse(
        &mut self,
        caller: Uuid,
        block: Block,
        timeout: Timeout,
    ) -> Result<Block, Error> {
        self.call += 1;
        let (seq, call) = (self.seq, self.call);
        self.tx
            .send(Exit::Reverse {
                seq,
                call,
                caller,
                block,
            })
            .map_err(|_| Error::comms())?;

        let deadline = timeout.duration().map(|duration| Instant::now() + duration);
        loop {
            let enter = match deadline {
                None => self.rx.recv().map_err(|_| Error::comms())?,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    match self.rx.recv_timeout(left) {
                        Ok(enter) => enter,
                        Err(RecvTimeoutError::Timeout) => {
                            debug!(seq, call, "host did not answer the reverse call in time");
                            return Err(Error::new(ResultCode::Timeout, Origin::Comms));
                        }
                        Err(RecvTimeoutError::Disconnected) => return Err(Error::comms()),
                    }
                }
            };

            match enter {
                Enter::Resume {
                    seq: resumed,
                    call: answered,
                    block,
                } if resumed == seq && answered == call => return Ok(block),
                Enter::Resume {
                    seq: resumed,
                    call: answered,
                    ..
                } => trace!(resumed, answered, "dropping late reply to an earlier reverse call"),
                other => {
                    debug!(seq, "host abandoned the call while a reverse call was pending");
                    self.pending.push_back(other);
                    return Err(Error::comms());
                }
            }
        }
    }
}
