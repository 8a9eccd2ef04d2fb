// SPDX-License-Identifier: Apache-2.0

use super::{Context, Registration, ReverseHandler, UserData};
use crate::item::Block;
use crate::link::{Entry, Link};
use crate::param::Params;
use crate::peer::ClientIdentity;
use crate::settings::{Login, Timeout};
use crate::shm::lock;
use crate::status::{Error, Origin, ResultCode};
use crate::uuid::Uuid;
use crate::Result;

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info, instrument};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Sessions the current thread is inside of, innermost last.
    static ACTIVE: RefCell<Vec<u64>> = RefCell::new(Vec::new());
}

/// Marks a session as active on the current thread while a call is outstanding.
struct Active(u64);

impl Active {
    fn enter(id: u64) -> Self {
        ACTIVE.with(|active| active.borrow_mut().push(id));
        Self(id)
    }

    fn contains(id: u64) -> bool {
        ACTIVE.with(|active| active.borrow().contains(&id))
    }
}

impl Drop for Active {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|id| *id == self.0) {
                active.remove(pos);
            }
        });
    }
}

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Open,
    /// Close has started and waits for calls in flight.
    Closing,
    Closed,
}

#[derive(Debug)]
struct Lifecycle {
    state: State,
    in_flight: usize,
    /// A call owns the link.
    busy: bool,
}

/// A call counted in flight, until dropped.
struct InFlight<'a>(&'a SessionInner);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// The turn of a call on the link, until dropped.
struct Turn<'a>(&'a SessionInner);

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.0.lifecycle().busy = false;
        self.0.idle.notify_all();
    }
}

struct SessionInner {
    id: u64,
    uuid: Uuid,
    context: Context,
    registration: Option<Registration>,
    user_data: Option<UserData>,
    lifecycle: Mutex<Lifecycle>,
    idle: Condvar,
    link: Mutex<Link>,
}

impl SessionInner {
    /// The handler serving reverse calls of this session, and its data.
    fn registration(&self) -> Option<Registration> {
        match &self.registration {
            Some(registration) => Some(registration.clone()),
            None => self.context.fallback().map(|fallback| match &self.user_data {
                Some(data) => Registration::new(fallback.handler, Some(data.clone())),
                None => fallback,
            }),
        }
    }

    fn reverse(&self, caller: Uuid, block: Block) -> Block {
        Registration::serve(self.registration(), caller, block)
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        lock(&self.lifecycle)
    }

    /// Counts a call in, unless close has started.
    fn begin(&self) -> Result<InFlight<'_>> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != State::Open {
            debug!(id = self.id, state = ?lifecycle.state, "call refused, session is closing");
            return Err(Error::comms());
        }
        lifecycle.in_flight += 1;
        Ok(InFlight(self))
    }

    fn end(&self) {
        let mut lifecycle = self.lifecycle();
        lifecycle.in_flight -= 1;
        if lifecycle.in_flight == 0 {
            self.idle.notify_all();
        }
    }

    /// Waits for the calls ahead on the link, for at most `timeout`.
    fn turn(&self, timeout: Timeout) -> Result<Turn<'_>> {
        let deadline = timeout.duration().map(|duration| Instant::now() + duration);
        let mut lifecycle = self.lifecycle();
        while lifecycle.busy {
            lifecycle = match deadline {
                None => self
                    .idle
                    .wait(lifecycle)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        debug!(id = self.id, "timed out waiting for the calls ahead");
                        return Err(Error::new(ResultCode::Timeout, Origin::Comms));
                    }
                    self.idle
                        .wait_timeout(lifecycle, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        lifecycle.busy = true;
        Ok(Turn(self))
    }

    fn forward(&self, entry: Entry, block: Block, timeout: Timeout) -> Result<Block> {
        let _active = Active::enter(self.id);
        let _turn = self.turn(timeout)?;
        let mut link = lock(&self.link);
        link.call(entry, block, timeout, |caller, block| {
            self.reverse(caller, block)
        })
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .state;
        if state != State::Closed {
            self.link
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .close();
        }
    }
}

/// Options for opening a [`Session`].
pub struct SessionBuilder<'a> {
    context: &'a Context,
    uuid: Uuid,
    login: Login,
    registration: Option<Arc<dyn ReverseHandler>>,
    user_data: Option<UserData>,
    params: Option<&'a mut Params>,
    timeout: Timeout,
}

impl<'a> SessionBuilder<'a> {
    pub(super) fn new(context: &'a Context, uuid: Uuid) -> Self {
        let settings = context.settings();
        Self {
            context,
            uuid,
            login: settings.login,
            registration: None,
            user_data: None,
            params: None,
            timeout: settings.timeout,
        }
    }

    pub fn login(mut self, login: Login) -> Self {
        self.login = login;
        self
    }

    /// Serves this session's reverse calls with `handler` instead of the context's.
    pub fn handler(mut self, handler: impl ReverseHandler + 'static) -> Self {
        self.registration = Some(Arc::new(handler));
        self
    }

    /// Data handed to the reverse handler of this session.
    pub fn user_data(mut self, user_data: UserData) -> Self {
        self.user_data = Some(user_data);
        self
    }

    /// Parameters passed to the trusted application's open entry point.
    pub fn params(mut self, params: &'a mut Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Opens the session. Reverse calls made while opening are served already.
    #[instrument(level = "debug", skip(self), fields(uuid = %self.uuid, login = ?self.login))]
    pub fn open(self) -> Result<Session> {
        let Self {
            context,
            uuid,
            login,
            registration,
            user_data,
            params,
            timeout,
        } = self;

        if login == Login::TrustedApp {
            return Err(Error::new(ResultCode::BadParameters, Origin::Api));
        }

        let mut scratch = Params::default();
        let params = match params {
            Some(params) => params,
            None => &mut scratch,
        };

        let limit = context.settings().max_block_size;
        let (block, staged) =
            Block::stage(0, params, limit).map_err(|code| Error::new(code, Origin::Api))?;

        let client = ClientIdentity { login, uuid: None };
        let link = context
            .peer()
            .connect(uuid, client, context.registry().clone(), limit)?;

        let inner = Arc::new(SessionInner {
            id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            uuid,
            context: context.clone(),
            registration: registration.map(|handler| Registration::new(handler, user_data.clone())),
            user_data,
            lifecycle: Mutex::new(Lifecycle {
                state: State::Open,
                in_flight: 0,
                busy: false,
            }),
            idle: Condvar::new(),
            link: Mutex::new(link),
        });

        inner
            .forward(Entry::Open, block, timeout)
            .and_then(|reply| reply.collect(&staged, params))?;

        info!(id = inner.id, "session opened");
        Ok(Session(inner))
    }
}

/// An open session with a trusted application.
///
/// Clones share the session and may be used from several threads; calls on one session are
/// carried out one at a time. The session closes when [`Session::close`] is called or the last
/// clone is dropped.
#[derive(Clone)]
pub struct Session(Arc<SessionInner>);

impl Session {
    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.0.uuid
    }

    pub fn state(&self) -> State {
        self.0.lifecycle().state
    }

    /// Invokes `command_id` with the context's default timeout.
    pub fn invoke(&self, command_id: u32, params: &mut Params) -> Result<()> {
        let timeout = self.0.context.settings().timeout;
        self.invoke_with_timeout(command_id, params, timeout)
    }

    /// Invokes `command_id` of the trusted application and waits for it to complete, serving
    /// the reverse calls it makes in the meantime.
    ///
    /// Calling back into a session from inside one of its own reverse calls fails with
    /// [`ResultCode::Busy`]. Calls issued after close has started fail with
    /// [`ResultCode::Communication`].
    ///
    /// `timeout` bounds the wait for calls ahead on this session and the time spent waiting for
    /// the peer. Time spent in reverse handlers does not count.
    #[instrument(level = "debug", skip(self, params), fields(id = self.0.id))]
    pub fn invoke_with_timeout(
        &self,
        command_id: u32,
        params: &mut Params,
        timeout: Timeout,
    ) -> Result<()> {
        let inner = &self.0;
        if Active::contains(inner.id) {
            return Err(Error::new(ResultCode::Busy, Origin::Api));
        }

        let limit = inner.context.settings().max_block_size;
        let (block, staged) = Block::stage(command_id, params, limit)
            .map_err(|code| Error::new(code, Origin::Api))?;

        let reply = {
            let _in_flight = inner.begin()?;
            inner.forward(Entry::Invoke, block, timeout)?
        };
        reply.collect(&staged, params)
    }

    /// Closes the session.
    ///
    /// Calls already in flight run to completion first; closing again is a no-op. Closing from
    /// inside one of the session's own reverse calls fails with [`ResultCode::BadState`].
    #[instrument(level = "debug", skip(self), fields(id = self.0.id))]
    pub fn close(&self) -> Result<()> {
        let inner = &self.0;
        if Active::contains(inner.id) {
            return Err(Error::new(ResultCode::BadState, Origin::Api));
        }

        let mut lifecycle = inner.lifecycle();
        match lifecycle.state {
            State::Closed => return Ok(()),
            State::Closing => {
                while lifecycle.state != State::Closed {
                    lifecycle = inner
                        .idle
                        .wait(lifecycle)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                return Ok(());
            }
            State::Open => lifecycle.state = State::Closing,
        }

        while lifecycle.in_flight > 0 {
            lifecycle = inner
                .idle
                .wait(lifecycle)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(lifecycle);

        lock(&inner.link).close();

        inner.lifecycle().state = State::Closed;
        inner.idle.notify_all();
        info!("session closed");
        Ok(())
    }
}
