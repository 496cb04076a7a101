// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Session manager (C3): correlates outstanding asynchronous operations to
//! their completion callbacks with timeouts.
//!
//! This is the generic building block; the RPC engine (C5) keeps its own
//! specialised session table but follows the identical discipline: `add` on
//! dispatch/send, `remove` on completion, and an `on_timeout` disposition
//! shaped exactly like the sequence timer's (remove / continue / reset).

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
};

use crate::{
    errors::SessionError,
    timer::{SequenceTimer, TimerDisposition},
};

/// Disposition returned by [`SessionHandler::on_timeout`].
pub enum SessionDisposition {
    /// The session is removed.
    Remove,
    /// The session is kept, re-armed with its original timeout.
    Continue,
    /// The session is kept, re-armed with a new timeout in ms.
    Reset(u32),
}

pub trait SessionHandler {
    fn on_timeout(&mut self, session_id: i64) -> SessionDisposition;
}

struct Entry<H> {
    handler: H,
    timer_id: i64,
    timeout_ms: u32,
}

struct Inner<H> {
    sessions: HashMap<i64, Entry<H>>,
}

/// Generic session table keyed by an externally-assigned `session_id`.
///
/// Single-threaded by design (§5 of `SPEC_FULL.md`): the manager and its
/// backing timer are only ever touched from the main loop's thread, so
/// interior mutability is via `Rc<RefCell<_>>` rather than atomics/locks.
pub struct SessionManager<H: SessionHandler + 'static> {
    timer: Rc<RefCell<SequenceTimer>>,
    inner: Rc<RefCell<Inner<H>>>,
}

impl<H: SessionHandler + 'static> Default for SessionManager<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: SessionHandler + 'static> SessionManager<H> {
    pub fn new() -> Self {
        SessionManager {
            timer: Rc::new(RefCell::new(SequenceTimer::new())),
            inner: Rc::new(RefCell::new(Inner {
                sessions: HashMap::new(),
            })),
        }
    }

    pub fn session_num(&self) -> usize {
        self.inner.borrow().sessions.len()
    }

    pub fn add(
        &self,
        now_ms: i64,
        session_id: i64,
        handler: H,
        timeout_ms: u32,
    ) -> Result<(), SessionError> {
        if timeout_ms == 0 {
            return Err(SessionError::InvalidParam);
        }
        if self.inner.borrow().sessions.contains_key(&session_id) {
            return Err(SessionError::AlreadyExisted);
        }

        let inner = self.inner.clone();
        let cb_session_id = session_id;
        let timer_id = self
            .timer
            .borrow_mut()
            .start(
                now_ms,
                timeout_ms,
                Box::new(move || fire_timeout(&inner, cb_session_id)),
            )
            .map_err(|_| SessionError::StartTimerFailed)?;

        self.inner.borrow_mut().sessions.insert(
            session_id,
            Entry {
                handler,
                timer_id,
                timeout_ms,
            },
        );
        Ok(())
    }

    pub fn remove(&self, session_id: i64) -> Result<H, SessionError> {
        let entry = self
            .inner
            .borrow_mut()
            .sessions
            .remove(&session_id)
            .ok_or(SessionError::Unexisted)?;
        let _ = self.timer.borrow_mut().stop(entry.timer_id);
        Ok(entry.handler)
    }

    pub fn with_handler<R>(
        &self,
        session_id: i64,
        f: impl FnOnce(&mut H) -> R,
    ) -> Result<R, SessionError> {
        let mut inner = self.inner.borrow_mut();
        let entry = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::Unexisted)?;
        Ok(f(&mut entry.handler))
    }

    pub fn restart_timer(
        &self,
        now_ms: i64,
        session_id: i64,
        new_timeout_ms: u32,
    ) -> Result<(), SessionError> {
        let (old_timer_id, timeout_ms) = {
            let inner = self.inner.borrow();
            let entry = inner.sessions.get(&session_id).ok_or(SessionError::Unexisted)?;
            let timeout_ms = if new_timeout_ms > 0 { new_timeout_ms } else { entry.timeout_ms };
            (entry.timer_id, timeout_ms)
        };
        let _ = self.timer.borrow_mut().stop(old_timer_id);

        let inner = self.inner.clone();
        let timer_id = self
            .timer
            .borrow_mut()
            .start(now_ms, timeout_ms, Box::new(move || fire_timeout(&inner, session_id)))
            .map_err(|_| SessionError::StartTimerFailed)?;

        let mut inner = self.inner.borrow_mut();
        if let Some(entry) = inner.sessions.get_mut(&session_id) {
            entry.timer_id = timer_id;
            entry.timeout_ms = timeout_ms;
        }
        Ok(())
    }

    /// Drive the backing timer; returns the number of sessions that timed
    /// out this tick.
    pub fn tick(&self, now_ms: i64) -> u32 {
        self.timer.borrow_mut().tick(now_ms)
    }
}

/// Shared by the initial `start` and by `restart_timer`'s re-arm: looks the
/// session back up by id, invokes its handler, and applies the disposition
/// to both the session table and (by return value) the backing timer.
fn fire_timeout<H: SessionHandler>(
    inner: &Rc<RefCell<Inner<H>>>,
    session_id: i64,
) -> TimerDisposition {
    let disposition = {
        let mut inner_mut = inner.borrow_mut();
        match inner_mut.sessions.get_mut(&session_id) {
            Some(entry) => entry.handler.on_timeout(session_id),
            None => return TimerDisposition::Remove,
        }
    };

    match disposition {
        SessionDisposition::Remove => {
            inner.borrow_mut().sessions.remove(&session_id);
            TimerDisposition::Remove
        }
        SessionDisposition::Continue => TimerDisposition::Continue,
        SessionDisposition::Reset(ms) => {
            if let Some(entry) = inner.borrow_mut().sessions.get_mut(&session_id) {
                entry.timeout_ms = ms;
            }
            TimerDisposition::Reset(ms)
        }
    }
}
