// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Coroutine scheduler (C2): spawns, resumes, yields, and reaps
//! cooperatively-scheduled tasks, integrating with the sequence timer (C1)
//! for timed yields.
//!
//! The originating system stack-switches via `ucontext`; per the design
//! note in `SPEC_FULL.md` §9 this port instead represents a "coroutine" as
//! a `tokio::task` spawned onto a single-threaded `LocalSet`, cooperating
//! through a per-task carry channel. `yield`/`resume` preserve the same
//! single-runner invariant: only one task is ever `Running`, suspension is
//! explicit, and resumption happens only via a matching `resume` or a C1
//! timer firing the timeout sentinel.

use std::{
    cell::RefCell,
    collections::HashMap,
    future::Future,
    rc::Rc,
};

use tokio::sync::mpsc;

use crate::{
    errors::CoroutineError,
    timer::{SequenceTimer, TimerDisposition},
};

/// Sentinel carry value delivered to a yielding task when its timeout fires
/// rather than an explicit `resume`.
pub const TIMEOUT_CARRY: i64 = i64::MIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Ready,
    Running,
    Suspended,
    Dead,
}

struct TaskState {
    status: TaskStatus,
    resume_tx: mpsc::UnboundedSender<i64>,
}

struct Inner {
    tasks: HashMap<u64, TaskState>,
    next_id: u64,
    current: Option<u64>,
}

/// Handle to the scheduler; cheap to clone (reference-counted), intended to
/// be held by the main loop / server composition root and handed to every
/// spawned task's body.
#[derive(Clone)]
pub struct CoroutineScheduler {
    inner: Rc<RefCell<Inner>>,
}

impl Default for CoroutineScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CoroutineScheduler {
    pub fn new() -> Self {
        CoroutineScheduler {
            inner: Rc::new(RefCell::new(Inner {
                tasks: HashMap::new(),
                next_id: 0,
                current: None,
            })),
        }
    }

    pub fn task_num(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    pub fn current(&self) -> Option<u64> {
        self.inner.borrow().current
    }

    /// Spawn a new task onto the caller's `LocalSet`. The body receives a
    /// [`TaskHandle`] it uses to `yield_now`. The task starts `Ready` and is
    /// transitioned to `Running` immediately (first entry), matching
    /// `spawn`'s "start_immediately" default.
    pub fn spawn<F, Fut>(&self, body: F) -> u64
    where
        F: FnOnce(TaskHandle) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let task_id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            id
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.borrow_mut().tasks.insert(
            task_id,
            TaskState {
                status: TaskStatus::Ready,
                resume_tx: tx,
            },
        );

        let scheduler = self.clone();
        let handle = TaskHandle {
            task_id,
            rx,
            scheduler: scheduler.clone(),
        };

        tokio::task::spawn_local(async move {
            scheduler.mark_running(task_id);
            body(handle).await;
            scheduler.mark_dead(task_id);
        });

        task_id
    }

    /// Resume a `Ready` or `Suspended` task with a carry value.
    pub fn resume(&self, task_id: u64, carry: i64) -> Result<(), CoroutineError> {
        if self.inner.borrow().current == Some(task_id) {
            return Err(CoroutineError::CannotResumeInCoroutine);
        }
        let inner = self.inner.borrow();
        match inner.tasks.get(&task_id) {
            None => Err(CoroutineError::NotFound),
            Some(t) if t.status == TaskStatus::Dead => Err(CoroutineError::BadState),
            Some(t) => {
                let _ = t.resume_tx.send(carry);
                Ok(())
            }
        }
    }

    fn mark_running(&self, task_id: u64) {
        let mut inner = self.inner.borrow_mut();
        inner.current = Some(task_id);
        if let Some(t) = inner.tasks.get_mut(&task_id) {
            t.status = TaskStatus::Running;
        }
    }

    fn mark_suspended(&self, task_id: u64) {
        let mut inner = self.inner.borrow_mut();
        if inner.current == Some(task_id) {
            inner.current = None;
        }
        if let Some(t) = inner.tasks.get_mut(&task_id) {
            t.status = TaskStatus::Suspended;
        }
    }

    fn mark_dead(&self, task_id: u64) {
        let mut inner = self.inner.borrow_mut();
        if inner.current == Some(task_id) {
            inner.current = None;
        }
        inner.tasks.remove(&task_id);
    }
}

/// Owned by a running task's body; the sole way to suspend and later
/// resume.
pub struct TaskHandle {
    task_id: u64,
    rx: mpsc::UnboundedReceiver<i64>,
    scheduler: CoroutineScheduler,
}

impl TaskHandle {
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Suspend until a matching `resume(task_id, carry)` or, if
    /// `timeout_ms` is set, until the timer fires first — delivering
    /// [`TIMEOUT_CARRY`]. If the coroutine resumes before the timer fires,
    /// the timer is cancelled.
    pub async fn yield_now(
        &mut self,
        timer: &Rc<RefCell<SequenceTimer>>,
        now_ms: i64,
        timeout_ms: Option<u32>,
    ) -> i64 {
        self.scheduler.mark_suspended(self.task_id);

        let timer_id = timeout_ms.map(|ms| {
            let task_id = self.task_id;
            let scheduler = self.scheduler.clone();
            timer
                .borrow_mut()
                .start(
                    now_ms,
                    ms,
                    Box::new(move || {
                        let _ = scheduler.resume(task_id, TIMEOUT_CARRY);
                        TimerDisposition::Remove
                    }),
                )
                .expect("timeout_ms > 0 by construction")
        });

        let carry = self.rx.recv().await.unwrap_or(TIMEOUT_CARRY);

        if let Some(tid) = timer_id {
            let _ = timer.borrow_mut().stop(tid);
        }

        self.scheduler.mark_running(self.task_id);
        carry
    }
}
