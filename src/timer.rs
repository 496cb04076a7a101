// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Sequence timer (C1): ordered timeout queues keyed by timeout-duration.
//!
//! Timers of identical duration are extremely common in this framework (RPC
//! session timeouts, coroutine yield deadlines, broadcast relay retries), so
//! entries are bucketed by their `timeout_ms` rather than kept in a heap:
//! each bucket is an insertion-ordered FIFO queue, so the head of every
//! bucket is always the earliest deadline in that bucket.

use std::collections::{HashMap, VecDeque};

use crate::errors::TimerError;

/// Disposition returned by a fired timer's callback, deciding what happens
/// to the timer item next.
pub enum TimerDisposition {
    /// Remove the timer; it will not fire again.
    Remove,
    /// Re-arm in the same bucket (deadline = now + original bucket ms).
    Continue,
    /// Re-arm into a (possibly new) bucket with this timeout in ms.
    Reset(u32),
}

pub type TimeoutCallback = Box<dyn FnMut() -> TimerDisposition>;

struct TimerItem {
    id: i64,
    deadline_ms: i64,
    stopped: bool,
    cb: TimeoutCallback,
}

/// Bucketed sequence timer.
///
/// Mirrors the originating system's `SequenceTimer::Update` algorithm:
/// stop is lazy (mark-and-skip), and the outer bucket scan restarts on the
/// next `tick` call if the number of buckets changed mid-tick, to stay safe
/// against iterator invalidation from newly created buckets.
pub struct SequenceTimer {
    next_id: i64,
    buckets: HashMap<u32, VecDeque<TimerItem>>,
    index: HashMap<i64, u32>,
}

impl Default for SequenceTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceTimer {
    pub fn new() -> Self {
        SequenceTimer {
            next_id: 0,
            buckets: HashMap::new(),
            index: HashMap::new(),
        }
    }

    /// Number of timers currently tracked (including lazily-stopped ones not
    /// yet swept).
    pub fn timer_num(&self) -> usize {
        self.index.len()
    }

    pub fn start(
        &mut self,
        now_ms: i64,
        timeout_ms: u32,
        cb: TimeoutCallback,
    ) -> Result<i64, TimerError> {
        if timeout_ms == 0 {
            return Err(TimerError::InvalidParam);
        }

        let id = self.next_id;
        self.next_id += 1;

        let item = TimerItem {
            id,
            deadline_ms: now_ms + timeout_ms as i64,
            stopped: false,
            cb,
        };
        self.buckets.entry(timeout_ms).or_default().push_back(item);
        self.index.insert(id, timeout_ms);

        Ok(id)
    }

    pub fn stop(&mut self, timer_id: i64) -> Result<(), TimerError> {
        let Some(bucket_ms) = self.index.remove(&timer_id) else {
            return Err(TimerError::Unexisted);
        };
        if let Some(queue) = self.buckets.get_mut(&bucket_ms) {
            for item in queue.iter_mut() {
                if item.id == timer_id {
                    item.stopped = true;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Advance the timer to `now_ms`, firing every due, non-stopped item.
    /// Returns the number of callbacks invoked.
    pub fn tick(&mut self, now_ms: i64) -> u32 {
        let mut fired = 0u32;
        let bucket_count_before = self.buckets.len();

        let bucket_keys: Vec<u32> = self.buckets.keys().copied().collect();
        for bucket_ms in bucket_keys {
            loop {
                let due = {
                    let queue = match self.buckets.get(&bucket_ms) {
                        Some(q) => q,
                        None => break,
                    };
                    match queue.front() {
                        None => break,
                        Some(front) if front.stopped => true,
                        Some(front) => front.deadline_ms <= now_ms,
                    }
                };
                if !due {
                    // FIFO: nothing later in this bucket has fired yet.
                    break;
                }

                let mut item = self.buckets.get_mut(&bucket_ms).unwrap().pop_front().unwrap();
                if item.stopped {
                    continue;
                }

                let disposition = (item.cb)();
                fired += 1;

                match disposition {
                    TimerDisposition::Remove => {
                        self.index.remove(&item.id);
                    }
                    TimerDisposition::Continue => {
                        item.deadline_ms = now_ms + bucket_ms as i64;
                        self.index.insert(item.id, bucket_ms);
                        self.buckets.entry(bucket_ms).or_default().push_back(item);
                    }
                    TimerDisposition::Reset(new_timeout_ms) => {
                        item.deadline_ms = now_ms + new_timeout_ms as i64;
                        self.index.insert(item.id, new_timeout_ms);
                        self.buckets
                            .entry(new_timeout_ms)
                            .or_default()
                            .push_back(item);
                    }
                }
            }

            if self.buckets.len() != bucket_count_before {
                // A reset above created a new bucket: restart the outer scan
                // on the next tick rather than risk iterating a key set that
                // no longer matches the live map.
                break;
            }
        }

        fired
    }
}
