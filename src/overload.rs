// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Overload governor (C8): a cheap, synchronous check consulted once per
//! inbound message, before it reaches the RPC engine's dispatch. Combines a
//! task-count monitor (too many in-flight server-side sessions) and a
//! message-age monitor (the message sat in the transport queue too long to
//! still be worth processing). See §4.8 of `SPEC_FULL.md`.

use std::cell::Cell;

use crate::errors::RpcError;

bitflags::bitflags! {
    /// Which overload conditions applied to a given inbound message. Empty
    /// means "process normally".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OverloadMask: u8 {
        /// Too many concurrently in-flight server-side sessions.
        const TASK_OVERLOAD = 0b01;
        /// The message's time in the transport queue exceeded the
        /// configured staleness threshold.
        const MESSAGE_EXPIRED = 0b10;
    }
}

impl OverloadMask {
    /// The `RpcError` code to report back to the caller for a rejected
    /// message; task overload takes priority when both apply, matching the
    /// order the checks are made in.
    pub fn error_code(self) -> i32 {
        if self.contains(OverloadMask::TASK_OVERLOAD) {
            RpcError::SystemOverload.as_code()
        } else {
            RpcError::MessageExpired.as_code()
        }
    }
}

/// Threshold-based governor; held by the main loop (C9) and queried once
/// per inbound message before it is handed to the RPC engine.
pub struct OverloadGovernor {
    max_task_num: u64,
    max_message_age_ms: i64,
    rejected_task: Cell<u64>,
    rejected_expired: Cell<u64>,
}

impl OverloadGovernor {
    pub fn new(max_task_num: u64, max_message_age_ms: i64) -> Self {
        OverloadGovernor {
            max_task_num,
            max_message_age_ms,
            rejected_task: Cell::new(0),
            rejected_expired: Cell::new(0),
        }
    }

    /// `current_task_num` is the RPC engine's in-flight server-side session
    /// count; `message_age_ms` is `now_ms - msg_arrived_ms` from the
    /// transport's `ExternInfo`.
    pub fn check(&self, current_task_num: u64, message_age_ms: i64) -> OverloadMask {
        let mut mask = OverloadMask::empty();
        if self.max_task_num > 0 && current_task_num >= self.max_task_num {
            mask |= OverloadMask::TASK_OVERLOAD;
            self.rejected_task.set(self.rejected_task.get() + 1);
        }
        if self.max_message_age_ms > 0 && message_age_ms > self.max_message_age_ms {
            mask |= OverloadMask::MESSAGE_EXPIRED;
            self.rejected_expired.set(self.rejected_expired.get() + 1);
        }
        mask
    }

    pub fn rejected_task_count(&self) -> u64 {
        self.rejected_task.get()
    }

    pub fn rejected_expired_count(&self) -> u64 {
        self.rejected_expired.get()
    }
}
