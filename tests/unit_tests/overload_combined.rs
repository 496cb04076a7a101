// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev
//
// Task overload takes priority over message-age overload when both
// thresholds are crossed by the same inbound message.

use pebble_rpc::{errors::RpcError, overload::{OverloadGovernor, OverloadMask}};

#[test]
fn task_overload_takes_priority_over_message_expiry() {
    let gov = OverloadGovernor::new(1, 100);
    let mask = gov.check(1, 500);
    assert!(mask.contains(OverloadMask::TASK_OVERLOAD));
    assert!(mask.contains(OverloadMask::MESSAGE_EXPIRED));
    assert_eq!(mask.error_code(), RpcError::SystemOverload.as_code());
}

#[test]
fn message_expiry_alone_reports_message_expired() {
    let gov = OverloadGovernor::new(100, 100);
    let mask = gov.check(0, 500);
    assert!(!mask.contains(OverloadMask::TASK_OVERLOAD));
    assert_eq!(mask.error_code(), RpcError::MessageExpired.as_code());
}

#[test]
fn rejection_counters_accumulate_independently() {
    let gov = OverloadGovernor::new(1, 1);
    gov.check(1, 0);
    gov.check(1, 0);
    gov.check(0, 5);
    assert_eq!(gov.rejected_task_count(), 2);
    assert_eq!(gov.rejected_expired_count(), 1);
}
