// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use pebble_rpc::{
    errors::RpcError,
    rpc::head::{HEADER_KEY_ARRIVAL_TIMESTAMP, HEADER_KEY_SESSION_ID, RpcHead, head_decode, head_encode},
};

#[test]
fn multiple_extension_headers_round_trip_in_order() {
    let mut head = RpcHead::new_call("Pebble:ping", 7);
    head.headers.push((HEADER_KEY_SESSION_ID, Bytes::from_static(b"abc")));
    head.headers.push((HEADER_KEY_ARRIVAL_TIMESTAMP, Bytes::from_static(b"123")));

    let encoded = head_encode(&head).unwrap();
    let (decoded, consumed) = head_decode(&encoded).unwrap();
    assert_eq!(consumed, encoded.len());
    assert_eq!(decoded.headers, head.headers);
}

#[test]
fn reserved_terminator_key_zero_is_rejected_on_encode() {
    let mut head = RpcHead::new_call("Pebble:ping", 0);
    head.headers.push((0, Bytes::new()));
    assert_eq!(head_encode(&head).unwrap_err(), RpcError::EncodeFailed);
}

#[test]
fn empty_buffer_fails_to_decode() {
    assert_eq!(head_decode(&[]).unwrap_err(), RpcError::DecodeFailed);
}
