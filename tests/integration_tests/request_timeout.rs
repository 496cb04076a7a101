// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev
//
// Seed scenario S2 (spec §8): the server-side handler never gets to respond
// within the client's requested timeout. The client's `on_response` fires
// exactly once with the request-timeout code, and a REPLY that arrives
// after that point is dropped rather than invoking the callback again
// (covered more directly by `late_reply_dropped.rs`, S5).

use std::{cell::Cell, rc::Rc};

use pebble_rpc::{
    errors::RpcError,
    rpc::{OnRpcResponse, head::RpcHead},
    transport::loopback::LoopbackTransport,
};

use crate::integration_tests::common::build_engine;

#[test]
fn client_call_times_out_when_no_reply_arrives() {
    let transport = Rc::new(LoopbackTransport::new());
    let client = build_engine(&transport);
    let (client_h, _server_h) = transport.wire_pair();

    let got: Rc<Cell<Option<(i32, Vec<u8>)>>> = Rc::new(Cell::new(None));
    let got2 = got.clone();
    let on_response: OnRpcResponse = Box::new(move |ret, body| {
        got2.set(Some((ret, body.to_vec())));
    });

    // 500ms client-side timeout; the handler on the other end is never
    // invoked (no delivery to server_h at all) to stand in for "still
    // processing past the deadline".
    client
        .send_request(0, client_h, RpcHead::new_call("Slow:go", 0), b"req", Some(on_response), 500)
        .unwrap();
    assert_eq!(client.session_num(), 1);

    assert_eq!(client.tick(499), 0, "must not fire before the deadline");
    assert_eq!(client.tick(500), 1, "fires exactly at the deadline");

    let (ret, _) = got.take().expect("on_response invoked on timeout");
    assert_eq!(ret, RpcError::RequestTimeout.as_code());
    assert_eq!(client.session_num(), 0, "timed-out session is cleaned up");

    // A second tick must not fire it again.
    assert_eq!(client.tick(10_000), 0);
}
