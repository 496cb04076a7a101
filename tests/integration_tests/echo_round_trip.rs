// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev
//
// Seed scenario S1 (spec §8): a client CALLs a registered function over a
// connected loopback pair; the response body matches the echoed input and
// both sides end with zero outstanding sessions.

use std::{cell::Cell, pin::Pin, rc::Rc};

use bytes::Bytes;
use pebble_rpc::{
    rpc::{OnRpcResponse, head::RpcHead},
    transport::loopback::LoopbackTransport,
};

use crate::integration_tests::common::{build_engine, deliver_unchecked};

#[tokio::test]
async fn echo_round_trip_clears_sessions() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let transport = Rc::new(LoopbackTransport::new());
            let server = build_engine(&transport);
            let client = build_engine(&transport);
            let (client_h, server_h) = transport.wire_pair();

            server
                .add_request_function(
                    "Echo:echo",
                    Rc::new(|body: Bytes, sender| -> Pin<Box<dyn std::future::Future<Output = ()>>> {
                        Box::pin(async move {
                            sender.respond(0, &body);
                        })
                    }),
                )
                .unwrap();

            let got: Rc<Cell<Option<(i32, Vec<u8>)>>> = Rc::new(Cell::new(None));
            let got2 = got.clone();
            let on_response: OnRpcResponse = Box::new(move |ret, body| {
                got2.set(Some((ret, body.to_vec())));
            });

            client
                .send_request(0, client_h, RpcHead::new_call("Echo:echo", 0), b"hi", Some(on_response), 1_000)
                .unwrap();

            deliver_unchecked(&server, &transport, server_h, 0).unwrap().unwrap();
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;

            deliver_unchecked(&client, &transport, client_h, 0).unwrap().unwrap();

            let (ret, body) = got.take().expect("response delivered");
            assert_eq!(ret, 0);
            assert_eq!(body, b"hi");
            assert_eq!(server.session_num(), 0);
            assert_eq!(client.session_num(), 0);
        })
        .await;
}
