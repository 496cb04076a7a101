// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev
//
// Seed scenario S7 (spec §8): a server-side handler issues its own outbound
// CALL to a second engine, awaits the reply via `RpcEngine::call`, and only
// then replies to the original caller. Exactly one REPLY reaches the
// original client, and the inner (handler-to-backend) session is cleaned up
// once the inner call completes.

use std::{cell::Cell, rc::Rc};

use bytes::Bytes;
use pebble_rpc::{
    rpc::{OnRpcResponse, RpcEngine, head::RpcHead},
    transport::loopback::LoopbackTransport,
};

use crate::integration_tests::common::{build_engine, deliver_unchecked};

#[tokio::test]
async fn handler_completes_inner_call_before_replying() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let transport = Rc::new(LoopbackTransport::new());
            let client = build_engine(&transport); // the original external caller
            let frontend = build_engine(&transport); // owns Frontend:relay, calls into backend
            let backend = build_engine(&transport); // frontend's handler calls into this

            backend
                .add_request_function(
                    "Backend:double",
                    Rc::new(|body: Bytes, sender| {
                        Box::pin(async move {
                            let n: i64 = String::from_utf8_lossy(&body).parse().unwrap_or(0);
                            sender.respond(0, (n * 2).to_string().as_bytes());
                        }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()>>>
                    }),
                )
                .unwrap();

            let (frontend_to_backend, backend_from_frontend) = transport.wire_pair();
            let frontend_clone = frontend.clone();
            frontend
                .add_request_function("Frontend:relay", {
                    let backend_handle = frontend_to_backend;
                    Rc::new(move |body: Bytes, sender| {
                        let engine: Rc<RpcEngine> = frontend_clone.clone();
                        Box::pin(async move {
                            let reply = engine
                                .call(0, backend_handle, RpcHead::new_call("Backend:double", 0), &body, 1_000)
                                .await;
                            match reply {
                                Ok(inner_body) => sender.respond(0, &inner_body),
                                Err(code) => sender.respond(code, b""),
                            }
                        })
                    })
                })
                .unwrap();

            let (outer_client, outer_server) = transport.wire_pair();
            let got: Rc<Cell<Option<(i32, Vec<u8>)>>> = Rc::new(Cell::new(None));
            let got2 = got.clone();
            let on_response: OnRpcResponse = Box::new(move |ret, body| {
                got2.set(Some((ret, body.to_vec())));
            });
            client
                .send_request(0, outer_client, RpcHead::new_call("Frontend:relay", 0), b"21", Some(on_response), 2_000)
                .unwrap();

            // Drive the outer CALL into the handler, which immediately fires
            // its own outbound CALL to `backend` over `frontend_to_backend`.
            deliver_unchecked(&frontend, &transport, outer_server, 0).unwrap().unwrap();
            tokio::task::yield_now().await;

            // Deliver the inner CALL to backend, then its REPLY back to the
            // frontend's handler, letting the handler's `.await` resume.
            deliver_unchecked(&backend, &transport, backend_from_frontend, 0).unwrap().unwrap();
            tokio::task::yield_now().await;
            deliver_unchecked(&frontend, &transport, frontend_to_backend, 0).unwrap().unwrap();
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;

            assert_eq!(frontend.session_num(), 0, "inner session cleaned up once the inner call completes");

            // Finally deliver the outer REPLY to the original client.
            deliver_unchecked(&client, &transport, outer_client, 0).unwrap().unwrap();

            let (ret, body) = got.take().expect("exactly one REPLY reached the original client");
            assert_eq!(ret, 0);
            assert_eq!(body, b"42");
        })
        .await;
}
