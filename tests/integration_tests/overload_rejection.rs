// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev
//
// Seed scenario S6 (spec §8): with task_threshold=1 and one in-flight
// handler stuck, a second CALL is rejected with SYSTEM_OVERLOAD before it
// ever reaches the handler, and the in-flight task count is unchanged.

use std::{cell::RefCell, rc::Rc};

use bytes::Bytes;
use pebble_rpc::{
    errors::RpcError,
    overload::OverloadGovernor,
    rpc::{ResponseSender, head::{MessageType, RpcHead, exception_decode, head_decode}},
    transport::{MessageTransport, loopback::LoopbackTransport},
};

use crate::integration_tests::common::{build_engine, deliver};

#[tokio::test]
async fn second_call_rejected_while_first_is_stuck() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let transport = Rc::new(LoopbackTransport::new());
            let server = build_engine(&transport);
            let governor = OverloadGovernor::new(1, 0);

            // "Stuck": the sender is stashed rather than responded to, so the
            // session (and its task-count contribution) never clears.
            let stuck: Rc<RefCell<Option<ResponseSender>>> = Rc::new(RefCell::new(None));
            let stuck2 = stuck.clone();
            let invocations = Rc::new(RefCell::new(0u32));
            let invocations2 = invocations.clone();
            server
                .add_request_function(
                    "Work:do",
                    Rc::new(move |_body: Bytes, sender: ResponseSender| {
                        let stuck = stuck2.clone();
                        let invocations = invocations2.clone();
                        Box::pin(async move {
                            *invocations.borrow_mut() += 1;
                            *stuck.borrow_mut() = Some(sender);
                        })
                    }),
                )
                .unwrap();

            let (first_client, first_server) = transport.wire_pair();
            let (second_client, second_server) = transport.wire_pair();

            send_call(&transport, first_client, "Work:do");
            deliver(&server, &transport, first_server, 0, &governor).unwrap().unwrap();
            tokio::task::yield_now().await;
            assert_eq!(server.task_num(), 1);
            assert_eq!(*invocations.borrow(), 1);

            send_call(&transport, second_client, "Work:do");
            deliver(&server, &transport, second_server, 0, &governor).unwrap().unwrap();
            tokio::task::yield_now().await;

            assert_eq!(*invocations.borrow(), 1, "the handler must not run a second time");
            assert_eq!(server.task_num(), 1, "task count unchanged by the rejection");

            let (reply_buf, _) = transport.peek(second_client).expect("rejection reply sent");
            let (reply_head, len) = head_decode(&reply_buf).unwrap();
            assert_eq!(reply_head.message_type, MessageType::Exception);
            let exc = exception_decode(&reply_buf[len..]).unwrap();
            assert_eq!(exc.error_code, RpcError::SystemOverload.as_code());
        })
        .await;
}

fn send_call(transport: &LoopbackTransport, handle: pebble_rpc::transport::Handle, function: &str) {
    use pebble_rpc::rpc::head::head_encode;
    let head = RpcHead::new_call(function, 0);
    let encoded = head_encode(&head).unwrap();
    transport.send(handle, &encoded).unwrap();
}
