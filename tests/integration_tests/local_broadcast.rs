// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev
//
// Seed scenario S3 (spec §8): a LOCAL-scope channel with two subscribers,
// both get the broadcast body exactly once; no relay is attempted.

use std::rc::Rc;

use pebble_rpc::{
    channel::{ChannelManager, Scope, Subscriber},
    rpc::head::RpcHead,
    transport::{MessageTransport, loopback::LoopbackTransport},
};

use crate::integration_tests::common::build_engine;

#[test]
fn local_channel_fans_out_to_every_subscriber_once() {
    let transport = Rc::new(LoopbackTransport::new());
    let engine = build_engine(&transport);
    let (a, a_peer) = transport.wire_pair();
    let (b, b_peer) = transport.wire_pair();
    let _ = (a, b); // the peers (a_peer/b_peer) are what the channel sends to

    let mut mgr = ChannelManager::new();
    mgr.open("room", Scope::Local).unwrap();
    mgr.join("room", Subscriber { handle: a_peer, session_id: None }).unwrap();
    mgr.join("room", Subscriber { handle: b_peer, session_id: None }).unwrap();

    let head = RpcHead::new_call("Chat:notify", 0);
    let delivered = mgr.send(&engine, "room", &head, b"x", true).unwrap();
    assert_eq!(delivered, 2);

    let (buf_a, _) = transport.peek(a).expect("A received the broadcast");
    assert!(!buf_a.is_empty());
    transport.pop(a);
    assert!(transport.peek(a).is_none(), "exactly once");

    let (buf_b, _) = transport.peek(b).expect("B received the broadcast");
    assert!(!buf_b.is_empty());
    transport.pop(b);
    assert!(transport.peek(b).is_none(), "exactly once");
}
