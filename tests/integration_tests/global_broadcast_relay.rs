// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev
//
// Seed scenario S4 (spec §8): a GLOBAL-scope channel delivers to its local
// subscriber and relays exactly once to the wired peer connection; clearing
// the relay stops the second delivery without touching local fan-out.

use std::rc::Rc;

use pebble_rpc::{
    channel::{ChannelManager, RelayConnection, Scope, Subscriber},
    rpc::head::RpcHead,
    transport::{MessageTransport, loopback::LoopbackTransport},
};

use crate::integration_tests::common::build_engine;

#[test]
fn global_channel_relays_once_to_the_wired_peer() {
    let transport = Rc::new(LoopbackTransport::new());
    let engine = build_engine(&transport);
    let (local_sub, local_peer) = transport.wire_pair();
    let (relay_sub, relay_peer) = transport.wire_pair();
    let _ = (local_sub, relay_sub);

    let mut mgr = ChannelManager::new();
    mgr.open("global-room", Scope::Global).unwrap();
    mgr.join("global-room", Subscriber { handle: local_peer, session_id: None }).unwrap();
    mgr.set_relay("global-room", RelayConnection { peer_server_addr: "loopback://peer".into(), handle: relay_peer });

    let head = RpcHead::new_call("Chat:notify", 0);
    let delivered = mgr.send(&engine, "global-room", &head, b"x", true).unwrap();
    assert_eq!(delivered, 2, "one local subscriber plus one relay send");

    assert!(transport.peek(local_sub).is_some(), "local subscriber received it");
    assert!(transport.peek(relay_sub).is_some(), "the peer server received the relayed copy");
    transport.pop(local_sub);
    transport.pop(relay_sub);

    mgr.clear_relay("global-room");
    let delivered = mgr.send(&engine, "global-room", &head, b"y", true).unwrap();
    assert_eq!(delivered, 1, "no relay wired: only the local subscriber");
    assert!(transport.peek(relay_sub).is_none(), "no second relay send after clear_relay");
}
