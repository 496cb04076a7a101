// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{cell::RefCell, rc::Rc};

use pebble_rpc::{
    coroutine::CoroutineScheduler,
    errors::RpcError,
    overload::{OverloadGovernor, OverloadMask},
    rpc::RpcEngine,
    timer::SequenceTimer,
    transport::{Handle, MessageTransport, loopback::LoopbackTransport},
};

/// A bare engine over a shared transport, with no processor registry or
/// main loop attached — scenario tests drive delivery by hand (`deliver`)
/// so the same shared `LoopbackTransport` can host two independent engines
/// (client and server) without `Server::tick`'s single-owner poll queue
/// routing messages to the wrong one.
pub fn build_engine(transport: &Rc<LoopbackTransport>) -> Rc<RpcEngine> {
    let dyn_transport: Rc<dyn MessageTransport> = transport.clone();
    let timer = Rc::new(RefCell::new(SequenceTimer::new()));
    Rc::new(RpcEngine::new(dyn_transport, timer, CoroutineScheduler::new()))
}

/// Peek-pop-dispatch one message waiting on `handle`, consulting `governor`
/// for the overload mask the way the main loop (C9) does. No-op if nothing
/// is queued on `handle`.
pub fn deliver(
    engine: &RpcEngine,
    transport: &LoopbackTransport,
    handle: Handle,
    now_ms: i64,
    governor: &OverloadGovernor,
) -> Option<Result<(), RpcError>> {
    let (buf, info) = transport.peek(handle)?;
    transport.pop(handle);
    let mask = governor.check(engine.task_num(), now_ms - info.msg_arrived_ms);
    Some(engine.on_message(now_ms, handle, &buf, &info, mask))
}

/// Like `deliver`, but with no overload governor consulted (§8 scenarios
/// that aren't about flow control).
pub fn deliver_unchecked(engine: &RpcEngine, transport: &LoopbackTransport, handle: Handle, now_ms: i64) -> Option<Result<(), RpcError>> {
    let (buf, info) = transport.peek(handle)?;
    transport.pop(handle);
    Some(engine.on_message(now_ms, handle, &buf, &info, OverloadMask::empty()))
}
