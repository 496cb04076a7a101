// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! RPC engine (C5): header codec, request dispatch, response correlation,
//! oneway, broadcast send, per-call timeout, error propagation. The single
//! largest component (30% share, §2) — see §4.5 of `SPEC_FULL.md`.

pub mod head;

use std::{cell::RefCell, collections::HashMap, future::Future, pin::Pin, rc::Rc};

use bytes::Bytes;
use tracing::{debug, warn};

use self::head::{
    HEADER_KEY_ARRIVAL_TIMESTAMP, MessageType, RpcException, RpcHead, exception_decode,
    exception_encode, head_decode, head_encode,
};
use crate::{
    coroutine::CoroutineScheduler,
    errors::RpcError,
    overload::OverloadMask,
    timer::{SequenceTimer, TimerDisposition},
    transport::{ExternInfo, Handle, MessageTransport},
};

/// Default server-side processing timeout, §4.5.
pub const DEFAULT_PROCESS_TIMEOUT_MS: u32 = 60_000;
/// Default client-side request timeout when the caller passes `<= 0`.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u32 = 10_000;

/// Invoked once with `(ret_code, body)` when a client-side CALL completes,
/// fails, or times out.
pub type OnRpcResponse = Box<dyn FnMut(i32, Bytes)>;

/// A server-registered request handler. Receives the decoded body and a
/// [`ResponseSender`] bound to the originating session; `Oneway` calls are
/// invoked with a sender whose `respond` is a no-op.
pub type RequestHandler = Rc<dyn Fn(Bytes, ResponseSender) -> Pin<Box<dyn Future<Output = ()>>>>;

/// Fan-out sink for `broadcast_request`, wired to the channel manager (C7)
/// by the composition root.
pub type BroadcastSink = Rc<dyn Fn(&str, &RpcHead, &[u8]) -> Result<(), RpcError>>;

/// Bound to one dispatched server-side session; completes it at most once
/// (§8 invariant 2) — a second `respond` call, or one after the process
/// timeout already fired, is a silent no-op because the session is gone.
#[derive(Clone)]
pub struct ResponseSender {
    engine: RpcEngineHandle,
    session_id: u64,
    oneway: bool,
}

impl ResponseSender {
    pub fn respond(&self, ret: i32, buf: &[u8]) {
        if self.oneway {
            return;
        }
        if let Err(e) = self.engine.send_response(self.session_id, ret, buf) {
            debug!(session_id = self.session_id, ?e, "send_response failed");
        }
    }
}

struct ClientSession {
    #[allow(dead_code)]
    handle: Handle,
    #[allow(dead_code)]
    rpc_head: RpcHead,
    #[allow(dead_code)]
    start_time_ms: i64,
    timer_id: i64,
    on_response: OnRpcResponse,
}

struct ServerSession {
    handle: Handle,
    rpc_head: RpcHead,
    start_time_ms: i64,
    timer_id: i64,
}

enum Session {
    Client(ClientSession),
    Server(ServerSession),
}

struct Inner {
    service_map: HashMap<String, RequestHandler>,
    sessions: HashMap<u64, Session>,
    next_session_id: u64,
    task_num: u64,
    completed_requests: u64,
}

/// A cheap-to-clone handle to the engine: everything a timer callback or a
/// [`ResponseSender`] needs to complete a session without borrowing the
/// whole [`RpcEngine`].
#[derive(Clone)]
pub struct RpcEngineHandle {
    inner: Rc<RefCell<Inner>>,
    timer: Rc<RefCell<SequenceTimer>>,
    transport: Rc<dyn MessageTransport>,
    broadcast: Rc<RefCell<Option<BroadcastSink>>>,
}

impl RpcEngineHandle {
    fn mark_completed(&self) {
        self.inner.borrow_mut().completed_requests += 1;
    }

    fn send_message(&self, handle: Handle, rpc_head: &RpcHead, buf: &[u8]) -> Result<(), RpcError> {
        let head_bytes = head_encode(rpc_head).map_err(|_| RpcError::EncodeFailed)?;
        self.transport
            .send_v(handle, &[&head_bytes, buf])
            .map_err(|_| RpcError::SendFailed)
    }

    /// `send_response`, §4.5. Completes a server-side session at most once.
    pub fn send_response(&self, session_id: u64, ret: i32, buf: &[u8]) -> Result<(), RpcError> {
        let session = self.inner.borrow_mut().sessions.remove(&session_id);
        let Some(Session::Server(session)) = session else {
            return Err(RpcError::SessionNotFound);
        };
        let _ = self.timer.borrow_mut().stop(session.timer_id);
        self.inner.borrow_mut().task_num -= 1;
        self.mark_completed();

        let mut reply_head = session.rpc_head;
        if ret == 0 {
            reply_head.message_type = MessageType::Reply;
            self.send_message(session.handle, &reply_head, buf)
        } else {
            reply_head.message_type = MessageType::Exception;
            let exc = RpcException { error_code: ret, message: String::from_utf8_lossy(buf).into_owned() };
            self.send_message(session.handle, &reply_head, &exception_encode(&exc))
        }
    }

    fn on_server_timeout(&self, session_id: u64) {
        let session = self.inner.borrow_mut().sessions.remove(&session_id);
        if let Some(Session::Server(session)) = session {
            self.inner.borrow_mut().task_num -= 1;
            self.mark_completed();
            let exc = RpcException { error_code: RpcError::ProcessTimeout.as_code(), message: "process timeout".into() };
            let mut reply_head = session.rpc_head.clone();
            reply_head.message_type = MessageType::Exception;
            let _ = self.send_message(session.handle, &reply_head, &exception_encode(&exc));
            debug!(session_id, function = %session.rpc_head.function_name, start = session.start_time_ms, "server-side process timeout");
        }
    }

    fn on_client_timeout(&self, session_id: u64) {
        let session = self.inner.borrow_mut().sessions.remove(&session_id);
        if let Some(Session::Client(mut session)) = session {
            (session.on_response)(RpcError::RequestTimeout.as_code(), Bytes::new());
        }
    }
}

/// Owns the engine state, the transport it sends through, and the
/// coroutine scheduler used to dispatch request handlers.
pub struct RpcEngine {
    handle: RpcEngineHandle,
    scheduler: CoroutineScheduler,
}

impl std::fmt::Debug for RpcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEngine").finish_non_exhaustive()
    }
}

impl RpcEngine {
    pub fn new(
        transport: Rc<dyn MessageTransport>,
        timer: Rc<RefCell<SequenceTimer>>,
        scheduler: CoroutineScheduler,
    ) -> Self {
        RpcEngine {
            handle: RpcEngineHandle {
                inner: Rc::new(RefCell::new(Inner {
                    service_map: HashMap::new(),
                    sessions: HashMap::new(),
                    next_session_id: 1,
                    task_num: 0,
                    completed_requests: 0,
                })),
                timer,
                transport,
                broadcast: Rc::new(RefCell::new(None)),
            },
            scheduler,
        }
    }

    pub fn handle(&self) -> RpcEngineHandle {
        self.handle.clone()
    }

    pub fn set_broadcast_sink(&self, sink: BroadcastSink) {
        *self.handle.broadcast.borrow_mut() = Some(sink);
    }

    pub fn task_num(&self) -> u64 {
        self.handle.inner.borrow().task_num
    }

    pub fn session_num(&self) -> usize {
        self.handle.inner.borrow().sessions.len()
    }

    /// Count of inbound messages that reached a terminal outcome —
    /// overload rejection, unsupported-function exception, oneway
    /// dispatch, or a completed CALL session — §4.5 step 2.
    pub fn completed_requests(&self) -> u64 {
        self.handle.inner.borrow().completed_requests
    }

    pub fn add_request_function(&self, name: impl Into<String>, handler: RequestHandler) -> Result<(), RpcError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RpcError::InvalidParam);
        }
        let mut inner = self.handle.inner.borrow_mut();
        if inner.service_map.contains_key(&name) {
            return Err(RpcError::FunctionNameExisted);
        }
        inner.service_map.insert(name, handler);
        Ok(())
    }

    pub fn remove_request_function(&self, name: &str) -> Result<(), RpcError> {
        let mut inner = self.handle.inner.borrow_mut();
        if inner.service_map.remove(name).is_some() {
            Ok(())
        } else {
            Err(RpcError::FunctionNameUnexisted)
        }
    }

    /// Drive the RPC engine's session timers; returns the number of
    /// sessions whose timer fired this tick.
    pub fn tick(&self, now_ms: i64) -> u32 {
        self.handle.timer.borrow_mut().tick(now_ms)
    }

    /// Entry point for an inbound message, §4.5 "Dispatch". The overload
    /// mask is computed by the caller (C8, consulted before C5 so a
    /// rejected CALL never touches the service map).
    pub fn on_message(
        &self,
        now_ms: i64,
        handle: Handle,
        buf: &[u8],
        extern_info: &ExternInfo,
        overload: OverloadMask,
    ) -> Result<(), RpcError> {
        let (rpc_head, head_len) = match head_decode(buf) {
            Ok(v) => v,
            Err(e) => {
                warn!(?e, "head_decode failed");
                return Err(e);
            }
        };
        let body = Bytes::copy_from_slice(&buf[head_len..]);

        match rpc_head.message_type {
            MessageType::Call if !overload.is_empty() => {
                let code = overload.error_code();
                let exc = RpcException { error_code: code, message: "overloaded".into() };
                let mut reply_head = rpc_head.clone();
                reply_head.message_type = MessageType::Exception;
                let _ = self.handle.send_message(handle, &reply_head, &exception_encode(&exc));
                debug!(function = %rpc_head.function_name, code, "rejected: overload");
                self.handle.mark_completed();
                Ok(())
            }
            MessageType::Call | MessageType::Oneway => {
                self.process_request(now_ms, handle, rpc_head, body, extern_info)
            }
            MessageType::Reply | MessageType::Exception => self.process_response(rpc_head, body),
        }
    }

    fn process_request(
        &self,
        now_ms: i64,
        handle: Handle,
        rpc_head: RpcHead,
        body: Bytes,
        _extern_info: &ExternInfo,
    ) -> Result<(), RpcError> {
        let oneway = matches!(rpc_head.message_type, MessageType::Oneway);

        let found = {
            let inner = self.handle.inner.borrow();
            inner.service_map.get(&rpc_head.function_name).cloned()
        };

        let Some(handler) = found else {
            if !oneway {
                let exc = RpcException {
                    error_code: RpcError::UnsupportFunction.as_code(),
                    message: format!("{} not found", rpc_head.function_name),
                };
                let mut reply_head = rpc_head.clone();
                reply_head.message_type = MessageType::Exception;
                let _ = self.handle.send_message(handle, &reply_head, &exception_encode(&exc));
            }
            self.handle.mark_completed();
            return Err(RpcError::UnsupportFunction);
        };

        if oneway {
            let sender = ResponseSender { engine: self.handle.clone(), session_id: 0, oneway: true };
            self.scheduler.spawn(move |_task| async move {
                handler(body, sender).await;
            });
            self.handle.mark_completed();
            return Ok(());
        }

        let session_id = {
            let mut inner = self.handle.inner.borrow_mut();
            let id = inner.next_session_id;
            inner.next_session_id += 1;
            id
        };

        let timer_id = self.arm_session_timer(session_id, now_ms, DEFAULT_PROCESS_TIMEOUT_MS);
        {
            let mut inner = self.handle.inner.borrow_mut();
            inner.sessions.insert(
                session_id,
                Session::Server(ServerSession { handle, rpc_head: rpc_head.clone(), start_time_ms: now_ms, timer_id }),
            );
            inner.task_num += 1;
        }

        let sender = ResponseSender { engine: self.handle.clone(), session_id, oneway: false };
        self.scheduler.spawn(move |_task| async move {
            handler(body, sender).await;
        });
        Ok(())
    }

    fn process_response(&self, rpc_head: RpcHead, body: Bytes) -> Result<(), RpcError> {
        let session = self.handle.inner.borrow_mut().sessions.remove(&rpc_head.session_id);
        let Some(Session::Client(mut session)) = session else {
            debug!(session_id = rpc_head.session_id, "late reply: session not found (already timed out or duplicate)");
            return Err(RpcError::SessionNotFound);
        };
        let _ = self.handle.timer.borrow_mut().stop(session.timer_id);

        let (ret, real_buf) = if matches!(rpc_head.message_type, MessageType::Exception) {
            match exception_decode(&body) {
                Ok(exc) => (exc.error_code, Bytes::from(exc.message.into_bytes())),
                Err(_) => (RpcError::RecvExceptionMsg.as_code(), Bytes::new()),
            }
        } else {
            (0, body)
        };

        (session.on_response)(ret, real_buf);
        Ok(())
    }

    /// `send_response`, §4.5.
    pub fn send_response(&self, session_id: u64, ret: i32, buf: &[u8]) -> Result<(), RpcError> {
        self.handle.send_response(session_id, ret, buf)
    }

    /// `send_request`, §4.5. `on_response == None` means oneway: the
    /// message is sent and no session is kept.
    pub fn send_request(
        &self,
        now_ms: i64,
        handle: Handle,
        mut rpc_head: RpcHead,
        buf: &[u8],
        on_response: Option<OnRpcResponse>,
        timeout_ms: i32,
    ) -> Result<(), RpcError> {
        let session_id = {
            let mut inner = self.handle.inner.borrow_mut();
            let id = inner.next_session_id;
            inner.next_session_id += 1;
            id
        };
        rpc_head.session_id = session_id;
        rpc_head
            .headers
            .push((HEADER_KEY_ARRIVAL_TIMESTAMP, Bytes::from(now_ms.to_le_bytes().to_vec())));

        self.handle.send_message(handle, &rpc_head, buf)?;

        let Some(on_response) = on_response else {
            return Ok(());
        };

        let timeout_ms = if timeout_ms <= 0 { DEFAULT_REQUEST_TIMEOUT_MS } else { timeout_ms as u32 };
        let timer_id = self.arm_request_timeout(session_id, now_ms, timeout_ms);

        self.handle.inner.borrow_mut().sessions.insert(
            session_id,
            Session::Client(ClientSession { handle, rpc_head, start_time_ms: now_ms, timer_id, on_response }),
        );
        Ok(())
    }

    /// `broadcast_request`, §4.5: delegates fan-out to whatever sink was
    /// registered with [`Self::set_broadcast_sink`]. No session is kept;
    /// the channel manager (C7) owns per-subscriber delivery and errors.
    pub fn broadcast_request(&self, channel: &str, rpc_head: &RpcHead, buf: &[u8]) -> Result<(), RpcError> {
        let sink = self.handle.broadcast.borrow().clone();
        match sink {
            Some(sink) => sink(channel, rpc_head, buf),
            None => Err(RpcError::BroadcastFailed),
        }
    }

    /// Ergonomic async wrapper for a handler that wants to issue its own
    /// outbound CALL and await the reply before returning (§8 S7): the
    /// await point IS the coroutine's suspension, resumed either by the
    /// matching REPLY/EXCEPTION or by the session timer firing.
    pub async fn call(
        &self,
        now_ms: i64,
        handle: Handle,
        rpc_head: RpcHead,
        buf: &[u8],
        timeout_ms: i32,
    ) -> Result<Bytes, i32> {
        let (tx, rx) = tokio::sync::oneshot::channel::<(i32, Bytes)>();
        let tx = RefCell::new(Some(tx));
        let on_response: OnRpcResponse = Box::new(move |ret, body| {
            if let Some(tx) = tx.borrow_mut().take() {
                let _ = tx.send((ret, body));
            }
        });

        if let Err(e) = self.send_request(now_ms, handle, rpc_head, buf, Some(on_response), timeout_ms) {
            return Err(e.as_code());
        }

        match rx.await {
            Ok((0, body)) => Ok(body),
            Ok((code, _)) => Err(code),
            Err(_) => Err(RpcError::SessionNotFound.as_code()),
        }
    }

    fn arm_session_timer(&self, session_id: u64, now_ms: i64, timeout_ms: u32) -> i64 {
        let engine = self.handle.clone();
        self.handle
            .timer
            .borrow_mut()
            .start(now_ms, timeout_ms, Box::new(move || {
                engine.on_server_timeout(session_id);
                TimerDisposition::Remove
            }))
            .expect("timeout_ms > 0 by construction")
    }

    fn arm_request_timeout(&self, session_id: u64, now_ms: i64, timeout_ms: u32) -> i64 {
        let engine = self.handle.clone();
        self.handle
            .timer
            .borrow_mut()
            .start(now_ms, timeout_ms, Box::new(move || {
                engine.on_client_timeout(session_id);
                TimerDisposition::Remove
            }))
            .expect("timeout_ms > 0 by construction")
    }
}
