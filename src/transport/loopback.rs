// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! In-process loopback transport driver: the one concrete [`MessageTransport`]
//! shipped with this crate, sufficient to exercise the seed scenarios (§8)
//! and integration tests without a real socket.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
};

use bytes::Bytes;

use super::{ExternInfo, Handle, MessageTransport, PollEvent};
use crate::errors::TransportError;

const MAX_QUEUE_LEN: usize = 1024;

struct Queue {
    messages: VecDeque<(Bytes, ExternInfo)>,
}

pub struct LoopbackTransport {
    next_handle: RefCell<Handle>,
    bound: RefCell<HashMap<String, Handle>>,
    peer_of: RefCell<HashMap<Handle, Handle>>,
    queues: RefCell<HashMap<Handle, Queue>>,
    ready: RefCell<VecDeque<(Handle, PollEvent)>>,
    ready_set: RefCell<HashSet<Handle>>,
    closed: RefCell<HashSet<Handle>>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        LoopbackTransport {
            next_handle: RefCell::new(1),
            bound: RefCell::new(HashMap::new()),
            peer_of: RefCell::new(HashMap::new()),
            queues: RefCell::new(HashMap::new()),
            ready: RefCell::new(VecDeque::new()),
            ready_set: RefCell::new(HashSet::new()),
            closed: RefCell::new(HashSet::new()),
        }
    }

    fn alloc_handle(&self) -> Handle {
        let mut n = self.next_handle.borrow_mut();
        let h = *n;
        *n += 1;
        h
    }

    /// Test/demo convenience: wire two handles directly as mutual peers,
    /// bypassing the bind/connect/url dance that a real driver would need
    /// to discover a remote endpoint (out of scope per §1 non-goals).
    pub fn wire_pair(&self) -> (Handle, Handle) {
        let a = self.alloc_handle();
        let b = self.alloc_handle();
        self.peer_of.borrow_mut().insert(a, b);
        self.peer_of.borrow_mut().insert(b, a);
        self.queues.borrow_mut().insert(a, Queue { messages: VecDeque::new() });
        self.queues.borrow_mut().insert(b, Queue { messages: VecDeque::new() });
        (a, b)
    }

    fn mark_ready(&self, handle: Handle) {
        if self.ready_set.borrow_mut().insert(handle) {
            self.ready.borrow_mut().push_back((handle, PollEvent::Readable));
        }
    }
}

impl MessageTransport for LoopbackTransport {
    fn bind(&self, url: &str) -> Result<Handle, TransportError> {
        if let Some(h) = self.bound.borrow().get(url) {
            return Ok(*h);
        }
        let h = self.alloc_handle();
        self.bound.borrow_mut().insert(url.to_string(), h);
        self.queues.borrow_mut().insert(h, Queue { messages: VecDeque::new() });
        Ok(h)
    }

    fn connect(&self, url: &str) -> Result<Handle, TransportError> {
        let listener = *self
            .bound
            .borrow()
            .get(url)
            .ok_or_else(|| TransportError::InvalidUrl(url.to_string()))?;

        let client = self.alloc_handle();
        let server_side = self.alloc_handle();
        self.peer_of.borrow_mut().insert(client, server_side);
        self.peer_of.borrow_mut().insert(server_side, client);
        self.queues.borrow_mut().insert(client, Queue { messages: VecDeque::new() });
        self.queues.borrow_mut().insert(server_side, Queue { messages: VecDeque::new() });

        // Surface the new server-side connection as a readable listener
        // event; the caller discovers `server_side` via `peek`/`pop` on the
        // listener handle carrying it in `ExternInfo::remote_handle`.
        let info = ExternInfo {
            self_handle: listener,
            remote_handle: server_side,
            msg_arrived_ms: 0,
        };
        self.queues
            .borrow_mut()
            .get_mut(&listener)
            .expect("listener queue exists")
            .messages
            .push_back((Bytes::new(), info));
        self.mark_ready(listener);

        Ok(client)
    }

    fn send(&self, handle: Handle, buf: &[u8]) -> Result<(), TransportError> {
        let peer = *self
            .peer_of
            .borrow()
            .get(&handle)
            .ok_or(TransportError::HandleNotFound)?;
        if self.closed.borrow().contains(&peer) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut queues = self.queues.borrow_mut();
        let q = queues.get_mut(&peer).ok_or(TransportError::HandleNotFound)?;
        if q.messages.len() >= MAX_QUEUE_LEN {
            return Err(TransportError::SendBuffNotEnough);
        }
        let info = ExternInfo {
            self_handle: peer,
            remote_handle: handle,
            msg_arrived_ms: 0,
        };
        q.messages.push_back((Bytes::copy_from_slice(buf), info));
        drop(queues);
        self.mark_ready(peer);
        Ok(())
    }

    fn peek(&self, handle: Handle) -> Option<(Bytes, ExternInfo)> {
        self.queues.borrow().get(&handle).and_then(|q| q.messages.front().cloned())
    }

    fn pop(&self, handle: Handle) {
        let mut queues = self.queues.borrow_mut();
        if let Some(q) = queues.get_mut(&handle) {
            q.messages.pop_front();
            if q.messages.is_empty() {
                self.ready_set.borrow_mut().remove(&handle);
            }
        }
    }

    fn poll(&self, _timeout_ms: i64) -> Option<(Handle, PollEvent)> {
        let next = self.ready.borrow_mut().pop_front()?;
        // Only report readiness while the queue still has something; a
        // Disconnected event is one-shot and always reported once.
        if next.1 == PollEvent::Readable {
            let still_has_data = self
                .queues
                .borrow()
                .get(&next.0)
                .is_some_and(|q| !q.messages.is_empty());
            if !still_has_data {
                self.ready_set.borrow_mut().remove(&next.0);
                return self.poll(0);
            }
        }
        Some(next)
    }

    fn close(&self, handle: Handle) {
        self.closed.borrow_mut().insert(handle);
        if let Some(peer) = self.peer_of.borrow().get(&handle).copied() {
            self.ready.borrow_mut().push_back((peer, PollEvent::Disconnected));
        }
        self.queues.borrow_mut().remove(&handle);
        self.peer_of.borrow_mut().remove(&handle);
    }

    fn used_size(&self, handle: Handle) -> Option<(usize, usize)> {
        self.queues
            .borrow()
            .get(&handle)
            .map(|q| (MAX_QUEUE_LEN - q.messages.len(), MAX_QUEUE_LEN))
    }
}
