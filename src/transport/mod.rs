// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Message transport facade (C4): an abstract bind/connect/send/recv/poll
//! surface over pluggable drivers. The core consumes only this trait; real
//! TCP/HTTP/UDP/pipe/bus drivers are out of scope (§1 non-goals) — the one
//! concrete driver shipped here, [`loopback::LoopbackTransport`], exists
//! only to drive the seed scenarios and tests end-to-end without a socket.

pub mod loopback;

use bytes::Bytes;

use crate::errors::TransportError;

/// Opaque integer identifying a transport endpoint, either a listener or an
/// established peer.
pub type Handle = i64;

/// Metadata carried alongside a peeked message.
#[derive(Debug, Clone, Copy)]
pub struct ExternInfo {
    pub self_handle: Handle,
    pub remote_handle: Handle,
    pub msg_arrived_ms: i64,
}

/// Result of `poll`: the next ready handle and what happened to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// The handle has at least one message ready for `peek`.
    Readable,
    /// The handle's peer disconnected; `quit_all`/cleanup should run.
    Disconnected,
}

/// Abstract process-wide transport surface, §4.4 of `SPEC_FULL.md`.
///
/// The core never parses URLs beyond the scheme prefix; scheme dispatch and
/// any name-registration side effects belong to the driver.
pub trait MessageTransport {
    /// Server listen on `scheme://host[:port][/path]`.
    fn bind(&self, url: &str) -> Result<Handle, TransportError>;

    /// Client open; the handle is opaque but stable until `close`.
    fn connect(&self, url: &str) -> Result<Handle, TransportError>;

    /// Atomic message (not stream) send.
    fn send(&self, handle: Handle, buf: &[u8]) -> Result<(), TransportError>;

    /// Gather-send; semantics identical to `send`.
    fn send_v(&self, handle: Handle, frags: &[&[u8]]) -> Result<(), TransportError> {
        let mut joined = Vec::new();
        for f in frags {
            joined.extend_from_slice(f);
        }
        self.send(handle, &joined)
    }

    /// Inspect head-of-queue without consuming.
    fn peek(&self, handle: Handle) -> Option<(Bytes, ExternInfo)>;

    /// Release head-of-queue.
    fn pop(&self, handle: Handle);

    /// Level-triggered wait; returns the next ready handle, or `None` if
    /// `timeout_ms` elapses with nothing ready. `timeout_ms == 0` must not
    /// block.
    fn poll(&self, timeout_ms: i64) -> Option<(Handle, PollEvent)>;

    /// Tear down a handle.
    fn close(&self, handle: Handle);

    /// For flow control and diagnostics: `(remain, max)`.
    fn used_size(&self, handle: Handle) -> Option<(usize, usize)>;
}
