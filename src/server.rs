// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Main loop (C9): the composition root that ties the transport (C4),
//! processor registry (C6), overload governor (C8), and the RPC engines'
//! timers together into one per-tick cycle: poll, dispatch, tick timers,
//! idle. Grounded on `examples/original_source/src/server/pebble_server.h`'s
//! `PebbleServer`/`AppEventHandler` pair. See §4.9 of `SPEC_FULL.md`.

use std::{cell::RefCell, rc::Rc};

use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

use crate::{
    channel::ChannelManager,
    overload::OverloadGovernor,
    processor::ProcessorRegistry,
    transport::{MessageTransport, PollEvent},
};

/// Application hooks invoked around the main loop's lifecycle, mirroring
/// the original `AppEventHandler`'s `OnInit/OnStop/OnUpdate/OnReload/OnIdle`.
pub trait AppEventHandler {
    fn on_init(&mut self) -> Result<(), String> {
        Ok(())
    }
    fn on_stop(&mut self) {}
    /// Called once per tick after dispatch and timer processing.
    fn on_update(&mut self, _now_ms: i64, _stats: TickStats) {}
    fn on_reload(&mut self) {}
    /// Called when a tick found no work to do; implementations typically
    /// sleep briefly here.
    fn on_idle(&mut self) {}
    /// Polled once per iteration after `on_update`; returning `true` makes
    /// `run` call `request_reload` on the caller's behalf. Lets a handler
    /// surface a reload request it only learns about from application
    /// traffic (e.g. the control RPC's `reload` command) without needing a
    /// `Server` reference of its own.
    fn wants_reload(&mut self) -> bool {
        false
    }
}

/// Per-tick outcome, surfaced mainly for tests and logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickStats {
    pub dispatched: u32,
    pub timers_fired: u32,
}

/// Awaits the next signal on `sig` if the handler was installed, otherwise
/// never resolves — lets `run`'s `select!` treat a missing handler the same
/// as one that just hasn't fired yet.
async fn recv_or_pending(sig: &mut Option<tokio::signal::unix::Signal>) {
    match sig {
        Some(sig) => {
            sig.recv().await;
        }
        None => std::future::pending().await,
    }
}

pub struct Server<T: MessageTransport> {
    transport: Rc<T>,
    processors: ProcessorRegistry,
    overload: OverloadGovernor,
    channels: Option<Rc<RefCell<ChannelManager>>>,
    stop_requested: bool,
    reload_requested: bool,
}

impl<T: MessageTransport> Server<T> {
    pub fn new(transport: Rc<T>, processors: ProcessorRegistry, overload: OverloadGovernor) -> Self {
        Server { transport, processors, overload, channels: None, stop_requested: false, reload_requested: false }
    }

    /// Wire a channel manager so a transport-reported disconnect runs §4.7's
    /// `on_disconnect` (subscriber cleanup + user callback) instead of only
    /// being logged.
    pub fn set_channel_manager(&mut self, channels: Rc<RefCell<ChannelManager>>) {
        self.channels = Some(channels);
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn request_reload(&mut self) {
        self.reload_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// One iteration of the loop: poll the transport for at most one
    /// ready handle, dispatch at most one message from it, then tick every
    /// attached engine's timers. The caller (tests, or `run`) decides the
    /// tick cadence.
    pub fn tick(&mut self, now_ms: i64) -> TickStats {
        let mut stats = TickStats::default();

        if let Some((handle, event)) = self.transport.poll(0) {
            match event {
                PollEvent::Readable => {
                    if let Some((buf, info)) = self.transport.peek(handle) {
                        self.transport.pop(handle);
                        if let Some(engine) = self.processors.resolve_by_listener(handle) {
                            let age_ms = now_ms - info.msg_arrived_ms;
                            let mask = self.overload.check(engine.task_num(), age_ms);
                            match engine.on_message(now_ms, handle, &buf, &info, mask) {
                                Ok(()) => stats.dispatched += 1,
                                Err(e) => warn!(?e, handle, "dispatch failed"),
                            }
                        } else {
                            warn!(handle, "no processor attached to listener");
                        }
                    }
                }
                PollEvent::Disconnected => {
                    info!(handle, "transport disconnected");
                    if let Some(channels) = &self.channels {
                        let removed = channels.borrow_mut().on_disconnect(handle);
                        if removed > 0 {
                            debug!(handle, removed, "dropped subscriptions on disconnect");
                        }
                    }
                }
            }
        }

        for engine in self.processors.engines() {
            stats.timers_fired += engine.tick(now_ms);
        }

        stats
    }

    /// Drain every currently-ready message (bounded by `max_messages`),
    /// used by tests that want deterministic synchronous delivery instead
    /// of ticking once per message.
    pub fn drain(&mut self, now_ms: i64, max_messages: u32) -> TickStats {
        let mut total = TickStats::default();
        for _ in 0..max_messages {
            let s = self.tick(now_ms);
            if s.dispatched == 0 {
                break;
            }
            total.dispatched += s.dispatched;
            total.timers_fired += s.timers_fired;
        }
        total
    }

    pub fn processors_mut(&mut self) -> &mut ProcessorRegistry {
        &mut self.processors
    }

    /// Run `handler`'s lifecycle around a caller-supplied tick source;
    /// exits once `request_stop` has been observed. Intended for the
    /// binary entry point; tests drive `tick`/`drain` directly instead.
    ///
    /// SIGUSR1 sets the stop flag, SIGUSR2 sets the reload flag — both are
    /// checked at the top of the next iteration, matching
    /// `signal_running_process`'s sending side in `cfg::cli`. A process
    /// that can't install the handlers (e.g. a non-main thread) falls back
    /// to running without signal support rather than failing the loop.
    pub async fn run(&mut self, handler: &mut dyn AppEventHandler, mut clock_ms: impl FnMut() -> i64) {
        if let Err(e) = handler.on_init() {
            error!(error = %e, "on_init failed");
            return;
        }

        let mut sigstop = signal(SignalKind::user_defined1())
            .inspect_err(|e| warn!(error = %e, "failed to install SIGUSR1 handler"))
            .ok();
        let mut sigreload = signal(SignalKind::user_defined2())
            .inspect_err(|e| warn!(error = %e, "failed to install SIGUSR2 handler"))
            .ok();

        loop {
            if self.stop_requested {
                break;
            }
            if self.reload_requested {
                self.reload_requested = false;
                handler.on_reload();
            }

            let now = clock_ms();
            let stats = self.tick(now);
            handler.on_update(now, stats);

            if handler.wants_reload() {
                self.request_reload();
            }

            if stats.dispatched == 0 && stats.timers_fired == 0 {
                handler.on_idle();
            }

            tokio::select! {
                biased;
                _ = recv_or_pending(&mut sigstop) => {
                    info!("received SIGUSR1, requesting stop");
                    self.request_stop();
                }
                _ = recv_or_pending(&mut sigreload) => {
                    info!("received SIGUSR2, requesting reload");
                    self.request_reload();
                }
                _ = tokio::task::yield_now() => {}
            }
        }

        handler.on_stop();
    }
}
