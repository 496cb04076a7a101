// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Built-in control processor: a single RPC function,
//! `_PebbleControl.RunCommand`, that the operator CLI (`--reload`, `log`,
//! `print`) and any attached admin console talk to. Body codec is JSON —
//! the one place outside the header where this crate interprets its own
//! payload rather than treating it as opaque. Grounded loosely on the
//! `control_handler`/`RunCommand` surface described alongside
//! `PebbleServer` in `examples/original_source/src/server/pebble_server.h`.
//! See §6 of `SPEC_FULL.md`.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::{
    rpc::{RequestHandler, ResponseSender},
    server::TickStats,
};

pub const CONTROL_FUNCTION_NAME: &str = "_PebbleControl.RunCommand";
const HISTORY_CAP: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
pub struct RunCommandRequest {
    pub command: String,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunCommandResponse {
    pub ret_code: i32,
    pub data: String,
}

#[derive(Debug, Clone, Copy, Default)]
struct HistoryEntry {
    dispatched: u32,
    timers_fired: u32,
}

/// Shared state read/written by the control commands: tick history (for
/// `history`), a reload flag the main loop polls, and the current log
/// level (for `log <level>`).
pub struct ControlState {
    history: RefCell<VecDeque<HistoryEntry>>,
    reload_requested: RefCell<bool>,
    log_level: RefCell<String>,
    config_summary: RefCell<String>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlState {
    pub fn new() -> Self {
        ControlState {
            history: RefCell::new(VecDeque::new()),
            reload_requested: RefCell::new(false),
            log_level: RefCell::new("info".to_string()),
            config_summary: RefCell::new(String::new()),
        }
    }

    pub fn record_tick(&self, stats: TickStats) {
        let mut h = self.history.borrow_mut();
        if h.len() == HISTORY_CAP {
            h.pop_front();
        }
        h.push_back(HistoryEntry { dispatched: stats.dispatched, timers_fired: stats.timers_fired });
    }

    pub fn take_reload_request(&self) -> bool {
        self.reload_requested.replace(false)
    }

    pub fn set_config_summary(&self, summary: impl Into<String>) {
        *self.config_summary.borrow_mut() = summary.into();
    }

    fn run(&self, command: &str, options: &[String]) -> RunCommandResponse {
        match command {
            "help" => RunCommandResponse {
                ret_code: 0,
                data: "commands: help, history [N], reload, print status|config, log <level>".to_string(),
            },
            "history" => {
                let n: usize = options.first().and_then(|s| s.parse().ok()).unwrap_or(HISTORY_CAP);
                let h = self.history.borrow();
                let lines: Vec<String> = h
                    .iter()
                    .rev()
                    .take(n)
                    .map(|e| format!("dispatched={} timers_fired={}", e.dispatched, e.timers_fired))
                    .collect();
                RunCommandResponse { ret_code: 0, data: lines.join("\n") }
            }
            "reload" => {
                *self.reload_requested.borrow_mut() = true;
                RunCommandResponse { ret_code: 0, data: "reload scheduled".to_string() }
            }
            "print" => match options.first().map(String::as_str) {
                Some("status") => {
                    let h = self.history.borrow();
                    RunCommandResponse { ret_code: 0, data: format!("ticks recorded: {}", h.len()) }
                }
                Some("config") => RunCommandResponse { ret_code: 0, data: self.config_summary.borrow().clone() },
                _ => RunCommandResponse { ret_code: -1, data: "usage: print status|config".to_string() },
            },
            "log" => match options.first() {
                Some(level) => {
                    *self.log_level.borrow_mut() = level.clone();
                    RunCommandResponse { ret_code: 0, data: format!("log level set to {level}") }
                }
                None => RunCommandResponse { ret_code: -1, data: "usage: log <level>".to_string() },
            },
            other => RunCommandResponse { ret_code: -1, data: format!("unknown command: {other}") },
        }
    }
}

pub fn control_handler(state: Rc<ControlState>) -> RequestHandler {
    Rc::new(move |body, sender: ResponseSender| {
        let state = state.clone();
        Box::pin(async move {
            let response = match serde_json::from_slice::<RunCommandRequest>(&body) {
                Ok(req) => state.run(&req.command, &req.options),
                Err(e) => RunCommandResponse { ret_code: -1, data: format!("bad request: {e}") },
            };
            let ret = response.ret_code;
            let encoded = serde_json::to_vec(&response).unwrap_or_default();
            sender.respond(ret, &encoded);
        })
    })
}
