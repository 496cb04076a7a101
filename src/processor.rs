// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Processor registry (C6): routes an inbound message's listener handle (or,
//! failing that, its function-name router prefix) to the [`RpcEngine`]
//! responsible for it. A single process can host several independently
//! configured engines — e.g. one per bound address — and the main loop (C9)
//! needs to know which one owns a given `peek`ed message before handing it
//! to C5/C8. See §4.6 of `SPEC_FULL.md`.

use std::{collections::HashMap, rc::Rc};

use crate::{errors::RpcError, rpc::RpcEngine, transport::Handle};

pub struct ProcessorRegistry {
    by_listener: HashMap<Handle, Rc<RpcEngine>>,
    by_router: HashMap<String, Rc<RpcEngine>>,
    default: Option<Rc<RpcEngine>>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        ProcessorRegistry { by_listener: HashMap::new(), by_router: HashMap::new(), default: None }
    }

    /// Route every message arriving on `listener` to `engine`.
    pub fn attach(&mut self, listener: Handle, engine: Rc<RpcEngine>) {
        self.by_listener.insert(listener, engine);
    }

    /// Route every function name starting with `prefix` (e.g. `"Echo:"`) to
    /// `engine`, independent of which listener it arrived on. Consulted
    /// only when the listener isn't directly attached.
    pub fn attach_router(&mut self, prefix: impl Into<String>, engine: Rc<RpcEngine>) {
        self.by_router.insert(prefix.into(), engine);
    }

    pub fn set_default(&mut self, engine: Rc<RpcEngine>) {
        self.default = Some(engine);
    }

    pub fn resolve_by_listener(&self, listener: Handle) -> Option<Rc<RpcEngine>> {
        self.by_listener.get(&listener).cloned().or_else(|| self.default.clone())
    }

    pub fn resolve_by_function_name(&self, function_name: &str) -> Result<Rc<RpcEngine>, RpcError> {
        for (prefix, engine) in &self.by_router {
            if function_name.starts_with(prefix.as_str()) {
                return Ok(engine.clone());
            }
        }
        self.default.clone().ok_or(RpcError::UnsupportFunction)
    }

    /// Every distinct engine attached to this registry, deduplicated by
    /// identity; used by the main loop to tick each engine's timers once
    /// per cycle regardless of how many listeners/routers point at it.
    pub fn engines(&self) -> Vec<Rc<RpcEngine>> {
        let mut seen: Vec<Rc<RpcEngine>> = Vec::new();
        let mut push_unique = |e: &Rc<RpcEngine>| {
            if !seen.iter().any(|s| Rc::ptr_eq(s, e)) {
                seen.push(e.clone());
            }
        };
        for e in self.by_listener.values() {
            push_unique(e);
        }
        for e in self.by_router.values() {
            push_unique(e);
        }
        if let Some(e) = &self.default {
            push_unique(e);
        }
        seen
    }
}
