// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Channel / broadcast manager (C7): named groups of subscribers that a
//! oneway message can be fanned out to in one call. Local subscribers are
//! delivered to directly; `Scope::Global` channels additionally relay to
//! peer processes over previously-established [`RelayConnection`]s, with
//! reconciliation when the subscriber set changes. Grounded on
//! `examples/original_source/src/framework/broadcast_mgr.h`'s `BroadcastMgr`
//! (`OnChannelChanged`/relay connection map) and
//! `examples/original_source/source/app/broadcast_mgr.cpp`'s
//! `PebbleChannelMgrServiceHandler` (`OnDisconnect`/`OnRelay`). See §4.7 of
//! `SPEC_FULL.md`.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use tracing::warn;

use crate::{
    errors::ChannelError,
    rpc::{RpcEngine, head::RpcHead},
    transport::{Handle, MessageTransport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Subscribers on this process only; never relayed.
    Local,
    /// Subscribers on this process plus whatever peer processes are
    /// reachable through the channel's relay set, kept in sync by
    /// [`ChannelManager::on_channel_changed`] or manually via
    /// [`ChannelManager::set_relay`].
    Global,
}

/// One connected subscriber: its transport handle, and the session id that
/// disambiguates it if `handle` is ever reused (e.g. by the transport's own
/// handle pool) before the old connection is reaped. Joins are de-duplicated
/// on the `(handle, session_id)` pair, not on `handle` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscriber {
    pub handle: Handle,
    pub session_id: Option<i64>,
}

/// A peer process relayed to for a `Global`-scope channel, identified by its
/// connect url.
#[derive(Debug, Clone)]
pub struct RelayConnection {
    pub peer_server_addr: String,
    pub handle: Handle,
}

struct Channel {
    scope: Scope,
    subscribers: HashSet<Subscriber>,
}

/// Invoked once per handle when the transport reports a disconnect, after
/// its subscriptions have already been removed.
pub type DisconnectCallback = Box<dyn FnMut(Handle)>;

pub struct ChannelManager {
    channels: HashMap<String, Channel>,
    relays: HashMap<String, Vec<RelayConnection>>,
    on_disconnect: Option<DisconnectCallback>,
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelManager {
    pub fn new() -> Self {
        ChannelManager { channels: HashMap::new(), relays: HashMap::new(), on_disconnect: None }
    }

    pub fn open(&mut self, name: impl Into<String>, scope: Scope) -> Result<(), ChannelError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ChannelError::InvalidParam);
        }
        self.channels.entry(name).or_insert_with(|| Channel { scope, subscribers: HashSet::new() });
        Ok(())
    }

    pub fn close(&mut self, name: &str) -> Result<(), ChannelError> {
        self.channels.remove(name).ok_or_else(|| ChannelError::NotExist(name.to_string()))?;
        self.relays.remove(name);
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn join(&mut self, name: &str, subscriber: Subscriber) -> Result<(), ChannelError> {
        let channel = self.channels.get_mut(name).ok_or_else(|| ChannelError::NotExist(name.to_string()))?;
        channel.subscribers.insert(subscriber);
        Ok(())
    }

    pub fn quit(&mut self, name: &str, subscriber: Subscriber) -> Result<(), ChannelError> {
        let channel = self.channels.get_mut(name).ok_or_else(|| ChannelError::NotExist(name.to_string()))?;
        if channel.subscribers.remove(&subscriber) {
            Ok(())
        } else {
            Err(ChannelError::NotSubscribed(name.to_string()))
        }
    }

    /// Remove every subscriber bound to `handle`, from every channel,
    /// regardless of its remembered session id. The caller (typically
    /// `on_disconnect`) only knows that the handle itself is gone.
    pub fn quit_all(&mut self, handle: Handle) -> usize {
        let mut removed = 0;
        for channel in self.channels.values_mut() {
            let before = channel.subscribers.len();
            channel.subscribers.retain(|s| s.handle != handle);
            removed += before - channel.subscribers.len();
        }
        removed
    }

    /// Install the callback `on_disconnect` notifies after cleanup.
    pub fn set_disconnect_callback(&mut self, cb: DisconnectCallback) {
        self.on_disconnect = Some(cb);
    }

    /// §4.7 "Disconnect": remove `handle` from every channel's subscriber
    /// set, then notify the user event callback if one is set. Returns the
    /// number of subscriptions removed.
    pub fn on_disconnect(&mut self, handle: Handle) -> usize {
        let removed = self.quit_all(handle);
        if let Some(cb) = self.on_disconnect.as_mut() {
            cb(handle);
        }
        removed
    }

    /// §4.7 "Session relay": the transport reset a subscriber's handle
    /// during reconnection (`old_handle` -> `new_handle`). Replaces the
    /// handle atomically in every channel the subscriber is in, but only
    /// for entries whose remembered session id matches `session_id` —
    /// otherwise the update is skipped and logged. Returns the number of
    /// subscriptions updated.
    pub fn on_relay(&mut self, old_handle: Handle, new_handle: Handle, session_id: Option<i64>) -> usize {
        let mut updated = 0;
        for (name, channel) in self.channels.iter_mut() {
            let matching: Vec<Subscriber> =
                channel.subscribers.iter().copied().filter(|s| s.handle == old_handle).collect();
            for sub in matching {
                if sub.session_id != session_id {
                    warn!(
                        channel = %name,
                        old_handle,
                        new_handle,
                        remembered = ?sub.session_id,
                        relayed = ?session_id,
                        "relay session id mismatch, skipping subscriber update"
                    );
                    continue;
                }
                channel.subscribers.remove(&sub);
                channel.subscribers.insert(Subscriber { handle: new_handle, session_id: sub.session_id });
                updated += 1;
            }
        }
        updated
    }

    pub fn subscribers(&self, name: &str) -> Option<Vec<Subscriber>> {
        self.channels.get(name).map(|c| c.subscribers.iter().copied().collect())
    }

    /// Wire (or replace, keyed by `peer_server_addr`) one relay connection
    /// used to reach another process's subscribers of `name`. Only
    /// meaningful for `Scope::Global` channels. For naming-service-driven
    /// membership, prefer [`Self::on_channel_changed`], which reconciles the
    /// whole relay set instead of one connection at a time.
    pub fn set_relay(&mut self, name: impl Into<String>, relay: RelayConnection) {
        let list = self.relays.entry(name.into()).or_default();
        if let Some(existing) = list.iter_mut().find(|r| r.peer_server_addr == relay.peer_server_addr) {
            *existing = relay;
        } else {
            list.push(relay);
        }
    }

    /// Drop every relay connection wired for `name`.
    pub fn clear_relay(&mut self, name: &str) {
        self.relays.remove(name);
    }

    /// §4.7 "Relay reconciliation": given the latest peer url list for
    /// `name` (as delivered by a naming-service watch firing
    /// `on_channel_changed`), connect every url in `urls` not already
    /// relayed to, and close+evict every previously relayed url missing
    /// from `urls`. Idempotent: calling this twice with the same `urls`
    /// does nothing the second time. Identity is the url string.
    pub fn on_channel_changed(
        &mut self,
        transport: &dyn MessageTransport,
        name: &str,
        urls: &[String],
    ) -> Result<(), ChannelError> {
        if !self.channels.contains_key(name) {
            return Err(ChannelError::NotExist(name.to_string()));
        }

        let new_set: HashSet<&str> = urls.iter().map(String::as_str).collect();
        let current = self.relays.entry(name.to_string()).or_default();
        let old_set: HashSet<String> = current.iter().map(|r| r.peer_server_addr.clone()).collect();

        current.retain(|r| {
            let keep = new_set.contains(r.peer_server_addr.as_str());
            if !keep {
                transport.close(r.handle);
            }
            keep
        });

        for url in urls {
            if old_set.contains(url) {
                continue;
            }
            let handle = transport
                .connect(url)
                .map_err(|_| ChannelError::RelayConnectFailed(url.clone()))?;
            current.push(RelayConnection { peer_server_addr: url.clone(), handle });
        }

        Ok(())
    }

    /// Fan out a oneway message to every local subscriber of `name`, then,
    /// if `relay` is set and the channel is `Global`, relay once to every
    /// wired peer connection. A relay receiver must forward with
    /// `relay=false` so relaying never recurses. Per-subscriber send
    /// failures are swallowed (a dead subscriber is reaped on its own
    /// disconnect event, not here) but counted in the returned delivery
    /// count.
    pub fn send(
        &self,
        engine: &RpcEngine,
        name: &str,
        rpc_head: &RpcHead,
        buf: &[u8],
        relay: bool,
    ) -> Result<usize, ChannelError> {
        let channel = self.channels.get(name).ok_or_else(|| ChannelError::NotExist(name.to_string()))?;
        let mut delivered = 0usize;

        for sub in &channel.subscribers {
            let mut head = rpc_head.clone();
            head.message_type = crate::rpc::head::MessageType::Oneway;
            if engine.send_request(0, sub.handle, head, buf, None, 0).is_ok() {
                delivered += 1;
            }
        }

        if relay && channel.scope == Scope::Global {
            if let Some(peers) = self.relays.get(name) {
                for peer in peers {
                    let mut head = rpc_head.clone();
                    head.message_type = crate::rpc::head::MessageType::Oneway;
                    if engine.send_request(0, peer.handle, head, buf, None, 0).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }

        Ok(delivered)
    }

    /// Convenience for callers that already have an encoded body as
    /// `Bytes` rather than a borrowed slice.
    pub fn send_bytes(
        &self,
        engine: &RpcEngine,
        name: &str,
        rpc_head: &RpcHead,
        buf: Bytes,
        relay: bool,
    ) -> Result<usize, ChannelError> {
        self.send(engine, name, rpc_head, &buf, relay)
    }
}
