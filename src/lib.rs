// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A single-threaded, coroutine-scheduled RPC framework core: sequence
//! timer, coroutine scheduler, session manager, message transport facade,
//! RPC engine, processor registry, channel/broadcast manager, overload
//! governor, and the main loop that ties them together.

pub mod cfg;
pub mod channel;
pub mod control;
pub mod coroutine;
pub mod errors;
pub mod overload;
pub mod processor;
pub mod rpc;
pub mod server;
pub mod session;
pub mod timer;
pub mod transport;
