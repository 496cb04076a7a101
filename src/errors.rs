// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Stable, numeric-coded error enumerations for every core component.
//!
//! Each component owns a disjoint negative range so that an application
//! error code returned through [`crate::rpc::head::RpcException`] can never
//! collide with a framework one (see the error-range design note in
//! `SPEC_FULL.md` §9/§7).

/// Base of the timer (C1) error range.
pub const TIMER_ERROR_BASE: i32 = -1_000;
/// Base of the session manager (C3) error range.
pub const SESSION_ERROR_BASE: i32 = -2_000;
/// Base of the transport facade (C4) error range.
pub const TRANSPORT_ERROR_BASE: i32 = -3_000;
/// Base of the RPC engine (C5) error range.
pub const RPC_ERROR_BASE: i32 = -4_000;
/// Base of the channel/broadcast manager (C7) error range.
pub const CHANNEL_ERROR_BASE: i32 = -5_000;
/// Base of the coroutine scheduler (C2) error range.
pub const COROUTINE_ERROR_BASE: i32 = -6_000;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    #[error("invalid timer parameter")]
    InvalidParam,
    #[error("timer id not found")]
    Unexisted,
}

impl TimerError {
    pub fn as_code(self) -> i32 {
        match self {
            TimerError::InvalidParam => TIMER_ERROR_BASE - 1,
            TimerError::Unexisted => TIMER_ERROR_BASE - 2,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid session parameter")]
    InvalidParam,
    #[error("session already exists")]
    AlreadyExisted,
    #[error("session id not found")]
    Unexisted,
    #[error("failed to start backing timer")]
    StartTimerFailed,
}

impl SessionError {
    pub fn as_code(self) -> i32 {
        match self {
            SessionError::InvalidParam => SESSION_ERROR_BASE - 1,
            SessionError::AlreadyExisted => SESSION_ERROR_BASE - 2,
            SessionError::Unexisted => SESSION_ERROR_BASE - 3,
            SessionError::StartTimerFailed => SESSION_ERROR_BASE - 4,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("handle not found")]
    HandleNotFound,
    #[error("send buffer not enough")]
    SendBuffNotEnough,
    #[error("connection closed")]
    ConnectionClosed,
}

impl TransportError {
    pub fn as_code(&self) -> i32 {
        match self {
            TransportError::InvalidUrl(_) => TRANSPORT_ERROR_BASE - 1,
            TransportError::HandleNotFound => TRANSPORT_ERROR_BASE - 2,
            TransportError::SendBuffNotEnough => TRANSPORT_ERROR_BASE - 3,
            TransportError::ConnectionClosed => TRANSPORT_ERROR_BASE - 4,
        }
    }
}

/// RPC-level error kinds, §7 of `SPEC_FULL.md`.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcError {
    #[error("invalid parameter")]
    InvalidParam,
    #[error("header decode failed")]
    DecodeFailed,
    #[error("header encode failed")]
    EncodeFailed,
    #[error("send failed")]
    SendFailed,
    #[error("session not found")]
    SessionNotFound,
    #[error("request timed out")]
    RequestTimeout,
    #[error("server-side processing timed out")]
    ProcessTimeout,
    #[error("unsupported function name")]
    UnsupportFunction,
    #[error("function name already registered")]
    FunctionNameExisted,
    #[error("function name not registered")]
    FunctionNameUnexisted,
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("unknown message type")]
    UnknownType,
    #[error("system overloaded")]
    SystemOverload,
    #[error("message expired before dispatch")]
    MessageExpired,
    #[error("broadcast failed")]
    BroadcastFailed,
    #[error("received an exception-typed message that failed to decode")]
    RecvExceptionMsg,
}

impl RpcError {
    pub fn as_code(self) -> i32 {
        use RpcError::*;
        RPC_ERROR_BASE
            - match self {
                InvalidParam => 1,
                DecodeFailed => 2,
                EncodeFailed => 3,
                SendFailed => 4,
                SessionNotFound => 5,
                RequestTimeout => 6,
                ProcessTimeout => 7,
                UnsupportFunction => 8,
                FunctionNameExisted => 9,
                FunctionNameUnexisted => 10,
                UnsupportedVersion => 11,
                UnknownType => 12,
                SystemOverload => 13,
                MessageExpired => 14,
                BroadcastFailed => 15,
                RecvExceptionMsg => 16,
            }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("invalid channel parameter")]
    InvalidParam,
    #[error("channel {0} does not exist")]
    NotExist(String),
    #[error("subscriber is not subscribed to channel {0}")]
    NotSubscribed(String),
    #[error("failed to connect relay {0}")]
    RelayConnectFailed(String),
}

impl ChannelError {
    pub fn as_code(&self) -> i32 {
        match self {
            ChannelError::InvalidParam => CHANNEL_ERROR_BASE - 1,
            ChannelError::NotExist(_) => CHANNEL_ERROR_BASE - 2,
            ChannelError::NotSubscribed(_) => CHANNEL_ERROR_BASE - 3,
            ChannelError::RelayConnectFailed(_) => CHANNEL_ERROR_BASE - 4,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineError {
    #[error("task not found")]
    NotFound,
    #[error("task is not in a resumable state")]
    BadState,
    #[error("resume attempted from outside the single-runner thread")]
    NotMain,
    #[error("cannot resume a coroutine from within itself")]
    CannotResumeInCoroutine,
}

impl CoroutineError {
    pub fn as_code(self) -> i32 {
        match self {
            CoroutineError::NotFound => COROUTINE_ERROR_BASE - 1,
            CoroutineError::BadState => COROUTINE_ERROR_BASE - 2,
            CoroutineError::NotMain => COROUTINE_ERROR_BASE - 3,
            CoroutineError::CannotResumeInCoroutine => COROUTINE_ERROR_BASE - 4,
        }
    }
}
