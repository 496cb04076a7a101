// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! RPC header codec (part of C5): a self-delimited, length-prefixed,
//! little-endian record. See §4.5 and §6 of `SPEC_FULL.md`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::RpcError;

pub const CURRENT_VERSION: u8 = 1;
pub const MAX_KNOWN_VERSION: u8 = 1;

/// Reserved extension-header keys; 0 terminates the header list.
pub const HEADER_KEY_FUNCTION_NAME: u16 = 1;
pub const HEADER_KEY_SESSION_ID: u16 = 2;
pub const HEADER_KEY_ARRIVAL_TIMESTAMP: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 0,
    Reply = 1,
    Exception = 2,
    Oneway = 3,
}

impl MessageType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MessageType::Call),
            1 => Some(MessageType::Reply),
            2 => Some(MessageType::Exception),
            3 => Some(MessageType::Oneway),
            _ => None,
        }
    }
}

/// Wire-framed RPC header, §3 of `SPEC_FULL.md`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcHead {
    pub version: u8,
    pub message_type: MessageType,
    /// Auxiliary ordered headers beyond the fixed fields below. Keys 1-3
    /// are reserved (see the `HEADER_KEY_*` constants) and should not be
    /// reused by application extensions.
    pub headers: Vec<(u16, Bytes)>,
    pub function_name: String,
    pub session_id: u64,
}

impl RpcHead {
    pub fn new_call(function_name: impl Into<String>, session_id: u64) -> Self {
        RpcHead {
            version: CURRENT_VERSION,
            message_type: MessageType::Call,
            headers: Vec::new(),
            function_name: function_name.into(),
            session_id,
        }
    }
}

/// Encode a header; returns the encoded bytes. Errors only on a
/// function_name too long to fit a `u16` length prefix.
pub fn head_encode(head: &RpcHead) -> Result<Bytes, RpcError> {
    if head.function_name.len() > u16::MAX as usize {
        return Err(RpcError::EncodeFailed);
    }

    let mut buf = BytesMut::new();
    buf.put_u8(head.version);
    buf.put_u8(head.message_type as u8);

    for (key, value) in &head.headers {
        if *key == 0 {
            return Err(RpcError::EncodeFailed);
        }
        buf.put_u16_le(*key);
        buf.put_u32_le(value.len() as u32);
        buf.put_slice(value);
    }
    buf.put_u16_le(0); // terminator

    buf.put_u16_le(head.function_name.len() as u16);
    buf.put_slice(head.function_name.as_bytes());

    buf.put_u64_le(head.session_id);

    Ok(buf.freeze())
}

/// Decode a header from the front of `buf`. Returns `(head, consumed_len)`.
pub fn head_decode(mut buf: &[u8]) -> Result<(RpcHead, usize), RpcError> {
    let total_len = buf.len();
    if buf.len() < 2 {
        return Err(RpcError::DecodeFailed);
    }
    let version = buf.get_u8();
    if version > MAX_KNOWN_VERSION {
        return Err(RpcError::UnsupportedVersion);
    }
    let raw_type = buf.get_u8();
    let message_type = MessageType::from_u8(raw_type).ok_or(RpcError::UnknownType)?;

    let mut headers = Vec::new();
    loop {
        if buf.len() < 2 {
            return Err(RpcError::DecodeFailed);
        }
        let key = buf.get_u16_le();
        if key == 0 {
            break;
        }
        if buf.len() < 4 {
            return Err(RpcError::DecodeFailed);
        }
        let len = buf.get_u32_le() as usize;
        if buf.len() < len {
            return Err(RpcError::DecodeFailed);
        }
        let value = Bytes::copy_from_slice(&buf[..len]);
        buf.advance(len);
        headers.push((key, value));
    }

    if buf.len() < 2 {
        return Err(RpcError::DecodeFailed);
    }
    let fname_len = buf.get_u16_le() as usize;
    if buf.len() < fname_len {
        return Err(RpcError::DecodeFailed);
    }
    let function_name =
        String::from_utf8(buf[..fname_len].to_vec()).map_err(|_| RpcError::DecodeFailed)?;
    buf.advance(fname_len);

    if buf.len() < 8 {
        return Err(RpcError::DecodeFailed);
    }
    let session_id = buf.get_u64_le();

    let consumed = total_len - buf.len();
    Ok((
        RpcHead {
            version,
            message_type,
            headers,
            function_name,
            session_id,
        },
        consumed,
    ))
}

/// Exception payload, §3/§6 of `SPEC_FULL.md`. Encoded with the same codec
/// as the RPC payload; here that is the crate's own compact binary form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcException {
    pub error_code: i32,
    pub message: String,
}

pub fn exception_encode(exc: &RpcException) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i32_le(exc.error_code);
    buf.put_u32_le(exc.message.len() as u32);
    buf.put_slice(exc.message.as_bytes());
    buf.freeze()
}

pub fn exception_decode(mut buf: &[u8]) -> Result<RpcException, RpcError> {
    if buf.len() < 8 {
        return Err(RpcError::DecodeFailed);
    }
    let error_code = buf.get_i32_le();
    let len = buf.get_u32_le() as usize;
    if buf.len() < len {
        return Err(RpcError::DecodeFailed);
    }
    let message = String::from_utf8(buf[..len].to_vec()).map_err(|_| RpcError::DecodeFailed)?;
    Ok(RpcException { error_code, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut head = RpcHead::new_call("Echo:echo", 42);
        head.headers.push((HEADER_KEY_ARRIVAL_TIMESTAMP, Bytes::from_static(b"123")));

        let encoded = head_encode(&head).unwrap();
        let (decoded, len) = head_decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        assert_eq!(decoded, head);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let head = RpcHead::new_call("Echo:echo", 1);
        let encoded = head_encode(&head).unwrap();
        let truncated = &encoded[..encoded.len() - 3];
        assert_eq!(head_decode(truncated).unwrap_err(), RpcError::DecodeFailed);
    }

    #[test]
    fn decode_rejects_future_version() {
        let head = RpcHead::new_call("Echo:echo", 1);
        let mut encoded = head_encode(&head).unwrap().to_vec();
        encoded[0] = MAX_KNOWN_VERSION + 1;
        assert_eq!(head_decode(&encoded).unwrap_err(), RpcError::UnsupportedVersion);
    }

    #[test]
    fn exception_round_trip() {
        let exc = RpcException { error_code: -4006, message: "timeout".to_string() };
        let encoded = exception_encode(&exc);
        assert_eq!(exception_decode(&encoded).unwrap(), exc);
    }
}
