//
// wire_codec.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Encodes Jupyter messages as websocket frames and back.
//!
//! A message without binary attachments travels as a JSON text frame. A
//! message with attachments travels as a single binary frame:
//!
//! ```text
//! [count: u32 BE][offset_0 .. offset_{count-1}: u32 BE][JSON][buffer_1]..[buffer_{count-1}]
//! ```
//!
//! `count` includes the JSON body, which is always the first part; each
//! offset is the byte position of its part within the frame.

use bytes::{BufMut, Bytes, BytesMut};

use crate::jupyter_message::JupyterMessage;

/// A single websocket frame carrying one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Message of {0} bytes is too large to frame")]
    TooLarge(usize),
}

/// Serialize a message into a websocket frame.
pub fn serialize(msg: &JupyterMessage) -> Result<WireFrame, CodecError> {
    if msg.buffers.is_empty() {
        return Ok(WireFrame::Text(serde_json::to_string(msg)?));
    }
    let json = serde_json::to_vec(msg)?;
    Ok(WireFrame::Binary(encode_parts(&json, &msg.buffers)?))
}

/// Deserialize a websocket frame into a message.
///
/// Fails with [`CodecError::Malformed`] if the frame can't be parsed or the
/// header lacks a message ID or type.
pub fn deserialize(frame: WireFrame) -> Result<JupyterMessage, CodecError> {
    match frame {
        WireFrame::Text(text) => parse_json(text.as_bytes(), Vec::new()),
        WireFrame::Binary(data) => {
            let mut parts = decode_parts(data)?;
            let json = parts.remove(0);
            parse_json(&json, parts)
        }
    }
}

fn parse_json(json: &[u8], buffers: Vec<Bytes>) -> Result<JupyterMessage, CodecError> {
    let value: serde_json::Value = serde_json::from_slice(json)
        .map_err(|e| CodecError::Malformed(format!("invalid JSON: {}", e)))?;

    let header = value
        .get("header")
        .and_then(|h| h.as_object())
        .ok_or_else(|| CodecError::Malformed(String::from("missing header")))?;
    for (field, alias) in [("msg_id", "id"), ("msg_type", "type")] {
        let present = header
            .get(field)
            .or_else(|| header.get(alias))
            .and_then(|v| v.as_str())
            .is_some_and(|v| !v.is_empty());
        if !present {
            return Err(CodecError::Malformed(format!("header is missing '{}'", field)));
        }
    }

    let mut msg: JupyterMessage =
        serde_json::from_value(value).map_err(|e| CodecError::Malformed(e.to_string()))?;
    msg.buffers = buffers;
    Ok(msg)
}

fn encode_parts(json: &[u8], buffers: &[Bytes]) -> Result<Bytes, CodecError> {
    let count = buffers.len() + 1;
    let preamble = 4 * (count + 1);
    let total = preamble + json.len() + buffers.iter().map(Bytes::len).sum::<usize>();
    let as_u32 = |n: usize| u32::try_from(n).map_err(|_| CodecError::TooLarge(total));

    let mut out = BytesMut::with_capacity(total);
    out.put_u32(as_u32(count)?);
    let mut offset = preamble;
    out.put_u32(as_u32(offset)?);
    offset += json.len();
    for buffer in buffers {
        out.put_u32(as_u32(offset)?);
        offset += buffer.len();
    }
    out.put_slice(json);
    for buffer in buffers {
        out.put_slice(buffer);
    }
    Ok(out.freeze())
}

fn read_u32(data: &[u8], at: usize) -> Option<usize> {
    let bytes: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes) as usize)
}

fn decode_parts(data: Bytes) -> Result<Vec<Bytes>, CodecError> {
    let malformed = |why: &str| CodecError::Malformed(format!("binary frame: {}", why));

    let count = read_u32(&data, 0).ok_or_else(|| malformed("truncated part count"))?;
    if count == 0 {
        return Err(malformed("no parts"));
    }
    let preamble = count
        .checked_add(1)
        .and_then(|n| n.checked_mul(4))
        .filter(|n| *n <= data.len())
        .ok_or_else(|| malformed("truncated offset table"))?;

    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        offsets.push(read_u32(&data, 4 * (i + 1)).ok_or_else(|| malformed("bad offset"))?);
    }

    let mut parts = Vec::with_capacity(count);
    for (i, start) in offsets.iter().copied().enumerate() {
        let end = offsets.get(i + 1).copied().unwrap_or(data.len());
        if start < preamble || start > end || end > data.len() {
            return Err(malformed("offsets out of range"));
        }
        parts.push(data.slice(start..end));
    }
    Ok(parts)
}
