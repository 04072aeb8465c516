//! Broker message envelopes and their private wire format.
//!
//! ```text
//! Message          ResponseMessage
//! ┌──────────┐     ┌──────────┐
//! │ id       │     │ id       │  ◀── copied from the request (refer_to)
//! │ sequence │     │ sequence │  ◀──┘
//! │ payload  │     │ result   │
//! └──────────┘     │ error    │  {"reason": "..."}
//!                  │ payload  │
//!                  └──────────┘
//! ```
//!
//! Both envelopes serialize with postcard: varint integers and
//! varint-length-prefixed byte strings.  Payloads are JSON documents;
//! an empty payload stands for JSON `null`.

pub mod codec;
pub mod stream_buffer;

use core::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Result;

pub use stream_buffer::StreamBuffer;

/// Semantic request / notification type.
pub type MessageId = u32;

/// JSON key of the error reason inside a response's error text.
pub const ERROR_REASON_KEY: &str = "reason";

// ---------------------------------------------------------------------------
// Identifier hashing
// ---------------------------------------------------------------------------

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a hash, usable in `const` tables.
pub const fn fnv1a(text: &str) -> u32 {
    let bytes = text.as_bytes();
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash = (hash ^ bytes[i] as u32).wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Message id of the service reachable at `address` under `topic`.
pub const fn create_identifier(address: &str, topic: &str) -> MessageId {
    fnv1a(address)
        .wrapping_mul(FNV_PRIME)
        .wrapping_add(fnv1a(topic))
}

// ---------------------------------------------------------------------------
// Result codes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResultCode {
    #[default]
    Success,
    InvalidPayload,
    UnsupportedRequest,
    InvalidMessage,
    Error,
}

impl ResultCode {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::InvalidPayload => "InvalidPayload",
            Self::UnsupportedRequest => "UnsupportedRequest",
            Self::InvalidMessage => "InvalidMessage",
            Self::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Request or notification envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Set by the sending broker on every send/notify.
    pub sequence: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(id: MessageId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Message carrying `parameters` as JSON (`null` stays empty).
    pub fn with_json(id: MessageId, parameters: &Value) -> Self {
        Self {
            id,
            sequence: 0,
            payload: json_bytes(parameters),
        }
    }

    pub fn payload_json(&self) -> Result<Value> {
        parse_json(&self.payload)
    }

    pub fn serialize(&self, out: &mut StreamBuffer) -> Result<()> {
        encode(self, out)
    }

    pub fn deserialize(input: &mut StreamBuffer) -> Result<Self> {
        decode(input)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[id={:#010x} seq={} payload={}B]",
            self.id,
            self.sequence,
            self.payload.len()
        )
    }
}

// ---------------------------------------------------------------------------
// ResponseMessage
// ---------------------------------------------------------------------------

/// Exactly one per request, correlated by `id` + `sequence`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub id: MessageId,
    pub sequence: u32,
    pub result: ResultCode,
    pub error: Vec<u8>,
    pub payload: Vec<u8>,
}

impl ResponseMessage {
    /// Copy the correlation header of `message`.
    pub fn refer_to(&mut self, message: &Message) {
        self.id = message.id;
        self.sequence = message.sequence;
    }

    pub fn is_success(&self) -> bool {
        self.result == ResultCode::Success
    }

    /// Store `reason` as `{"reason": reason}`.
    pub fn set_error_reason(&mut self, reason: &str) {
        self.error = json_bytes(&json!({ ERROR_REASON_KEY: reason }));
    }

    /// Reason text of a failed response, if present and well-formed.
    pub fn error_reason(&self) -> Option<String> {
        let value = parse_json(&self.error).ok()?;
        value
            .get(ERROR_REASON_KEY)
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    pub fn payload_json(&self) -> Result<Value> {
        parse_json(&self.payload)
    }

    pub fn serialize(&self, out: &mut StreamBuffer) -> Result<()> {
        encode(self, out)
    }

    pub fn deserialize(input: &mut StreamBuffer) -> Result<Self> {
        decode(input)
    }
}

impl fmt::Display for ResponseMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[id={:#010x} seq={} result={}]",
            self.id,
            self.sequence,
            self.result.name()
        )
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Successful response to `message` with an optional JSON payload.
pub fn create_response(message: &Message, payload: &Value) -> ResponseMessage {
    let mut response = ResponseMessage {
        result: ResultCode::Success,
        payload: json_bytes(payload),
        ..ResponseMessage::default()
    };
    response.refer_to(message);
    response
}

/// Failed response to `message`, carrying `reason` as error text.
pub fn create_error_response_with_reason(
    message: &Message,
    result: ResultCode,
    reason: &str,
) -> ResponseMessage {
    let mut response = ResponseMessage {
        result,
        ..ResponseMessage::default()
    };
    response.refer_to(message);
    response.set_error_reason(reason);
    response
}

/// Failed response to `message`; the reason is the result code name.
pub fn create_error_response(message: &Message, result: ResultCode) -> ResponseMessage {
    create_error_response_with_reason(message, result, result.name())
}

// ── Internal ──────────────────────────────────────────────────

fn json_bytes(value: &Value) -> Vec<u8> {
    if value.is_null() {
        Vec::new()
    } else {
        value.to_string().into_bytes()
    }
}

fn parse_json(bytes: &[u8]) -> Result<Value> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(bytes)?)
}

fn encode<T: Serialize>(value: &T, out: &mut StreamBuffer) -> Result<()> {
    let bytes = postcard::to_allocvec(value)?;
    out.write_bytes(&bytes);
    Ok(())
}

fn decode<T: DeserializeOwned>(input: &mut StreamBuffer) -> Result<T> {
    let (value, used) = {
        let unread = input.unread();
        let (value, rest) = postcard::take_from_bytes::<T>(unread)?;
        (value, unread.len() - rest.len())
    };
    input.consume(used);
    Ok(value)
}
