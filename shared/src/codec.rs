//! JSON codec for the agent wire protocol
//!
//! A request is one flat JSON object written once by the controller:
//! ```text
//! {"action":"<name>","<arg>":<value>,...}
//! ```
//! after which the controller half-closes its send side. The response is one
//! JSON object and the agent closes the connection after writing it. There
//! is no length prefix or delimiter: end of stream is the only frame
//! boundary.

use bytes::{Bytes, BytesMut};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use thiserror::Error;

use crate::{ArgValue, Command};

/// Maximum message size (10 MB) to prevent memory exhaustion
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Errors that can occur during encoding or accumulation
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Argument '{key}' is not a finite number")]
    NonFiniteNumber { key: String },
}

/// Serializes a command as the flat request object, `action` first
struct WireRequest<'a>(&'a Command);

impl Serialize for WireRequest<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.arg_count() + 1))?;
        map.serialize_entry("action", self.0.action())?;
        for (key, value) in self.0.args() {
            if key == "action" {
                continue;
            }
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

fn is_finite(value: &ArgValue) -> bool {
    match value {
        ArgValue::Float(v) => v.is_finite(),
        ArgValue::Double(v) => v.is_finite(),
        ArgValue::FloatArray(values) => values.iter().all(|v| v.is_finite()),
        _ => true,
    }
}

/// Encode a command into request bytes.
///
/// JSON has no NaN or infinity; such arguments are refused rather than
/// written as `null`, which an agent would read as "use the default".
pub fn encode_request(command: &Command) -> Result<Bytes, CodecError> {
    if let Some((key, _)) = command.args().find(|(_, value)| !is_finite(value)) {
        return Err(CodecError::NonFiniteNumber { key: key.to_string() });
    }

    let body = serde_json::to_vec(&WireRequest(command))?;

    if body.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge(body.len()));
    }

    Ok(Bytes::from(body))
}

/// Decoded agent response
///
/// Decoding is deliberately lenient: only `ok`, `error` and `status` are
/// looked at, in any order, and anything unrecognisable yields a failed
/// response with no error text rather than an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Opaque per-agent status map, not interpreted by the controller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Map<String, Value>>,
}

impl Response {
    /// A successful response with no payload
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    /// A successful response carrying a status map
    pub fn with_status(status: Map<String, Value>) -> Self {
        Self {
            ok: true,
            error: None,
            status: Some(status),
        }
    }

    /// A failed response with an error message
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            status: None,
        }
    }

    /// Decode response bytes. Never fails.
    ///
    /// - `ok` is true only when the top-level `ok` member is JSON `true`
    /// - `error` is kept when it is a string
    /// - `status` is kept when it is an object
    pub fn decode(bytes: &[u8]) -> Self {
        let mut fields = match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(fields)) => fields,
            _ => return Self::default(),
        };

        let ok = matches!(fields.get("ok"), Some(Value::Bool(true)));
        let error = match fields.remove("error") {
            Some(Value::String(error)) => Some(error),
            _ => None,
        };
        let status = match fields.remove("status") {
            Some(Value::Object(status)) => Some(status),
            _ => None,
        };

        Self { ok, error, status }
    }
}

/// Encode a response into bytes (agent side)
pub fn encode_response(response: &Response) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(serde_json::to_vec(response)?))
}

/// Accumulates a response delivered across any number of reads
///
/// Since end of stream is the only frame boundary, nothing is decoded until
/// the peer has closed; the chunking of the reads never affects the result.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    buffer: BytesMut,
}

impl ResponseAccumulator {
    /// Create a new accumulator
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append a chunk read from the socket
    pub fn extend(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let total = self.buffer.len() + data.len();
        if total > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(total));
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Number of bytes received so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Response text as received (lossy for invalid UTF-8)
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    /// Decode everything received so far
    pub fn decode(&self) -> Response {
        Response::decode(&self.buffer)
    }
}
