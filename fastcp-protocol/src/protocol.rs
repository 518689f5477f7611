use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::errors::ProtocolError;

/// Maximum size of a single message line (10MB). Local socket only.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Request sent from the control panel to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Opaque correlation token chosen by the caller
    #[serde(default)]
    pub id: String,
    /// Namespaced method, e.g. `site.createDirectory`
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Deserialize the params into a typed payload. Absent params are
    /// treated as an empty object so payloads with all-default fields work.
    pub fn parse_params<T: DeserializeOwned>(&self) -> Result<T> {
        parse_params(&self.params)
    }
}

/// Response sent from the agent. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Create a success response carrying `result`
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: if result.is_null() { None } else { Some(result) },
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(msg.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split into the result value or the remote error message.
    pub fn into_result(self) -> std::result::Result<Value, String> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Parse raw params into a typed payload (`null` → `{}`).
pub fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T> {
    let value = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(value).map_err(ProtocolError::Decode)
}

/// Encode a message as one JSON line (trailing `\n` included).
pub fn encode_line<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(msg).map_err(ProtocolError::Encode)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            max: MAX_MESSAGE_SIZE,
        });
    }
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
}

/// Read the next non-blank line into `buf` (newline stripped).
///
/// Returns `Ok(false)` on a clean EOF between messages.
pub async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        buf.clear();
        let mut total = 0usize;
        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                if total == 0 {
                    return Ok(false);
                }
                return Err(ProtocolError::UnexpectedEof);
            }
            let (chunk, done) = match available.iter().position(|b| *b == b'\n') {
                Some(pos) => (&available[..pos], Some(pos + 1)),
                None => (available, None),
            };
            total += chunk.len();
            if total > MAX_MESSAGE_SIZE {
                return Err(ProtocolError::MessageTooLarge {
                    max: MAX_MESSAGE_SIZE,
                });
            }
            buf.extend_from_slice(chunk);
            let consumed = done.unwrap_or(chunk.len());
            reader.consume(consumed);
            if done.is_some() {
                break;
            }
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        if !buf.iter().all(u8::is_ascii_whitespace) {
            return Ok(true);
        }
    }
}

#[cfg(test)]
mod tests;
