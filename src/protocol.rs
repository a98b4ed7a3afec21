//! Wire protocol between the policy evaluator and the filter server.
//!
//! Schema version 1. One JSON object per direction, terminated by a
//! newline, then the server closes the connection:
//!
//! ```text
//! -> {"domain":"tracker.ads.example.com"}
//! <- {"blocked":true,"disable_doh":true}
//!
//! -> {"disable_doh":""}
//! <- {"disable_doh":true}
//! ```
//!
//! Readers also accept a message terminated only by EOF, which is how
//! older resolver modules wrote their requests.

use std::io::{self, Read};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::domain::DomainName;

/// Maximum size of one encoded message, in either direction.
pub const MAX_MESSAGE_SIZE: usize = 2048;

/// Errors while framing or decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message exceeds {MAX_MESSAGE_SIZE} bytes")]
    TooLarge,

    #[error("connection closed before a message was received")]
    Empty,

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A request sent to the filter server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawRequest", try_from = "RawRequest")]
pub enum Request {
    /// Is this domain blocked?
    Lookup { domain: DomainName },
    /// Is DoH suppression active?
    Probe,
}

impl Request {
    pub fn lookup(domain: DomainName) -> Self {
        Request::Lookup { domain }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

/// The server's answer to a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawResponse", from = "RawResponse")]
pub enum Response {
    Lookup { blocked: bool, disable_doh: bool },
    Probe { disable_doh: bool },
}

impl Response {
    pub fn disable_doh(&self) -> bool {
        match *self {
            Response::Lookup { disable_doh, .. } | Response::Probe { disable_doh } => disable_doh,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

/// Object form of a request; exactly one field may be present.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    domain: Option<DomainName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    disable_doh: Option<String>,
}

impl TryFrom<RawRequest> for Request {
    type Error = &'static str;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        match (raw.domain, raw.disable_doh) {
            (Some(domain), None) => Ok(Request::Lookup { domain }),
            (None, Some(_)) => Ok(Request::Probe),
            _ => Err("expected exactly one of `domain` or `disable_doh`"),
        }
    }
}

impl From<Request> for RawRequest {
    fn from(request: Request) -> Self {
        match request {
            Request::Lookup { domain } => RawRequest {
                domain: Some(domain),
                disable_doh: None,
            },
            Request::Probe => RawRequest {
                domain: None,
                disable_doh: Some(String::new()),
            },
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blocked: Option<bool>,
    disable_doh: bool,
}

impl From<RawResponse> for Response {
    fn from(raw: RawResponse) -> Self {
        match raw.blocked {
            Some(blocked) => Response::Lookup {
                blocked,
                disable_doh: raw.disable_doh,
            },
            None => Response::Probe {
                disable_doh: raw.disable_doh,
            },
        }
    }
}

impl From<Response> for RawResponse {
    fn from(response: Response) -> Self {
        match response {
            Response::Lookup {
                blocked,
                disable_doh,
            } => RawResponse {
                blocked: Some(blocked),
                disable_doh,
            },
            Response::Probe { disable_doh } => RawResponse {
                blocked: None,
                disable_doh,
            },
        }
    }
}

fn encode<T: Serialize>(message: &T) -> Vec<u8> {
    // Serializing these plain enums cannot fail.
    let mut bytes = serde_json::to_vec(message).unwrap_or_default();
    bytes.push(b'\n');
    bytes
}

/// Decode a message, accepting JSON objects only.
///
/// Serde would otherwise accept `[true, false]` for a two-field struct,
/// which is one of the retired response shapes.
fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let value: Value = serde_json::from_slice(trim_message(bytes))?;
    match value {
        Value::Object(map) => Ok(serde_json::from_value(Value::Object(map))?),
        _ => Err(ProtocolError::NotAnObject),
    }
}

fn trim_message(bytes: &[u8]) -> &[u8] {
    bytes.trim_ascii()
}

/// Read one message from an async stream.
///
/// Stops at the first newline or at EOF. Returns the message without
/// the terminator.
pub async fn read_message<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE + 1];
    let mut total_read = 0;

    loop {
        let n = reader.read(&mut buf[total_read..]).await?;
        if let Some(message) = frame(&mut buf, total_read, n)? {
            return Ok(message);
        }
        total_read += n;
    }
}

/// Blocking counterpart of [`read_message`].
pub fn read_message_blocking<R: Read>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE + 1];
    let mut total_read = 0;

    loop {
        let n = loop {
            match reader.read(&mut buf[total_read..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if let Some(message) = frame(&mut buf, total_read, n)? {
            return Ok(message);
        }
        total_read += n;
    }
}

/// Inspect the `n` bytes just read after `total_read` earlier ones.
///
/// Returns the completed message, `None` when more input is needed.
fn frame(buf: &mut Vec<u8>, total_read: usize, n: usize) -> Result<Option<Vec<u8>>, ProtocolError> {
    if n == 0 {
        if total_read == 0 {
            return Err(ProtocolError::Empty);
        }
        buf.truncate(total_read);
        return Ok(Some(std::mem::take(buf)));
    }

    if let Some(pos) = buf[total_read..total_read + n].iter().position(|&b| b == b'\n') {
        buf.truncate(total_read + pos);
        return Ok(Some(std::mem::take(buf)));
    }

    if total_read + n > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge);
    }

    Ok(None)
}
