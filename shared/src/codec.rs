//! Socket.IO v4 text packet codec
//!
//! Every frame on the WebSocket is one Engine.IO packet. Engine.IO `message`
//! packets carry a Socket.IO packet:
//! ```text
//! 0{"sid":..,"pingInterval":..}   engine open handshake
//! 2 / 3                           ping / pong
//! 40{"token":..}                  namespace connect (auth optional)
//! 41                              namespace disconnect
//! 42["event",payload]             event
//! 44{"message":..}                connect error
//! ```
//!
//! Only the default namespace is used. Binary packets and acknowledgements are
//! not part of the vocabulary and are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum frame size accepted from the server (Engine.IO default buffer)
pub const MAX_FRAME_SIZE: usize = 1_000_000;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Empty frame")]
    Empty,

    #[error("Unknown packet type: {0:?}")]
    UnknownPacketType(char),

    #[error("Unsupported packet: {0}")]
    Unsupported(String),

    #[error("Malformed event packet: {0}")]
    MalformedEvent(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine.IO open handshake sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: u64,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    /// Client: optional auth payload. Server: `{ "sid": .. }` acknowledgement.
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    ConnectError(Value),
}

impl Packet {
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Packet::Event {
            name: name.into(),
            data,
        }
    }
}

/// Encode a packet into a text frame
pub fn encode(packet: &Packet) -> Result<String, CodecError> {
    let frame = match packet {
        Packet::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
        Packet::Close => "1".to_string(),
        Packet::Ping => "2".to_string(),
        Packet::Pong => "3".to_string(),
        Packet::Noop => "6".to_string(),
        Packet::Connect(None) => "40".to_string(),
        Packet::Connect(Some(data)) => format!("40{}", serde_json::to_string(data)?),
        Packet::Disconnect => "41".to_string(),
        Packet::Event { name, data } => {
            let args = Value::Array(vec![Value::String(name.clone()), data.clone()]);
            format!("42{}", serde_json::to_string(&args)?)
        }
        Packet::ConnectError(data) => format!("44{}", serde_json::to_string(data)?),
    };

    if frame.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(frame.len()));
    }

    Ok(frame)
}

/// Decode a text frame into a packet
pub fn decode(frame: &str) -> Result<Packet, CodecError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(frame.len()));
    }

    let mut chars = frame.chars();
    let engine_type = chars.next().ok_or(CodecError::Empty)?;
    let rest = chars.as_str();

    match engine_type {
        '0' => Ok(Packet::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_message(rest),
        '5' => Err(CodecError::Unsupported("transport upgrade".into())),
        '6' => Ok(Packet::Noop),
        other => Err(CodecError::UnknownPacketType(other)),
    }
}

/// Decode the Socket.IO packet inside an Engine.IO message
fn decode_message(message: &str) -> Result<Packet, CodecError> {
    let mut chars = message.chars();
    let socket_type = chars.next().ok_or(CodecError::Empty)?;
    let body = skip_ack_id(skip_namespace(chars.as_str()));

    match socket_type {
        '0' => {
            if body.is_empty() {
                Ok(Packet::Connect(None))
            } else {
                Ok(Packet::Connect(Some(serde_json::from_str(body)?)))
            }
        }
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(body),
        '3' => Err(CodecError::Unsupported("acknowledgement".into())),
        '4' => {
            let data = if body.is_empty() {
                Value::Null
            } else {
                serde_json::from_str(body)?
            };
            Ok(Packet::ConnectError(data))
        }
        '5' | '6' => Err(CodecError::Unsupported("binary packet".into())),
        other => Err(CodecError::UnknownPacketType(other)),
    }
}

fn decode_event(body: &str) -> Result<Packet, CodecError> {
    let args: Value = serde_json::from_str(body)?;
    let Value::Array(mut args) = args else {
        return Err(CodecError::MalformedEvent("arguments are not an array".into()));
    };

    if args.is_empty() {
        return Err(CodecError::MalformedEvent("missing event name".into()));
    }

    let name = match args.remove(0) {
        Value::String(name) => name,
        other => {
            return Err(CodecError::MalformedEvent(format!(
                "event name is not a string: {}",
                other
            )))
        }
    };

    // Listeners take a single argument; extra arguments are dropped
    let data = if args.is_empty() {
        Value::Null
    } else {
        args.swap_remove(0)
    };

    Ok(Packet::Event { name, data })
}

/// Strip a `/namespace,` prefix
fn skip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

/// Strip a numeric acknowledgement id
fn skip_ack_id(body: &str) -> &str {
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}
