//! Worker wire protocol: one JSON object per WebSocket text frame.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::ProtocolError;
use crate::reconcile::MismatchEntry;

/// Handshake payload. Fields are loosely typed on the wire and interpreted
/// by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Handshake {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(default)]
    pub useraccounts: Option<Value>,
}

impl Handshake {
    /// Declared client version; numeric strings are accepted.
    pub fn version(&self) -> Option<i64> {
        self.version.as_ref().and_then(as_integer)
    }

    /// Declared capacity, `None` when absent. Unusable values come back as -1
    /// so the session manager rejects them.
    pub fn capacity(&self) -> Option<i64> {
        self.useraccounts
            .as_ref()
            .map(|v| as_integer(v).unwrap_or(-1))
    }
}

/// Floats truncate toward zero and saturate at the `i64` bounds.
#[allow(clippy::cast_possible_truncation)]
fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Inbound operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Handshake(Handshake),
    RequestPixel { user: String },
    Ping,
    GetBotCount { password: String },
    /// Missing, unknown, or ill-formed `operation`.
    Unrecognized { operation: Option<String> },
}

#[derive(Deserialize)]
#[serde(tag = "operation", rename_all = "kebab-case")]
enum Tagged {
    Handshake {
        #[serde(default)]
        data: Handshake,
    },
    RequestPixel {
        #[serde(default)]
        user: String,
    },
    Ping,
    GetBotcount {
        #[serde(default)]
        pw: String,
    },
}

impl Request {
    /// Parse a text frame.
    ///
    /// Frames that are not JSON objects are errors and close the connection.
    /// Well-formed objects with an unknown operation or bad fields come back
    /// as [`Request::Unrecognized`].
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let object: Map<String, Value> =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let operation = object
            .get("operation")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let request = match serde_json::from_value::<Tagged>(Value::Object(object)) {
            Ok(Tagged::Handshake { data }) => Self::Handshake(data),
            Ok(Tagged::RequestPixel { user }) => Self::RequestPixel { user },
            Ok(Tagged::Ping) => Self::Ping,
            Ok(Tagged::GetBotcount { pw }) => Self::GetBotCount { password: pw },
            Err(_) => Self::Unrecognized { operation },
        };
        Ok(request)
    }

    /// Operation name for logging.
    pub fn operation(&self) -> &str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::RequestPixel { .. } => "request-pixel",
            Self::Ping => "ping",
            Self::GetBotCount { .. } => "get-botcount",
            Self::Unrecognized { operation } => operation.as_deref().unwrap_or("<none>"),
        }
    }
}

/// Pixel assignment sent in a `place-pixel` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub x: u32,
    pub y: u32,
    pub color: u8,
}

impl From<MismatchEntry> for Assignment {
    fn from(entry: MismatchEntry) -> Self {
        Self {
            x: entry.coord.x,
            y: entry.coord.y,
            color: entry.color,
        }
    }
}

/// Outbound messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    NotifyUpdate { version: i64 },
    PlacePixel { user: String, assignment: Option<Assignment> },
    Pong,
    BotCount { amount: u64 },
}

impl Response {
    pub fn to_json(&self) -> Value {
        match self {
            Self::NotifyUpdate { version } => json!({
                "operation": "notify-update",
                "data": { "version": version },
            }),
            Self::PlacePixel { user, assignment } => {
                let data = assignment.map_or_else(
                    || json!({}),
                    |a| json!({ "x": a.x, "y": a.y, "color": a.color }),
                );
                json!({ "operation": "place-pixel", "user": user, "data": data })
            }
            Self::Pong => json!({ "pong": true }),
            Self::BotCount { amount } => json!({ "amount": amount }),
        }
    }

    pub fn to_text(&self) -> String {
        self.to_json().to_string()
    }
}
