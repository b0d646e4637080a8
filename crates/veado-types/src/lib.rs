//! Shared types for veadotube client components.
//!
//! This crate provides the data model used across veado-core, veado-rpc and
//! the `veado` binary: discovered instances, avatar states, node entries,
//! thumbnails and the outbound request shapes understood by veadotube.

use serde::{Deserialize, Deserializer, Serialize};

/// Fallback instance name when the descriptor omits one
pub const DEFAULT_INSTANCE_NAME: &str = "veadotube";

/// Fallback protocol version when the descriptor omits one
pub const DEFAULT_INSTANCE_VERSION: &str = "2.1";

/// Token sent with listen/unlisten requests
pub const DEFAULT_LISTENER_TOKEN: &str = "TpVtPlugin.ChangeState";

/// Node type carrying avatar state events
pub const STATE_EVENTS_TYPE: &str = "stateEvents";

/// Node id of the state events channel
pub const STATE_EVENTS_ID: &str = "mini";

/// Accept a timestamp written either as a number or as numeric text.
fn deserialize_lenient_time<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Contents of one file in the instances directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceFile {
    /// `host:port` of the instance's WebSocket server
    pub server: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_lenient_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub time: Option<f64>,
}

/// A discovered, running veadotube instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub server: String,
    pub name: String,
    pub version: String,
}

impl Instance {
    /// Build an instance record from its descriptor, filling in defaults for
    /// missing or empty `name` and `version`.
    #[must_use]
    pub fn from_file(id: impl Into<String>, file: InstanceFile) -> Self {
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
        Self {
            id: id.into(),
            server: file.server,
            name: non_empty(file.name).unwrap_or_else(|| DEFAULT_INSTANCE_NAME.to_string()),
            version: non_empty(file.version)
                .unwrap_or_else(|| DEFAULT_INSTANCE_VERSION.to_string()),
        }
    }
}

/// An avatar state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Only sent by 2.1+
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_hash: Option<String>,
}

/// A node exposed by an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    /// Equal to `id` on 2.1+
    #[serde(default)]
    pub name: String,
}

impl Entry {
    #[must_use]
    pub fn is_state_events(&self) -> bool {
        self.kind == STATE_EVENTS_TYPE
    }
}

/// A state thumbnail as sent on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub state: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Base64-encoded PNG
    pub png: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// A single-state payload whose event is neither `peek` nor `set`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    #[serde(default)]
    pub event: String,
    pub state: String,
}

/// Top-level event of an outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestEvent {
    List,
    Peek,
    Listen,
    Unlisten,
    Payload,
    Info,
}

/// Payload of a `payload` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum RequestPayload {
    /// Switch the active avatar state
    Set { state: String },

    /// Ask for a state's thumbnail
    Thumb {
        state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },
}

/// A request sent to an instance as a single JSON text frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub event: RequestEvent,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<RequestPayload>,
}

impl Request {
    fn state_events(event: RequestEvent) -> Self {
        Self {
            event,
            kind: Some(STATE_EVENTS_TYPE.to_string()),
            id: Some(STATE_EVENTS_ID.to_string()),
            token: None,
            payload: None,
        }
    }

    fn bare(event: RequestEvent) -> Self {
        Self {
            event,
            kind: None,
            id: None,
            token: None,
            payload: None,
        }
    }

    #[must_use]
    pub fn list_states() -> Self {
        Self::state_events(RequestEvent::List)
    }

    #[must_use]
    pub fn peek_state() -> Self {
        Self::state_events(RequestEvent::Peek)
    }

    #[must_use]
    pub fn listen(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::state_events(RequestEvent::Listen)
        }
    }

    #[must_use]
    pub fn unlisten(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::state_events(RequestEvent::Unlisten)
        }
    }

    #[must_use]
    pub fn set_state(state: impl Into<String>) -> Self {
        Self {
            payload: Some(RequestPayload::Set {
                state: state.into(),
            }),
            ..Self::state_events(RequestEvent::Payload)
        }
    }

    #[must_use]
    pub fn thumbnail(state: impl Into<String>, width: Option<u32>, height: Option<u32>) -> Self {
        Self {
            payload: Some(RequestPayload::Thumb {
                state: state.into(),
                width,
                height,
            }),
            ..Self::state_events(RequestEvent::Payload)
        }
    }

    #[must_use]
    pub fn instance_info() -> Self {
        Self::bare(RequestEvent::Info)
    }

    #[must_use]
    pub fn node_list() -> Self {
        Self::bare(RequestEvent::List)
    }

    /// Serialize this request to a single JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
