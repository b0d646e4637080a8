//! Inbound frame decoding and routing.
//!
//! veadotube answers with one JSON object per text frame, optionally prefixed
//! with a channel name (`nodes:{...}`). [`decode_frame`] turns raw frame text
//! into a typed [`Frame`] and [`Frame::route`] maps it onto the
//! [`ProtocolEvent`]s a connection reports. Both are pure.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;
use veado_core::SafeParser;
use veado_types::{Entry, State, Thumbnail};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    #[error("expected an object, got {0}")]
    NotAnObject(&'static str),
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub channel: Option<String>,
    pub message: ResultMessage,
}

/// Shape of an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ResultMessage {
    /// Any message with an `entries` array
    EntryList {
        event: Option<String>,
        entries: Vec<Entry>,
    },
    /// A message addressed to a node, carrying a `payload` object
    Payload {
        event: Option<String>,
        kind: Option<String>,
        id: Option<String>,
        name: Option<String>,
        payload: ResultPayload,
    },
    /// An object matching neither shape
    Bare(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    StateList {
        event: Option<String>,
        states: Vec<State>,
    },
    Thumbnail(Thumbnail),
    /// A single state; `event` is empty when the payload has none
    State { event: String, state: String },
    Other(Value),
}

/// What a connection reports for one routed message
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    EntryList {
        channel: Option<String>,
        entries: Vec<Entry>,
    },
    /// Entry list answering a `list` request
    NodeList {
        channel: Option<String>,
        entries: Vec<Entry>,
    },
    StateList(Vec<State>),
    Thumbnail(Thumbnail),
    StatePeeked(String),
    StateChanged(String),
    StateEvent {
        event: String,
        state: String,
    },
    Unrecognized(Value),
}

/// Strip surrounding whitespace and NUL terminators.
#[must_use]
pub fn normalize(text: &str) -> &str {
    text.trim_matches(|c: char| c == '\0' || c.is_whitespace())
}

/// Split `channel:body`. The colon must not be the first character and must
/// come before any `{` or `[`.
#[must_use]
pub fn split_channel(text: &str) -> (Option<&str>, &str) {
    let Some(colon) = text.find(':') else {
        return (None, text);
    };
    let structure = text.find(['{', '[']);
    if colon > 0 && structure.is_none_or(|start| colon < start) {
        (Some(text[..colon].trim()), &text[colon + 1..])
    } else {
        (None, text)
    }
}

/// Decode one frame's text.
///
/// # Errors
///
/// Fails when the frame is empty or its body does not parse to an object.
pub fn decode_frame(text: &str, parser: &SafeParser) -> Result<Frame, DecodeError> {
    let text = normalize(text);
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    let (channel, body) = split_channel(text);
    let parsed = parser.parse(body);
    let kind = parsed.kind();
    let Value::Object(object) = parsed.into_json() else {
        return Err(DecodeError::NotAnObject(kind));
    };

    Ok(Frame {
        channel: channel.map(str::to_string),
        message: ResultMessage::from_object(object),
    })
}

fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

fn take_array(object: &mut Map<String, Value>, key: &str) -> Option<Vec<Value>> {
    if !object.get(key).is_some_and(Value::is_array) {
        return None;
    }
    match object.remove(key) {
        Some(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Deserialize every item that fits `T`, skipping the rest.
fn collect<T: DeserializeOwned>(items: Vec<Value>, what: &str) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Skipping malformed {}: {}", what, e);
                None
            }
        })
        .collect()
}

impl ResultMessage {
    fn from_object(mut object: Map<String, Value>) -> Self {
        let event = text_field(&object, "event");

        if let Some(items) = take_array(&mut object, "entries") {
            return ResultMessage::EntryList {
                event,
                entries: collect(items, "entry"),
            };
        }

        match object.remove("payload") {
            Some(Value::Object(payload)) => {
                return ResultMessage::Payload {
                    event,
                    kind: text_field(&object, "type"),
                    id: text_field(&object, "id"),
                    name: text_field(&object, "name"),
                    payload: ResultPayload::from_object(payload),
                };
            }
            Some(other) => {
                object.insert("payload".to_string(), other);
            }
            None => {}
        }

        ResultMessage::Bare(Value::Object(object))
    }
}

impl ResultPayload {
    fn from_object(mut payload: Map<String, Value>) -> Self {
        let event = text_field(&payload, "event");

        if let Some(items) = take_array(&mut payload, "states") {
            return ResultPayload::StateList {
                event,
                states: collect(items, "state"),
            };
        }

        if payload.contains_key("png") {
            let value = Value::Object(payload);
            return match serde_json::from_value(value.clone()) {
                Ok(thumbnail) => ResultPayload::Thumbnail(thumbnail),
                Err(e) => {
                    debug!("Malformed thumbnail payload: {}", e);
                    ResultPayload::Other(value)
                }
            };
        }

        let state = match payload.get("state") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        match state {
            Some(state) => ResultPayload::State {
                event: event.unwrap_or_default(),
                state,
            },
            None => ResultPayload::Other(Value::Object(payload)),
        }
    }
}

impl Frame {
    /// Events this frame produces, in delivery order.
    #[must_use]
    pub fn route(self) -> Vec<ProtocolEvent> {
        match self.message {
            ResultMessage::EntryList { event, entries } => {
                if event.as_deref() == Some("list") {
                    vec![
                        ProtocolEvent::EntryList {
                            channel: self.channel.clone(),
                            entries: entries.clone(),
                        },
                        ProtocolEvent::NodeList {
                            channel: self.channel,
                            entries,
                        },
                    ]
                } else {
                    vec![ProtocolEvent::EntryList {
                        channel: self.channel,
                        entries,
                    }]
                }
            }
            ResultMessage::Payload { payload, .. } => vec![match payload {
                ResultPayload::StateList { states, .. } => ProtocolEvent::StateList(states),
                ResultPayload::Thumbnail(thumbnail) => ProtocolEvent::Thumbnail(thumbnail),
                ResultPayload::State { event, state } => match event.as_str() {
                    "peek" => ProtocolEvent::StatePeeked(state),
                    "set" => ProtocolEvent::StateChanged(state),
                    _ => ProtocolEvent::StateEvent { event, state },
                },
                ResultPayload::Other(value) => ProtocolEvent::Unrecognized(value),
            }],
            ResultMessage::Bare(value) => vec![ProtocolEvent::Unrecognized(value)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(text: &str) -> Frame {
        decode_frame(text, &SafeParser::new()).unwrap()
    }

    fn mini() -> Entry {
        Entry {
            kind: "stateEvents".to_string(),
            id: "mini".to_string(),
            name: "mini".to_string(),
        }
    }

    #[test]
    fn test_split_channel() {
        assert_eq!(split_channel("nodes:{\"a\":1}"), (Some("nodes"), "{\"a\":1}"));
        assert_eq!(split_channel("{\"a\":1}"), (None, "{\"a\":1}"));
        assert_eq!(split_channel(":{}"), (None, ":{}"));
        assert_eq!(split_channel("[1,2]"), (None, "[1,2]"));
        assert_eq!(split_channel("plain"), (None, "plain"));
    }

    #[test]
    fn test_normalize_strips_nul() {
        assert_eq!(normalize("  {\"a\":1}\0\0\n"), "{\"a\":1}");
    }

    #[test]
    fn test_channel_prefixed_node_list() {
        let frame = decode(
            r#"nodes:{"event":"list","entries":[{"type":"stateEvents","id":"mini","name":"mini"}]}"#,
        );
        assert_eq!(frame.channel.as_deref(), Some("nodes"));
        assert_eq!(
            frame.message,
            ResultMessage::EntryList {
                event: Some("list".to_string()),
                entries: vec![mini()],
            }
        );

        assert_eq!(
            frame.route(),
            vec![
                ProtocolEvent::EntryList {
                    channel: Some("nodes".to_string()),
                    entries: vec![mini()],
                },
                ProtocolEvent::NodeList {
                    channel: Some("nodes".to_string()),
                    entries: vec![mini()],
                },
            ]
        );
    }

    #[test]
    fn test_entry_list_without_list_event() {
        let frame = decode(r#"{"event":"update","entries":[]}"#);
        assert_eq!(
            frame.route(),
            vec![ProtocolEvent::EntryList {
                channel: None,
                entries: vec![],
            }]
        );
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let frame = decode(r#"{"event":"list","entries":[{"id":"no-type"},{"type":"x","id":"y"}]}"#);
        let ResultMessage::EntryList { entries, .. } = frame.message else {
            panic!("expected EntryList");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "y");
    }

    #[test]
    fn test_state_list_payload() {
        let frame = decode(
            r#"{"event":"payload","type":"stateEvents","id":"mini","name":"mini","payload":{"event":"list","states":[{"id":"s1","name":"Idle","thumbHash":"h1"}]}}"#,
        );
        assert!(matches!(
            &frame.message,
            ResultMessage::Payload { kind: Some(kind), .. } if kind == "stateEvents"
        ));
        let events = frame.route();
        let [ProtocolEvent::StateList(states)] = events.as_slice() else {
            panic!("expected StateList, got {events:?}");
        };
        assert_eq!(states[0].id, "s1");
        assert_eq!(states[0].name, "Idle");
    }

    #[test]
    fn test_thumbnail_payload() {
        let frame = decode(
            r#"{"event":"payload","payload":{"event":"thumb","state":"s1","width":32,"height":16,"png":"AAEC","hash":"x"}}"#,
        );
        assert_eq!(
            frame.route(),
            vec![ProtocolEvent::Thumbnail(Thumbnail {
                state: "s1".to_string(),
                width: 32,
                height: 16,
                png: "AAEC".to_string(),
                hash: Some("x".to_string()),
            })]
        );
    }

    #[test]
    fn test_state_payload_events() {
        let peek = decode(r#"{"event":"payload","payload":{"event":"peek","state":"happy"}}"#);
        assert_eq!(peek.route(), vec![ProtocolEvent::StatePeeked("happy".to_string())]);

        let set = decode(r#"{"event":"payload","payload":{"event":"set","state":"sad"}}"#);
        assert_eq!(set.route(), vec![ProtocolEvent::StateChanged("sad".to_string())]);

        let other = decode(r#"{"event":"payload","payload":{"state":"calm"}}"#);
        assert_eq!(
            other.route(),
            vec![ProtocolEvent::StateEvent {
                event: String::new(),
                state: "calm".to_string(),
            }]
        );
    }

    #[test]
    fn test_unrecognized_payload() {
        let frame = decode(r#"{"event":"payload","payload":{"foo":1}}"#);
        assert_eq!(
            frame.route(),
            vec![ProtocolEvent::Unrecognized(json!({"foo": 1}))]
        );
    }

    #[test]
    fn test_bare_object_is_unrecognized() {
        let frame = decode(r#"{"event":"info","name":"mini","version":"2.1"}"#);
        assert_eq!(
            frame.route(),
            vec![ProtocolEvent::Unrecognized(
                json!({"event": "info", "name": "mini", "version": "2.1"})
            )]
        );
    }

    #[test]
    fn test_sloppy_frame_body() {
        let frame = decode("{event:'payload', payload:{event:'peek', state:'idle'}}\0");
        assert_eq!(frame.route(), vec![ProtocolEvent::StatePeeked("idle".to_string())]);
    }

    #[test]
    fn test_decode_errors() {
        let parser = SafeParser::new();
        assert_eq!(decode_frame(" \0", &parser), Err(DecodeError::Empty));
        assert_eq!(
            decode_frame("42", &parser),
            Err(DecodeError::NotAnObject("number"))
        );
        assert_eq!(
            decode_frame("[1,2]", &parser),
            Err(DecodeError::NotAnObject("array"))
        );
    }
}
