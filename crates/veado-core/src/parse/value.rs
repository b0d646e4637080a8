use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};
use url::Url;

/// The most specific value the safe parser could extract from a text token
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedValue {
    /// Explicit `undefined`, kept apart from `null`
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    Date(DateTime<Utc>),
    Url(Url),
    Array(Vec<ParsedValue>),
    Object(BTreeMap<String, ParsedValue>),
}

impl ParsedValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParsedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&BTreeMap<String, ParsedValue>> {
        match self {
            ParsedValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key when this value is an object.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParsedValue> {
        self.as_object().and_then(|map| map.get(key))
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, ParsedValue::Object(_))
    }

    /// Short name of the variant, used in log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ParsedValue::Undefined => "undefined",
            ParsedValue::Null => "null",
            ParsedValue::Bool(_) => "boolean",
            ParsedValue::Number(_) => "number",
            ParsedValue::Text(_) => "string",
            ParsedValue::Date(_) => "date",
            ParsedValue::Url(_) => "url",
            ParsedValue::Array(_) => "array",
            ParsedValue::Object(_) => "object",
        }
    }

    /// Lower into plain JSON.
    ///
    /// Dates become RFC 3339 strings with millisecond precision, URLs become
    /// their serialized form and `Undefined` collapses to `null`.
    #[must_use]
    pub fn into_json(self) -> Value {
        match self {
            ParsedValue::Undefined | ParsedValue::Null => Value::Null,
            ParsedValue::Bool(b) => Value::Bool(b),
            ParsedValue::Number(n) => Value::Number(n),
            ParsedValue::Text(s) => Value::String(s),
            ParsedValue::Date(d) => Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ParsedValue::Url(u) => Value::String(u.into()),
            ParsedValue::Array(items) => {
                Value::Array(items.into_iter().map(ParsedValue::into_json).collect())
            }
            ParsedValue::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for ParsedValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ParsedValue::Null,
            Value::Bool(b) => ParsedValue::Bool(b),
            Value::Number(n) => ParsedValue::Number(n),
            Value::String(s) => ParsedValue::Text(s),
            Value::Array(items) => {
                ParsedValue::Array(items.into_iter().map(ParsedValue::from).collect())
            }
            Value::Object(map) => ParsedValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, ParsedValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for ParsedValue {
    fn from(s: &str) -> Self {
        ParsedValue::Text(s.to_string())
    }
}

impl From<bool> for ParsedValue {
    fn from(b: bool) -> Self {
        ParsedValue::Bool(b)
    }
}

impl From<i64> for ParsedValue {
    fn from(n: i64) -> Self {
        ParsedValue::Number(n.into())
    }
}

impl fmt::Display for ParsedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsedValue::Undefined => write!(f, "undefined"),
            ParsedValue::Text(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.clone().into_json()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let value = json!({"a": [1, 2.5, "x", null, true], "b": {"c": -3}});
        let parsed = ParsedValue::from(value.clone());
        assert_eq!(parsed.into_json(), value);
    }

    #[test]
    fn test_undefined_lowers_to_null() {
        assert_eq!(ParsedValue::Undefined.into_json(), Value::Null);
    }

    #[test]
    fn test_date_lowers_to_rfc3339() {
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(
            ParsedValue::Date(date).into_json(),
            json!("2024-05-01T12:30:00.000Z")
        );
    }

    #[test]
    fn test_url_lowers_to_string() {
        let url = Url::parse("ws://localhost:1234/").unwrap();
        assert_eq!(ParsedValue::Url(url).into_json(), json!("ws://localhost:1234/"));
    }

    #[test]
    fn test_accessors() {
        let parsed = ParsedValue::from(json!({"server": "h:1"}));
        assert!(parsed.is_object());
        assert_eq!(parsed.get("server").and_then(ParsedValue::as_str), Some("h:1"));
        assert_eq!(parsed.get("missing"), None);
        assert_eq!(ParsedValue::from("x").get("server"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ParsedValue::from("plain").to_string(), "plain");
        assert_eq!(ParsedValue::from(42).to_string(), "42");
        assert_eq!(ParsedValue::Undefined.to_string(), "undefined");
    }
}
