//! Default strategy chain for [`SafeParser`](super::SafeParser).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::{Captures, Regex};
use serde_json::{Number, Value};
use url::Url;

use super::{ParseContext, ParsedValue, Strategy, StrategyError};

pub const JSON_STRICT_PRIORITY: u32 = 10;
pub const PREFIXED_JSON_PRIORITY: u32 = 15;
pub const JSON_SLOPPY_PRIORITY: u32 = 20;
pub const NUMBER_PRIORITY: u32 = 30;
pub const BOOLEAN_PRIORITY: u32 = 40;
pub const DATE_PRIORITY: u32 = 50;
pub const URL_PRIORITY: u32 = 60;
pub const CSV_ARRAY_PRIORITY: u32 = 70;
pub const NULL_PRIORITY: u32 = 80;

// Patterns are literals; a failure here is a programming error.
fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("strategy pattern is a valid regex")
}

static UNQUOTED_KEY: LazyLock<Regex> = LazyLock::new(|| regex(r"([{,]\s*)([a-zA-Z0-9_$]+)\s*:"));
static SINGLE_QUOTED_VALUE: LazyLock<Regex> = LazyLock::new(|| regex(r":\s*'([^']*)'"));
static BARE_WORD_VALUE: LazyLock<Regex> =
    LazyLock::new(|| regex(r":\s*([a-zA-Z][a-zA-Z0-9_]*|true|false|null)\s*([,}])"));
static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| regex(r",\s*([}\]])"));
static NUMBER: LazyLock<Regex> = LazyLock::new(|| regex(r"^-?[0-9]*\.?[0-9]+([eE][+-]?[0-9]+)?$"));
static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}(T[0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]{3})?Z?)?$")
});

/// The default chain, in priority order.
#[must_use]
pub fn defaults() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(JsonStrict),
        Box::new(PrefixedJson),
        Box::new(JsonSloppy),
        Box::new(NumberLiteral),
        Box::new(BooleanWord),
        Box::new(IsoDate),
        Box::new(AbsoluteUrl),
        Box::new(CsvArray),
        Box::new(NullLike),
    ]
}

fn is_delimited(text: &str) -> bool {
    (text.starts_with('{') && text.ends_with('}')) || (text.starts_with('[') && text.ends_with(']'))
}

/// JSON, but only for text wrapped in `{}` or `[]`
pub struct JsonStrict;

impl Strategy for JsonStrict {
    fn name(&self) -> &str {
        "json-strict"
    }

    fn priority(&self) -> u32 {
        JSON_STRICT_PRIORITY
    }

    fn can_attempt(&self, text: &str) -> bool {
        is_delimited(text)
    }

    fn attempt(&self, text: &str, _cx: &ParseContext<'_>) -> Result<ParsedValue, StrategyError> {
        let value: Value = serde_json::from_str(text)?;
        Ok(value.into())
    }
}

/// `prefix:{...}` or `prefix:[...]`, parsed as `{prefix: body}`
pub struct PrefixedJson;

impl PrefixedJson {
    fn split(text: &str) -> Option<(&str, &str)> {
        let colon = text.find(':')?;
        let body = text[colon + 1..].trim();
        if body.starts_with('{') || body.starts_with('[') {
            Some((text[..colon].trim(), body))
        } else {
            None
        }
    }
}

impl Strategy for PrefixedJson {
    fn name(&self) -> &str {
        "prefixed-json"
    }

    fn priority(&self) -> u32 {
        PREFIXED_JSON_PRIORITY
    }

    fn can_attempt(&self, text: &str) -> bool {
        Self::split(text).is_some()
    }

    fn attempt(&self, text: &str, cx: &ParseContext<'_>) -> Result<ParsedValue, StrategyError> {
        let (prefix, body) = Self::split(text)
            .ok_or_else(|| StrategyError::Invalid("no structured body after prefix".into()))?;
        let parsed = cx.parse(body)?;
        Ok(ParsedValue::Object(BTreeMap::from([(
            prefix.to_string(),
            parsed,
        )])))
    }
}

/// Repairs common hand-written JSON mistakes, then parses.
///
/// The rewrites are textual and can mis-repair nested or adversarial input;
/// such input falls through to the next strategy.
pub struct JsonSloppy;

impl JsonSloppy {
    #[must_use]
    pub fn repair(text: &str) -> String {
        let fixed = UNQUOTED_KEY.replace_all(text, r#"${1}"${2}":"#);
        let fixed = SINGLE_QUOTED_VALUE.replace_all(&fixed, r#": "${1}""#);
        let fixed = BARE_WORD_VALUE.replace_all(&fixed, |caps: &Captures<'_>| {
            let word = &caps[1];
            let end = &caps[2];
            if matches!(word.to_lowercase().as_str(), "true" | "false" | "null") {
                format!(": {word}{end}")
            } else {
                format!(": \"{word}\"{end}")
            }
        });
        let fixed = TRAILING_COMMA.replace_all(&fixed, "${1}").into_owned();

        let trimmed = fixed.trim();
        if fixed.contains(':') && !trimmed.starts_with('{') && !trimmed.starts_with('[') {
            format!("{{{fixed}}}")
        } else {
            fixed
        }
    }
}

impl Strategy for JsonSloppy {
    fn name(&self) -> &str {
        "json-sloppy"
    }

    fn priority(&self) -> u32 {
        JSON_SLOPPY_PRIORITY
    }

    fn can_attempt(&self, text: &str) -> bool {
        text.contains('{') || text.contains('[') || (text.contains(':') && text.contains(','))
    }

    fn attempt(&self, text: &str, _cx: &ParseContext<'_>) -> Result<ParsedValue, StrategyError> {
        let value: Value = serde_json::from_str(&Self::repair(text))?;
        Ok(value.into())
    }
}

/// Integer, decimal and exponent literals
pub struct NumberLiteral;

impl Strategy for NumberLiteral {
    fn name(&self) -> &str {
        "number"
    }

    fn priority(&self) -> u32 {
        NUMBER_PRIORITY
    }

    fn can_attempt(&self, text: &str) -> bool {
        NUMBER.is_match(text)
    }

    fn attempt(&self, text: &str, _cx: &ParseContext<'_>) -> Result<ParsedValue, StrategyError> {
        let is_integral = !text.contains(['.', 'e', 'E']);
        if is_integral {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(ParsedValue::Number(n.into()));
            }
            if let Ok(n) = text.parse::<u64>() {
                return Ok(ParsedValue::Number(n.into()));
            }
        }

        let float: f64 = text
            .parse()
            .map_err(|_| StrategyError::Invalid(format!("not a number: {text}")))?;
        Number::from_f64(float)
            .map(ParsedValue::Number)
            .ok_or_else(|| StrategyError::Invalid(format!("not a finite number: {text}")))
    }
}

/// `true/yes/on/1` and `false/no/off/0`, case-insensitive
pub struct BooleanWord;

impl BooleanWord {
    fn classify(text: &str) -> Option<bool> {
        match text.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }
}

impl Strategy for BooleanWord {
    fn name(&self) -> &str {
        "boolean"
    }

    fn priority(&self) -> u32 {
        BOOLEAN_PRIORITY
    }

    fn can_attempt(&self, text: &str) -> bool {
        Self::classify(text).is_some()
    }

    fn attempt(&self, text: &str, _cx: &ParseContext<'_>) -> Result<ParsedValue, StrategyError> {
        Self::classify(text)
            .map(ParsedValue::Bool)
            .ok_or_else(|| StrategyError::Invalid(format!("not a boolean: {text}")))
    }
}

/// ISO-8601 date or date-time, read as UTC
pub struct IsoDate;

impl Strategy for IsoDate {
    fn name(&self) -> &str {
        "date-iso"
    }

    fn priority(&self) -> u32 {
        DATE_PRIORITY
    }

    fn can_attempt(&self, text: &str) -> bool {
        ISO_DATE.is_match(text)
    }

    fn attempt(&self, text: &str, _cx: &ParseContext<'_>) -> Result<ParsedValue, StrategyError> {
        let invalid = |e: chrono::ParseError| StrategyError::Invalid(format!("{text}: {e}"));

        let naive = if text.len() == 10 {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map_err(invalid)?
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| StrategyError::Invalid(format!("{text}: invalid midnight")))?
        } else {
            let body = text.trim_end_matches('Z');
            let format = if body.contains('.') {
                "%Y-%m-%dT%H:%M:%S%.3f"
            } else {
                "%Y-%m-%dT%H:%M:%S"
            };
            NaiveDateTime::parse_from_str(body, format).map_err(invalid)?
        };

        Ok(ParsedValue::Date(Utc.from_utc_datetime(&naive)))
    }
}

/// Absolute URLs
pub struct AbsoluteUrl;

impl Strategy for AbsoluteUrl {
    fn name(&self) -> &str {
        "url"
    }

    fn priority(&self) -> u32 {
        URL_PRIORITY
    }

    fn can_attempt(&self, text: &str) -> bool {
        Url::parse(text).is_ok()
    }

    fn attempt(&self, text: &str, _cx: &ParseContext<'_>) -> Result<ParsedValue, StrategyError> {
        Url::parse(text)
            .map(ParsedValue::Url)
            .map_err(|e| StrategyError::Invalid(e.to_string()))
    }
}

/// Comma-separated values without structure; each element is parsed again
pub struct CsvArray;

impl Strategy for CsvArray {
    fn name(&self) -> &str {
        "csv-array"
    }

    fn priority(&self) -> u32 {
        CSV_ARRAY_PRIORITY
    }

    fn can_attempt(&self, text: &str) -> bool {
        text.contains(',') && !text.contains('{') && !text.contains('[')
    }

    fn attempt(&self, text: &str, cx: &ParseContext<'_>) -> Result<ParsedValue, StrategyError> {
        text.split(',')
            .map(|item| cx.parse(item.trim()))
            .collect::<Result<Vec<_>, _>>()
            .map(ParsedValue::Array)
    }
}

/// `null`, `none` and `undefined`, case-insensitive
pub struct NullLike;

impl Strategy for NullLike {
    fn name(&self) -> &str {
        "null"
    }

    fn priority(&self) -> u32 {
        NULL_PRIORITY
    }

    fn can_attempt(&self, text: &str) -> bool {
        matches!(text.to_lowercase().as_str(), "null" | "undefined" | "none")
    }

    fn attempt(&self, text: &str, _cx: &ParseContext<'_>) -> Result<ParsedValue, StrategyError> {
        if text.eq_ignore_ascii_case("undefined") {
            Ok(ParsedValue::Undefined)
        } else {
            Ok(ParsedValue::Null)
        }
    }
}
