//! Best-effort value parsing.
//!
//! [`SafeParser`] runs a priority-ordered chain of [`Strategy`] values over a
//! text token and returns the first successful result. It never fails: when
//! every strategy declines or errors, the trimmed input comes back as
//! [`ParsedValue::Text`].
//!
//! The same parser reads instance descriptor files and decodes protocol
//! frames, so protocol-specific strategies can be registered at runtime
//! without touching the default chain.

pub mod strategies;
mod value;

use serde_json::Value;
use tracing::debug;

pub use value::ParsedValue;

/// Maximum nesting of recursive parses (prefixed bodies, CSV elements)
pub const MAX_PARSE_DEPTH: usize = 32;

/// Why a strategy gave up on a token. Never surfaced to parser callers.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("Recursion limit of {MAX_PARSE_DEPTH} reached")]
    DepthExceeded,
}

/// One parsing strategy in the chain.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Lower numbers run first.
    fn priority(&self) -> u32;

    /// Cheap pre-check; `attempt` is only called when this returns true.
    fn can_attempt(&self, text: &str) -> bool;

    /// Convert an already-trimmed, non-empty token.
    ///
    /// # Errors
    ///
    /// Returning an error makes the parser fall through to the next strategy.
    fn attempt(&self, text: &str, cx: &ParseContext<'_>) -> Result<ParsedValue, StrategyError>;
}

/// Handle given to strategies for recursive parsing.
pub struct ParseContext<'a> {
    parser: &'a SafeParser,
    depth: usize,
}

impl ParseContext<'_> {
    /// Parse a nested token with the full strategy chain.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::DepthExceeded`] past [`MAX_PARSE_DEPTH`].
    pub fn parse(&self, text: &str) -> Result<ParsedValue, StrategyError> {
        if self.depth >= MAX_PARSE_DEPTH {
            return Err(StrategyError::DepthExceeded);
        }
        Ok(self.parser.parse_at(text, self.depth + 1).value)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Result of a parse together with the strategy that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub value: ParsedValue,
    /// `None` for passthrough and total-fallback results
    pub strategy: Option<String>,
}

impl ParseOutcome {
    fn passthrough(value: ParsedValue) -> Self {
        Self {
            value,
            strategy: None,
        }
    }
}

/// Registry of parsing strategies, sorted by priority
pub struct SafeParser {
    strategies: Vec<Box<dyn Strategy>>,
}

impl SafeParser {
    /// Parser with the default strategy chain.
    #[must_use]
    pub fn new() -> Self {
        let mut parser = Self::empty();
        for strategy in strategies::defaults() {
            parser.register(strategy);
        }
        parser
    }

    /// Parser with no strategies; every token comes back as text.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Add a strategy and re-sort the chain. Equal priorities keep
    /// registration order.
    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        debug!(
            "Registering parse strategy '{}' (priority {})",
            strategy.name(),
            strategy.priority()
        );
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.priority());
    }

    /// Remove the first strategy with the given name.
    pub fn remove(&mut self, name: &str) -> bool {
        if let Some(index) = self.strategies.iter().position(|s| s.name() == name) {
            self.strategies.remove(index);
            true
        } else {
            false
        }
    }

    /// Strategy names in run order.
    #[must_use]
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    #[must_use]
    pub fn parse(&self, text: &str) -> ParsedValue {
        self.parse_with_info(text).value
    }

    #[must_use]
    pub fn parse_with_info(&self, text: &str) -> ParseOutcome {
        self.parse_at(text, 0)
    }

    /// Parse a value that may already be structured. Only strings go through
    /// the strategy chain; everything else is returned as-is.
    #[must_use]
    pub fn parse_value(&self, value: Value) -> ParsedValue {
        match value {
            Value::String(s) => self.parse(&s),
            other => ParsedValue::from(other),
        }
    }

    fn parse_at(&self, text: &str, depth: usize) -> ParseOutcome {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return ParseOutcome::passthrough(ParsedValue::Text(String::new()));
        }

        let cx = ParseContext {
            parser: self,
            depth,
        };
        for strategy in &self.strategies {
            if !strategy.can_attempt(trimmed) {
                continue;
            }
            match strategy.attempt(trimmed, &cx) {
                Ok(value) => {
                    return ParseOutcome {
                        value,
                        strategy: Some(strategy.name().to_string()),
                    };
                }
                Err(e) => debug!("Parse strategy '{}' failed: {}", strategy.name(), e),
            }
        }

        ParseOutcome::passthrough(ParsedValue::Text(trimmed.to_string()))
    }
}

impl Default for SafeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SafeParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeParser")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}
