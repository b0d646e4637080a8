pub mod cache;
pub mod config;
pub mod discovery;
pub mod parse;

mod error;

#[cfg(test)]
mod tests;

pub use cache::{CacheEvent, CacheStats, StateCache, StateChange};
pub use discovery::{DiscoveryEvent, DiscoveryWatcher, InstanceRegistry};
pub use error::{Error, Result};
pub use parse::{ParseOutcome, ParsedValue, SafeParser, Strategy, StrategyError};

pub use veado_types::*;
