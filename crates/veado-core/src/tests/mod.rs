//! Test module for veado-core
//!
//! - Safe parser strategies, ordering and properties
//! - Instance discovery from descriptor files
//! - State and thumbnail caching
//! - Configuration loading and defaults

mod discovery_tests;
