//! # Tuning Test Utilities
//!
//! Shared testing utilities for the tuning crates:
//! - Session builders that emit realistic telemetry
//! - Temporary telemetry directories with a store beside them
//! - Property-based testing strategies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod strategies;

pub use fixtures::{SessionBuilder, TelemetryDir};

/// Re-export proptest for convenience.
pub use proptest;
