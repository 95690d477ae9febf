//! qrelay Test Harness - End-to-end link experiments
//!
//! This crate provides:
//! - Tracing setup for tests and benchmarks
//! - The direct-swap experiment
//! - The two-round distillation experiment
//! - Scenario suites over noiseless and noisy links

pub mod harness;
pub mod experiment;

pub use harness::*;
pub use experiment::*;
