//! qrelay Link - Physical topology of the three-party link
//!
//! This crate implements:
//! - LinkConfig: one serializable description covering the noiseless and
//!   noisy experiment variants
//! - TopologyBuilder: turns a LinkConfig into a wired `Network`

pub mod config;
pub mod builder;

pub use config::*;
pub use builder::*;
