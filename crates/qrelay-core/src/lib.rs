//! qrelay Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the three-party link:
//! - Identifiers (NodeId, SourceId, QubitId, SlotIndex)
//! - Simulated time (SimTime)
//! - Bell outcomes and the swap correction map
//! - Entanglement role combinations
//! - Error taxonomy

pub mod id;
pub mod time;
pub mod bell;
pub mod role;
pub mod error;

pub use id::*;
pub use time::*;
pub use bell::*;
pub use role::*;
pub use error::*;
