//! qrelay Runtime - Control plane of the three-party entanglement link
//!
//! This crate implements:
//! - Memory slot reservation (MemorySlotRegistry)
//! - Nodes, quantum memories, pair sources and channels
//! - The simulated link: event loop delivering qubit arrivals and corrections
//! - EntanglementRole: per-node generation/reception state machine
//! - Entanglement swapping with outcome-driven correction
//! - DistillationController: two-round consolidate-and-measure loop

pub mod registry;
pub mod memory;
pub mod node;
pub mod backend;
pub mod network;
pub mod protocol;
pub mod swap;
pub mod distill;

pub use registry::*;
pub use memory::*;
pub use node::*;
pub use backend::*;
pub use network::*;
pub use protocol::*;
pub use swap::*;
pub use distill::*;
