//! qrelay Quantum - Reference quantum state engine
//!
//! This crate implements the state side of the link:
//! - Density matrices over small groups of qubits
//! - Pauli gates and Bell kets
//! - Depolarizing noise channels
//! - Bell-basis measurement with Born-rule sampling
//! - Fidelity against the canonical Φ+ pair

pub mod gates;
pub mod state;
pub mod noise;
pub mod engine;

pub use gates::*;
pub use state::*;
pub use noise::*;
pub use engine::*;
