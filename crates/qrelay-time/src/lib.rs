//! qrelay Time - Discrete-event scheduling on a single simulated timeline
//!
//! This crate implements:
//! - SimClock: monotonic simulated clock
//! - EventScheduler: time-ordered event queue, FIFO among equal timestamps

pub mod clock;
pub mod scheduler;

pub use clock::*;
pub use scheduler::*;
