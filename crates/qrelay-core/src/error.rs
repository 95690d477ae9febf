//! Error types for the qrelay link

use thiserror::Error;

use crate::{NodeId, QubitId, SlotIndex, SourceId};

/// Core qrelay errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QrelayError {
    // Construction errors
    #[error("Slot conflict: slot {slot} on node {node} already reserved by {owner}")]
    SlotConflict {
        node: NodeId,
        slot: SlotIndex,
        owner: String,
    },

    #[error("Slot {slot} out of range on node {node} (capacity {capacity})")]
    SlotOutOfRange {
        node: NodeId,
        slot: SlotIndex,
        capacity: usize,
    },

    #[error("Expected {expected} input slots for role {role}, got {actual}")]
    SlotCountMismatch {
        role: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unsupported role flags: source={is_source} repeater={is_repeater} end_node={is_end_node}")]
    UnsupportedRole {
        is_source: bool,
        is_repeater: bool,
        is_end_node: bool,
    },

    #[error("No unique pair source on node {node}: found {found}")]
    SourceNotFound { node: NodeId, found: usize },

    // Protocol lifecycle errors
    #[error("Protocol {0} is already running")]
    AlreadyRunning(String),

    #[error("Protocol {0} has not completed")]
    NotCompleted(String),

    #[error("Protocol {0} completed and must be reset before it can start again")]
    NotReset(String),

    #[error("Protocol {protocol} stalled awaiting slot {slot} on node {node}")]
    StalledAwait {
        protocol: String,
        node: NodeId,
        slot: SlotIndex,
    },

    // Engine contract errors
    #[error("Invalid Bell outcome: {0}")]
    InvalidOutcome(u8),

    #[error("Slot {slot} on node {node} holds no qubit")]
    EmptySlot { node: NodeId, slot: SlotIndex },

    #[error("Slot {slot} on node {node} is already occupied")]
    SlotOccupied { node: NodeId, slot: SlotIndex },

    #[error("Unknown qubit: {0:?}")]
    UnknownQubit(QubitId),

    #[error("Invalid quantum state: {0}")]
    InvalidState(String),

    // Topology errors
    #[error("Unknown node: {0:?}")]
    UnknownNode(NodeId),

    #[error("Unknown source: {0:?}")]
    UnknownSource(SourceId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Distillation errors
    #[error("Retry budget exhausted after {attempts} attempts (best fidelity {best_fidelity:.4})")]
    RetryBudgetExhausted { attempts: u32, best_fidelity: f64 },
}

/// Result type for qrelay operations
pub type QrelayResult<T> = Result<T, QrelayError>;
