//! Entanglement role combinations
//!
//! A node takes part in the link as a pair source, a relay, an end station,
//! or a terminal station that both emits and waits. Only these four
//! combinations exist; every other mix of flags is rejected up front.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{QrelayError, QrelayResult};

/// Role played by one protocol instance on its node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleKind {
    /// Triggers the local pair source, waits for nothing
    Source,
    /// Waits for the first of its two reserved slots
    Repeater,
    /// Triggers the local source, waits for both reserved slots
    EndNode,
    /// Terminal station: emits a local pair and waits for both reserved slots
    SourceEndNode,
}

impl RoleKind {
    /// Build a role from the three independent flags
    pub fn from_flags(is_source: bool, is_repeater: bool, is_end_node: bool) -> QrelayResult<Self> {
        match (is_source, is_repeater, is_end_node) {
            (true, false, false) => Ok(RoleKind::Source),
            (false, true, false) => Ok(RoleKind::Repeater),
            (false, false, true) => Ok(RoleKind::EndNode),
            (true, false, true) => Ok(RoleKind::SourceEndNode),
            _ => Err(QrelayError::UnsupportedRole {
                is_source,
                is_repeater,
                is_end_node,
            }),
        }
    }

    #[inline]
    pub fn is_source(self) -> bool {
        matches!(self, RoleKind::Source | RoleKind::SourceEndNode)
    }

    #[inline]
    pub fn is_repeater(self) -> bool {
        matches!(self, RoleKind::Repeater)
    }

    #[inline]
    pub fn is_end_node(self) -> bool {
        matches!(self, RoleKind::EndNode | RoleKind::SourceEndNode)
    }

    /// True only for a source that expects no incoming qubits
    #[inline]
    pub fn is_pure_source(self) -> bool {
        self == RoleKind::Source
    }

    /// Whether the first step fires the node's local pair source
    #[inline]
    pub fn triggers_source(self) -> bool {
        self.is_source() || self.is_end_node()
    }

    /// Number of input slots reserved at construction
    pub fn reserved_slots(self) -> usize {
        match self {
            RoleKind::Source => 0,
            RoleKind::Repeater | RoleKind::EndNode | RoleKind::SourceEndNode => 2,
        }
    }

    /// Number of reserved slots the run suspends on, in order
    pub fn awaited_slots(self) -> usize {
        let mut count = 0;
        if !self.is_pure_source() {
            count += 1;
        }
        if self.is_end_node() {
            count += 1;
        }
        count
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoleKind::Source => "source",
            RoleKind::Repeater => "repeater",
            RoleKind::EndNode => "end-node",
            RoleKind::SourceEndNode => "source+end-node",
        };
        f.write_str(name)
    }
}
