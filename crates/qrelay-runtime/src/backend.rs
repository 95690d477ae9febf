//! Interfaces between the control logic and the simulated link
//!
//! Roles and controllers only ever see these traits. `Network` is the
//! reference implementation; tests plug in scripted links.

use std::time::Duration;

use qrelay_core::{
    BellOutcome, CorrectionOp, NodeId, QrelayError, QrelayResult, SimTime, SlotIndex, SlotRef,
    SourceId,
};

use crate::{EntanglementRole, MemorySlotRegistry, NodeCapabilities};

/// Topology view: slots, sources and classical latency
pub trait PhysicalLink {
    fn capabilities(&self, node: NodeId) -> QrelayResult<NodeCapabilities>;

    fn slot_capacity(&self, node: NodeId) -> QrelayResult<usize>;

    /// Pair sources attached to `node`
    fn local_sources(&self, node: NodeId) -> QrelayResult<Vec<SourceId>>;

    fn registry(&self, node: NodeId) -> QrelayResult<&MemorySlotRegistry>;

    fn registry_mut(&mut self, node: NodeId) -> QrelayResult<&mut MemorySlotRegistry>;

    /// One-way classical latency between two nodes
    fn classical_delay(&self, from: NodeId, to: NodeId) -> QrelayResult<Duration>;
}

/// Instructions executed against the quantum state
pub trait QuantumBackend {
    /// Fire a pair source; returns without waiting for the emitted qubits
    fn trigger_source(&mut self, node: NodeId, source: SourceId) -> QrelayResult<()>;

    /// Exchange the contents of two slots on one node
    fn execute_local_swap(&mut self, node: NodeId, a: SlotIndex, b: SlotIndex) -> QrelayResult<()>;

    /// Joint Bell measurement; returns the raw outcome index and consumes both qubits
    fn execute_bell_measurement(&mut self, node: NodeId, a: SlotIndex, b: SlotIndex) -> QrelayResult<u8>;

    /// Bell measurement with the outcome checked against the four-symbol domain
    fn measure_bell(&mut self, node: NodeId, a: SlotIndex, b: SlotIndex) -> QrelayResult<BellOutcome> {
        let raw = self.execute_bell_measurement(node, a, b)?;
        BellOutcome::from_index(raw)
    }

    fn execute_correction(&mut self, target: SlotRef, op: CorrectionOp) -> QrelayResult<()>;

    /// Fidelity of the pair held by two slots against Φ+
    fn fidelity(&mut self, a: SlotRef, b: SlotRef) -> QrelayResult<f64>;

    /// Drop whatever qubit a slot holds
    fn discard(&mut self, slot: SlotRef) -> QrelayResult<()>;
}

/// Simulated time and event delivery
pub trait EventDriver {
    fn now(&self) -> SimTime;

    /// Schedule `op` on `target` once the classical message from `from` lands
    fn send_correction(&mut self, from: NodeId, target: SlotRef, op: CorrectionOp) -> QrelayResult<()>;

    /// Deliver events until the queue is empty, resuming `roles` on arrivals
    fn run_until_idle(&mut self, roles: &mut [&mut EntanglementRole]) -> QrelayResult<RunSummary>;
}

/// Everything a controller needs from the link
pub trait LinkContext: PhysicalLink + QuantumBackend + EventDriver {}

impl<T: PhysicalLink + QuantumBackend + EventDriver + ?Sized> LinkContext for T {}

/// A role left suspended when the event queue ran dry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StalledRole {
    pub protocol: String,
    pub awaiting: SlotRef,
}

/// Result of one run to quiescence
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// Events delivered during the run
    pub delivered: u64,
    pub finished_at: SimTime,
    pub stalled: Vec<StalledRole>,
}

impl RunSummary {
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.stalled.is_empty()
    }

    /// Turn the first stalled role into a `StalledAwait` error
    pub fn ensure_settled(&self) -> QrelayResult<()> {
        match self.stalled.first() {
            None => Ok(()),
            Some(stalled) => Err(QrelayError::StalledAwait {
                protocol: stalled.protocol.clone(),
                node: stalled.awaiting.node,
                slot: stalled.awaiting.slot,
            }),
        }
    }
}
