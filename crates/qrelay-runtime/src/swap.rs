//! Entanglement swapping
//!
//! The relay Bell-measures the two halves it holds and sends the matching
//! correction to the node holding the far partner.

use qrelay_core::{correction_for, BellOutcome, CorrectionOp, NodeId, QrelayResult, SlotIndex, SlotRef};

use crate::{EventDriver, QuantumBackend};

/// What one swap did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapRecord {
    pub relay: NodeId,
    pub measured: (SlotIndex, SlotIndex),
    pub outcome: BellOutcome,
    pub correction: CorrectionOp,
    /// Slot the correction was sent to
    pub target: SlotRef,
}

/// Measure `measured` on `relay` and send the correction to `target`.
///
/// The correction is applied once the classical message arrives, i.e. the
/// next time the link runs its event queue.
pub fn perform_swap<L>(
    link: &mut L,
    relay: NodeId,
    measured: (SlotIndex, SlotIndex),
    target: SlotRef,
) -> QrelayResult<SwapRecord>
where
    L: QuantumBackend + EventDriver + ?Sized,
{
    let outcome = link.measure_bell(relay, measured.0, measured.1)?;
    let correction = correction_for(outcome);
    link.send_correction(relay, target, correction)?;
    tracing::debug!(%relay, %outcome, %correction, %target, "entanglement swapped");
    Ok(SwapRecord {
        relay,
        measured,
        outcome,
        correction,
        target,
    })
}
