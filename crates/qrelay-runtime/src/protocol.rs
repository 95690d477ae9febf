//! Entanglement role state machine
//!
//! One instance runs on one node and plays one `RoleKind`. A run triggers
//! the local pair source when the role calls for it, then suspends on each
//! awaited slot in order until a qubit arrives there.
//!
//! ```text
//!   Idle --start()--> Running(slot) --arrival--> ... --> Completed
//!     ^                                                      |
//!     +------------------------reset()-----------------------+
//! ```
//!
//! Slot reservations are taken at construction and survive `reset()`; only
//! `teardown()` releases them.

use qrelay_core::{NodeId, QrelayError, QrelayResult, RoleKind, SlotIndex, SlotRef, SourceId};

use crate::{EventDriver, PhysicalLink, QuantumBackend, ReservationId};

/// Lifecycle state of a role instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleState {
    Idle,
    /// Suspended until a qubit arrives at `awaiting`
    Running { awaiting: SlotRef },
    Completed,
}

/// Observable step of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleStep {
    TriggeredSource(SourceId),
    Suspended(SlotRef),
    Resumed(SlotRef),
    Completed,
}

/// Per-node generation and reception protocol
#[derive(Debug)]
pub struct EntanglementRole {
    name: String,
    node: NodeId,
    kind: RoleKind,
    /// Input slots, owned by this instance
    slots: Vec<SlotIndex>,
    reservation: Option<ReservationId>,
    /// Source located by the connectivity check
    source: Option<SourceId>,
    state: RoleState,
    /// Index of the awaited slot the run is suspended on
    cursor: usize,
    /// Arrivals seen during the current run, per awaited slot
    arrived: Vec<bool>,
    steps: Vec<RoleStep>,
}

impl EntanglementRole {
    /// Build a role and reserve its input slots on `node`.
    ///
    /// Fails with `SlotConflict` when another live instance holds one of the
    /// slots; nothing is reserved in that case.
    pub fn new<L: PhysicalLink + ?Sized>(
        link: &mut L,
        node: NodeId,
        kind: RoleKind,
        name: &str,
        slots: &[SlotIndex],
    ) -> QrelayResult<Self> {
        let expected = kind.reserved_slots();
        if slots.len() != expected {
            return Err(QrelayError::SlotCountMismatch {
                role: name.to_string(),
                expected,
                actual: slots.len(),
            });
        }
        if !link.capabilities(node)?.allows(kind) {
            return Err(QrelayError::InvalidConfig(format!(
                "node {node} cannot host {kind} role {name}"
            )));
        }

        let reservation = if slots.is_empty() {
            None
        } else {
            Some(link.registry_mut(node)?.reserve(slots, name)?)
        };
        tracing::debug!(%node, %kind, name, ?slots, "entanglement role created");

        Ok(EntanglementRole {
            name: name.to_string(),
            node,
            kind,
            slots: slots.to_vec(),
            reservation,
            source: None,
            state: RoleState::Idle,
            cursor: 0,
            arrived: vec![false; kind.awaited_slots()],
            steps: Vec::new(),
        })
    }

    /// Build a role from the three independent flags
    pub fn from_flags<L: PhysicalLink + ?Sized>(
        link: &mut L,
        node: NodeId,
        is_source: bool,
        is_repeater: bool,
        is_end_node: bool,
        name: &str,
        slots: &[SlotIndex],
    ) -> QrelayResult<Self> {
        let kind = RoleKind::from_flags(is_source, is_repeater, is_end_node)?;
        Self::new(link, node, kind, name, slots)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub fn kind(&self) -> RoleKind {
        self.kind
    }

    #[inline]
    pub fn state(&self) -> RoleState {
        self.state
    }

    pub fn slots(&self) -> &[SlotIndex] {
        &self.slots
    }

    /// Source cached by the last successful connectivity check
    pub fn source(&self) -> Option<SourceId> {
        self.source
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state == RoleState::Completed
    }

    /// Slot the run is currently suspended on
    pub fn awaiting(&self) -> Option<SlotRef> {
        match self.state {
            RoleState::Running { awaiting } => Some(awaiting),
            _ => None,
        }
    }

    /// Steps taken by the current (or last) run
    pub fn steps(&self) -> &[RoleStep] {
        &self.steps
    }

    fn awaited_slot(&self, index: usize) -> Option<SlotRef> {
        if index < self.kind.awaited_slots() {
            self.slots.get(index).map(|slot| SlotRef::new(self.node, *slot))
        } else {
            None
        }
    }

    /// Locate exactly one local pair source; zero or several means not connected
    fn locate_source<L: PhysicalLink + ?Sized>(&mut self, link: &L) -> QrelayResult<SourceId> {
        if let Some(source) = self.source {
            return Ok(source);
        }
        let sources = link.local_sources(self.node)?;
        match sources.as_slice() {
            [only] => {
                self.source = Some(*only);
                Ok(*only)
            }
            _ => Err(QrelayError::SourceNotFound {
                node: self.node,
                found: sources.len(),
            }),
        }
    }

    /// Pre-flight check. Roles that never trigger a source are always connected.
    pub fn is_connected<L: PhysicalLink + ?Sized>(&mut self, link: &L) -> bool {
        self.check_connected(link).is_ok()
    }

    /// Like `is_connected`, but reports why the check failed
    pub fn check_connected<L: PhysicalLink + ?Sized>(&mut self, link: &L) -> QrelayResult<()> {
        if self.kind.triggers_source() {
            self.locate_source(link)?;
        }
        Ok(())
    }

    /// Begin a run.
    ///
    /// Triggers the local source when the role calls for it, then suspends
    /// on the first awaited slot. A pure source completes immediately.
    pub fn start<L>(&mut self, link: &mut L) -> QrelayResult<()>
    where
        L: PhysicalLink + QuantumBackend + EventDriver + ?Sized,
    {
        match self.state {
            RoleState::Idle => {}
            RoleState::Running { .. } => return Err(QrelayError::AlreadyRunning(self.name.clone())),
            RoleState::Completed => return Err(QrelayError::NotReset(self.name.clone())),
        }

        let source = if self.kind.triggers_source() {
            Some(self.locate_source(link)?)
        } else {
            None
        };

        self.steps.clear();
        self.cursor = 0;
        self.arrived.iter_mut().for_each(|a| *a = false);
        tracing::debug!(role = %self.name, node = %self.node, kind = %self.kind, at = %link.now(), "role started");

        if let Some(source) = source {
            link.trigger_source(self.node, source)?;
            self.steps.push(RoleStep::TriggeredSource(source));
        }
        self.advance();
        Ok(())
    }

    /// Report a qubit arrival. Returns true if the run moved forward.
    ///
    /// Arrivals on an awaited slot that the run has not reached yet are
    /// latched and consumed when the run gets there.
    pub fn on_arrival(&mut self, slot: SlotRef) -> bool {
        if !matches!(self.state, RoleState::Running { .. }) || slot.node != self.node {
            return false;
        }
        let Some(index) = (0..self.arrived.len()).find(|i| self.slots[*i] == slot.slot) else {
            return false;
        };
        if index < self.cursor {
            return false;
        }
        self.arrived[index] = true;
        let before = self.cursor;
        self.advance();
        self.cursor != before
    }

    /// Walk forward through every awaited slot that already has its qubit
    fn advance(&mut self) {
        loop {
            let Some(slot) = self.awaited_slot(self.cursor) else {
                self.state = RoleState::Completed;
                self.steps.push(RoleStep::Completed);
                tracing::debug!(role = %self.name, node = %self.node, "role completed");
                return;
            };
            if self.state != (RoleState::Running { awaiting: slot }) {
                self.state = RoleState::Running { awaiting: slot };
                self.steps.push(RoleStep::Suspended(slot));
                tracing::trace!(role = %self.name, %slot, "role suspended");
            }
            if !self.arrived[self.cursor] {
                return;
            }
            self.steps.push(RoleStep::Resumed(slot));
            tracing::trace!(role = %self.name, %slot, "role resumed");
            self.cursor += 1;
        }
    }

    /// Return a completed role to `Idle`, keeping its reservations
    pub fn reset(&mut self) -> QrelayResult<()> {
        match self.state {
            RoleState::Running { .. } => Err(QrelayError::NotCompleted(self.name.clone())),
            RoleState::Idle | RoleState::Completed => {
                self.state = RoleState::Idle;
                self.cursor = 0;
                Ok(())
            }
        }
    }

    /// Release the reservation; returns the freed slots
    pub fn teardown<L: PhysicalLink + ?Sized>(self, link: &mut L) -> QrelayResult<Vec<SlotIndex>> {
        let freed = match self.reservation {
            Some(id) => link.registry_mut(self.node)?.release(id),
            None => Vec::new(),
        };
        tracing::debug!(role = %self.name, node = %self.node, ?freed, "role torn down");
        Ok(freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Network, NodeCapabilities, PairSource, PortWiring};
    use qrelay_core::BellOutcome;
    use qrelay_quantum::DepolarNoise;

    fn slots(indices: &[usize]) -> Vec<SlotIndex> {
        indices.iter().map(|i| SlotIndex::new(*i)).collect()
    }

    /// Station with one source feeding both of its own slots
    fn station(net: &mut Network) -> NodeId {
        let node = net
            .add_node("A", NodeCapabilities::station(), 2, DepolarNoise::None)
            .unwrap();
        net.add_source(PairSource::new(
            node,
            "A-src",
            vec![(BellOutcome::PhiPlus, 1.0)],
            [
                PortWiring::local(SlotRef::new(node, 1)),
                PortWiring::local(SlotRef::new(node, 0)),
            ],
        ))
        .unwrap();
        node
    }

    #[test]
    fn test_slot_conflict() {
        let mut net = Network::with_seed(0);
        let relay = net
            .add_node("R", NodeCapabilities::relay(), 4, DepolarNoise::None)
            .unwrap();
        let _first = EntanglementRole::new(&mut net, relay, RoleKind::Repeater, "first", &slots(&[0, 1])).unwrap();
        let err = EntanglementRole::new(&mut net, relay, RoleKind::Repeater, "second", &slots(&[1, 2]))
            .unwrap_err();
        assert!(matches!(err, QrelayError::SlotConflict { ref owner, .. } if owner == "first"));
        // Failed construction leaves slot 2 free
        let _third = EntanglementRole::new(&mut net, relay, RoleKind::Repeater, "third", &slots(&[2, 3])).unwrap();
    }

    #[test]
    fn test_slot_count_and_capability() {
        let mut net = Network::with_seed(0);
        let relay = net
            .add_node("R", NodeCapabilities::relay(), 4, DepolarNoise::None)
            .unwrap();
        assert!(matches!(
            EntanglementRole::new(&mut net, relay, RoleKind::Repeater, "r", &slots(&[0])),
            Err(QrelayError::SlotCountMismatch { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(
            EntanglementRole::new(&mut net, relay, RoleKind::Source, "s", &[]),
            Err(QrelayError::InvalidConfig(_))
        ));
        assert!(matches!(
            EntanglementRole::from_flags(&mut net, relay, false, true, true, "x", &slots(&[0, 1])),
            Err(QrelayError::UnsupportedRole { .. })
        ));
    }

    #[test]
    fn test_pure_source_completes_after_trigger() {
        let mut net = Network::with_seed(0);
        let a = station(&mut net);
        let mut role = EntanglementRole::new(&mut net, a, RoleKind::Source, "A", &[]).unwrap();
        role.start(&mut net).unwrap();
        assert!(role.is_completed());
        assert_eq!(role.steps().len(), 2);
        assert!(matches!(role.steps()[0], RoleStep::TriggeredSource(_)));
        assert_eq!(role.steps()[1], RoleStep::Completed);
        assert_eq!(net.pending_events(), 2);
    }

    #[test]
    fn test_source_end_node_triggers_and_awaits_both() {
        let mut net = Network::with_seed(0);
        let a = station(&mut net);
        let mut role =
            EntanglementRole::from_flags(&mut net, a, true, false, true, "A", &slots(&[0, 1])).unwrap();
        assert_eq!(role.kind(), RoleKind::SourceEndNode);

        role.start(&mut net).unwrap();
        assert_eq!(role.awaiting(), Some(SlotRef::new(a, 0)));

        let summary = net.run_until_idle(&mut [&mut role]).unwrap();
        assert!(summary.is_settled());
        assert!(role.is_completed());

        // Port 0 fills slot 1 before slot 0 is filled; the early arrival is latched
        let s0 = SlotRef::new(a, 0);
        let s1 = SlotRef::new(a, 1);
        let source = role.source().unwrap();
        assert_eq!(
            role.steps(),
            &[
                RoleStep::TriggeredSource(source),
                RoleStep::Suspended(s0),
                RoleStep::Resumed(s0),
                RoleStep::Suspended(s1),
                RoleStep::Resumed(s1),
                RoleStep::Completed,
            ]
        );
    }

    #[test]
    fn test_reset_then_start_repeats_steps() {
        let mut net = Network::with_seed(0);
        let a = station(&mut net);
        let mut role = EntanglementRole::new(&mut net, a, RoleKind::SourceEndNode, "A", &slots(&[0, 1])).unwrap();

        role.start(&mut net).unwrap();
        assert!(matches!(role.start(&mut net), Err(QrelayError::AlreadyRunning(_))));
        assert!(matches!(role.reset(), Err(QrelayError::NotCompleted(_))));
        net.run_until_idle(&mut [&mut role]).unwrap();
        let first = role.steps().to_vec();

        assert!(matches!(role.start(&mut net), Err(QrelayError::NotReset(_))));
        role.reset().unwrap();
        assert_eq!(role.state(), RoleState::Idle);
        // Reservations survive the reset
        assert!(net.registry(a).unwrap().is_reserved(SlotIndex::new(0)));

        role.start(&mut net).unwrap();
        net.run_until_idle(&mut [&mut role]).unwrap();
        assert_eq!(role.steps(), first.as_slice());
    }

    #[test]
    fn test_repeater_awaits_first_slot_only() {
        let mut net = Network::with_seed(0);
        let a = station(&mut net);
        let relay = net
            .add_node("R", NodeCapabilities::relay(), 2, DepolarNoise::None)
            .unwrap();
        let mut repeater = EntanglementRole::new(&mut net, relay, RoleKind::Repeater, "R", &slots(&[0, 1])).unwrap();
        repeater.start(&mut net).unwrap();
        assert_eq!(repeater.steps(), &[RoleStep::Suspended(SlotRef::new(relay, 0))]);

        // Nothing is wired to the relay: it stalls
        let mut source = EntanglementRole::new(&mut net, a, RoleKind::Source, "A", &[]).unwrap();
        source.start(&mut net).unwrap();
        let summary = net.run_until_idle(&mut [&mut source, &mut repeater]).unwrap();
        assert_eq!(summary.stalled.len(), 1);
        assert!(matches!(
            summary.ensure_settled(),
            Err(QrelayError::StalledAwait { ref protocol, .. }) if protocol == "R"
        ));

        // A foreign arrival does not resume it
        assert!(!repeater.on_arrival(SlotRef::new(a, 0)));
        assert!(repeater.on_arrival(SlotRef::new(relay, 0)));
        assert!(repeater.is_completed());
    }

    #[test]
    fn test_preflight_without_source() {
        let mut net = Network::with_seed(0);
        let bare = net
            .add_node("B", NodeCapabilities::station(), 2, DepolarNoise::None)
            .unwrap();
        let mut role = EntanglementRole::new(&mut net, bare, RoleKind::Source, "B", &[]).unwrap();
        assert!(!role.is_connected(&net));
        assert_eq!(
            role.check_connected(&net),
            Err(QrelayError::SourceNotFound { node: bare, found: 0 })
        );
        assert!(role.start(&mut net).is_err());
        assert_eq!(role.state(), RoleState::Idle);
        assert_eq!(net.pending_events(), 0);
    }

    #[test]
    fn test_connectivity_is_cached() {
        let mut net = Network::with_seed(0);
        let a = station(&mut net);
        let mut role = EntanglementRole::new(&mut net, a, RoleKind::Source, "A", &[]).unwrap();
        assert_eq!(role.source(), None);
        assert!(role.is_connected(&net));
        assert!(role.source().is_some());
    }

    #[test]
    fn test_teardown_releases() {
        let mut net = Network::with_seed(0);
        let relay = net
            .add_node("R", NodeCapabilities::relay(), 2, DepolarNoise::None)
            .unwrap();
        let role = EntanglementRole::new(&mut net, relay, RoleKind::Repeater, "R", &slots(&[0, 1])).unwrap();
        let freed = role.teardown(&mut net).unwrap();
        assert_eq!(freed, slots(&[0, 1]));
        EntanglementRole::new(&mut net, relay, RoleKind::Repeater, "R2", &slots(&[1, 0])).unwrap();
    }
}
