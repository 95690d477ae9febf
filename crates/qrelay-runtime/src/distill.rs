//! Distillation controller
//!
//! Each attempt runs two rounds of the three roles. The first round's
//! qubits are parked in accumulator slots, the second round refills the
//! input slots, and the relay Bell-measures the two halves it holds for
//! each endpoint. The correction lands on the station accumulator, leaving
//! each station with a retained pair across its input and accumulator.

use serde::{Deserialize, Serialize};

use qrelay_core::{
    BellOutcome, CorrectionOp, NodeId, QrelayError, QrelayResult, SimTime, SlotIndex, SlotRef,
};

use crate::{
    perform_swap, EntanglementRole, LinkContext, PhysicalLink, ReservationId, SwapRecord,
};

/// When an attempt's retained pairs are kept
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub enum AcceptancePolicy {
    /// Keep whatever pairs remain after the measurements
    #[default]
    Unconditional,
    /// Keep the pairs only if both links reach `threshold`, otherwise regenerate
    MinFidelity { threshold: f64 },
}

impl AcceptancePolicy {
    pub fn accepts(&self, a: &LinkResult, b: &LinkResult) -> bool {
        match *self {
            AcceptancePolicy::Unconditional => true,
            AcceptancePolicy::MinFidelity { threshold } => {
                a.fidelity >= threshold && b.fidelity >= threshold
            }
        }
    }
}

/// Distillation configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistillationConfig {
    pub policy: AcceptancePolicy,
    /// Attempts before giving up; each attempt consumes four raw pairs
    pub max_attempts: u32,
}

impl Default for DistillationConfig {
    fn default() -> Self {
        DistillationConfig {
            policy: AcceptancePolicy::Unconditional,
            max_attempts: 1,
        }
    }
}

impl DistillationConfig {
    /// Reject-and-regenerate until both links reach `threshold`
    pub fn min_fidelity(threshold: f64, max_attempts: u32) -> Self {
        DistillationConfig {
            policy: AcceptancePolicy::MinFidelity { threshold },
            max_attempts,
        }
    }

    pub fn validate(&self) -> QrelayResult<()> {
        if self.max_attempts == 0 {
            return Err(QrelayError::InvalidConfig(
                "distillation needs at least one attempt".into(),
            ));
        }
        if let AcceptancePolicy::MinFidelity { threshold } = self.policy {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(QrelayError::InvalidConfig(format!(
                    "fidelity threshold {threshold} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// Slot map of the three-node link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DistillationLayout {
    pub a: NodeId,
    pub relay: NodeId,
    pub b: NodeId,
    /// Station slot each round's local half lands in
    pub station_input: SlotIndex,
    pub station_accumulator: SlotIndex,
    /// Relay arrival slots, A side then B side
    pub relay_inputs: [SlotIndex; 2],
    pub relay_accumulators: [SlotIndex; 2],
}

impl DistillationLayout {
    /// Stations use slots 0/1, the relay 0/1 for arrivals and 2/3 as accumulators
    pub fn standard(a: NodeId, relay: NodeId, b: NodeId) -> Self {
        DistillationLayout {
            a,
            relay,
            b,
            station_input: SlotIndex::new(0),
            station_accumulator: SlotIndex::new(1),
            relay_inputs: [SlotIndex::new(0), SlotIndex::new(1)],
            relay_accumulators: [SlotIndex::new(2), SlotIndex::new(3)],
        }
    }

    fn validate(&self) -> QrelayResult<()> {
        if self.a == self.relay || self.b == self.relay || self.a == self.b {
            return Err(QrelayError::InvalidConfig(
                "distillation needs three distinct nodes".into(),
            ));
        }
        if self.station_input == self.station_accumulator {
            return Err(QrelayError::InvalidConfig(
                "station input and accumulator share a slot".into(),
            ));
        }
        let relay = [
            self.relay_inputs[0],
            self.relay_inputs[1],
            self.relay_accumulators[0],
            self.relay_accumulators[1],
        ];
        for (i, slot) in relay.iter().enumerate() {
            if relay[..i].contains(slot) {
                return Err(QrelayError::InvalidConfig(format!(
                    "relay slot {slot} used twice"
                )));
            }
        }
        Ok(())
    }

    /// Station at the end of link `side`: 0 is A, 1 is B
    fn station(&self, side: usize) -> NodeId {
        if side == 0 {
            self.a
        } else {
            self.b
        }
    }
}

/// The three role instances driven by a controller
#[derive(Debug)]
pub struct DistillationRoles {
    pub a: EntanglementRole,
    pub relay: EntanglementRole,
    pub b: EntanglementRole,
}

impl DistillationRoles {
    pub fn all(&self) -> [&EntanglementRole; 3] {
        [&self.a, &self.relay, &self.b]
    }

    pub fn all_mut(&mut self) -> [&mut EntanglementRole; 3] {
        [&mut self.a, &mut self.relay, &mut self.b]
    }
}

/// Transient record of one round within an attempt
#[derive(Clone, Debug, PartialEq)]
pub struct DistillationRound {
    pub index: u8,
    /// Provisional pair per link: (station slot, relay slot)
    pub pairs: [(SlotRef, SlotRef); 2],
    /// Where the round's pairs were moved by consolidation
    pub swap_targets: Option<[(SlotRef, SlotRef); 2]>,
    pub accepted: Option<bool>,
}

/// Outcome for one station after an attempt
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkResult {
    pub outcome: BellOutcome,
    pub correction: CorrectionOp,
    /// First-round pair fidelity before the measurement
    pub raw_fidelity: f64,
    /// Retained pair fidelity after correction
    pub fidelity: f64,
}

impl LinkResult {
    fn new(swap: &SwapRecord, raw_fidelity: f64, fidelity: f64) -> Self {
        LinkResult {
            outcome: swap.outcome,
            correction: swap.correction,
            raw_fidelity,
            fidelity,
        }
    }
}

/// Result of an accepted distillation run
#[derive(Clone, Debug, PartialEq)]
pub struct DistillationReport {
    /// Attempts used, including the accepted one
    pub attempts: u32,
    pub a: LinkResult,
    pub b: LinkResult,
    pub finished_at: SimTime,
}

/// Two-round consolidate-and-measure loop over three roles
#[derive(Debug)]
pub struct DistillationController {
    name: String,
    layout: DistillationLayout,
    roles: DistillationRoles,
    config: DistillationConfig,
    reservations: Vec<(NodeId, ReservationId)>,
}

impl DistillationController {
    /// Check the roles against the layout, run the pre-flight connectivity
    /// check and reserve the accumulator slots.
    ///
    /// On failure nothing stays reserved: the roles are torn down as well.
    pub fn new<L: PhysicalLink + ?Sized>(
        link: &mut L,
        name: &str,
        layout: DistillationLayout,
        mut roles: DistillationRoles,
        config: DistillationConfig,
    ) -> QrelayResult<Self> {
        let reservations = match prepare(link, name, &layout, &mut roles, &config) {
            Ok(reservations) => reservations,
            Err(err) => {
                let DistillationRoles { a, relay, b } = roles;
                for role in [a, relay, b] {
                    role.teardown(link)?;
                }
                return Err(err);
            }
        };

        tracing::debug!(controller = name, ?config, "distillation controller ready");
        Ok(DistillationController {
            name: name.to_string(),
            layout,
            roles,
            config,
            reservations,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &DistillationLayout {
        &self.layout
    }

    pub fn config(&self) -> &DistillationConfig {
        &self.config
    }

    pub fn roles(&self) -> &DistillationRoles {
        &self.roles
    }

    /// Run attempts until the policy accepts or the budget runs out
    pub fn run<L: LinkContext + ?Sized>(&mut self, link: &mut L) -> QrelayResult<DistillationReport> {
        let mut best_fidelity = 0.0f64;
        for attempt in 1..=self.config.max_attempts {
            let (mut rounds, a, b) = self.attempt(link)?;
            let accepted = self.config.policy.accepts(&a, &b);
            for round in rounds.iter_mut() {
                round.accepted = Some(accepted);
            }
            tracing::debug!(
                controller = %self.name,
                attempt,
                accepted,
                fidelity_a = a.fidelity,
                fidelity_b = b.fidelity,
                ?rounds,
                "distillation attempt finished"
            );
            self.reset_roles()?;

            if accepted {
                return Ok(DistillationReport {
                    attempts: attempt,
                    a,
                    b,
                    finished_at: link.now(),
                });
            }
            best_fidelity = best_fidelity.max(a.fidelity.min(b.fidelity));
            self.discard_retained(link)?;
        }

        tracing::warn!(controller = %self.name, attempts = self.config.max_attempts, best_fidelity, "distillation gave up");
        Err(QrelayError::RetryBudgetExhausted {
            attempts: self.config.max_attempts,
            best_fidelity,
        })
    }

    fn attempt<L: LinkContext + ?Sized>(
        &mut self,
        link: &mut L,
    ) -> QrelayResult<([DistillationRound; 2], LinkResult, LinkResult)> {
        let layout = self.layout;

        let mut first = self.run_round(link, 1)?;
        link.execute_local_swap(layout.a, layout.station_input, layout.station_accumulator)?;
        link.execute_local_swap(layout.b, layout.station_input, layout.station_accumulator)?;
        for side in 0..2 {
            link.execute_local_swap(layout.relay, layout.relay_inputs[side], layout.relay_accumulators[side])?;
        }
        first.swap_targets = Some([self.parked(0), self.parked(1)]);
        self.reset_roles()?;

        let second = self.run_round(link, 2)?;

        let mut raw = [0.0; 2];
        for (side, (station, relay)) in [self.parked(0), self.parked(1)].into_iter().enumerate() {
            raw[side] = link.fidelity(station, relay)?;
        }

        let mut swaps = Vec::with_capacity(2);
        for side in 0..2 {
            let target = SlotRef::new(layout.station(side), layout.station_accumulator);
            swaps.push(perform_swap(
                link,
                layout.relay,
                (layout.relay_inputs[side], layout.relay_accumulators[side]),
                target,
            )?);
        }
        link.run_until_idle(&mut [])?.ensure_settled()?;

        let mut results = Vec::with_capacity(2);
        for (side, swap) in swaps.iter().enumerate() {
            let node = layout.station(side);
            let fidelity = link.fidelity(
                SlotRef::new(node, layout.station_input),
                SlotRef::new(node, layout.station_accumulator),
            )?;
            results.push(LinkResult::new(swap, raw[side], fidelity));
        }
        Ok(([first, second], results[0], results[1]))
    }

    /// Accumulator pair of link `side`
    fn parked(&self, side: usize) -> (SlotRef, SlotRef) {
        (
            SlotRef::new(self.layout.station(side), self.layout.station_accumulator),
            SlotRef::new(self.layout.relay, self.layout.relay_accumulators[side]),
        )
    }

    fn run_round<L: LinkContext + ?Sized>(&mut self, link: &mut L, index: u8) -> QrelayResult<DistillationRound> {
        for role in self.roles.all_mut() {
            role.start(link)?;
        }
        let DistillationRoles { a, relay, b } = &mut self.roles;
        let summary = link.run_until_idle(&mut [a, relay, b])?;
        summary.ensure_settled()?;
        tracing::trace!(controller = %self.name, round = index, delivered = summary.delivered, "round complete");

        let layout = &self.layout;
        Ok(DistillationRound {
            index,
            pairs: [0, 1].map(|side| {
                (
                    SlotRef::new(layout.station(side), layout.station_input),
                    SlotRef::new(layout.relay, layout.relay_inputs[side]),
                )
            }),
            swap_targets: None,
            accepted: None,
        })
    }

    fn reset_roles(&mut self) -> QrelayResult<()> {
        for role in self.roles.all_mut() {
            role.reset()?;
        }
        Ok(())
    }

    fn discard_retained<L: LinkContext + ?Sized>(&mut self, link: &mut L) -> QrelayResult<()> {
        for side in 0..2 {
            let node = self.layout.station(side);
            link.discard(SlotRef::new(node, self.layout.station_input))?;
            link.discard(SlotRef::new(node, self.layout.station_accumulator))?;
        }
        Ok(())
    }

    /// Release the accumulators and tear down the roles
    pub fn teardown<L: PhysicalLink + ?Sized>(self, link: &mut L) -> QrelayResult<()> {
        release_all(link, &self.reservations)?;
        let DistillationRoles { a, relay, b } = self.roles;
        for role in [a, relay, b] {
            role.teardown(link)?;
        }
        Ok(())
    }
}

fn prepare<L: PhysicalLink + ?Sized>(
    link: &mut L,
    name: &str,
    layout: &DistillationLayout,
    roles: &mut DistillationRoles,
    config: &DistillationConfig,
) -> QrelayResult<Vec<(NodeId, ReservationId)>> {
    config.validate()?;
    layout.validate()?;
    for (role, node) in roles.all().into_iter().zip([layout.a, layout.relay, layout.b]) {
        if role.node() != node {
            return Err(QrelayError::InvalidConfig(format!(
                "role {} runs on {} but the layout expects {node}",
                role.name(),
                role.node()
            )));
        }
    }
    for role in roles.all_mut() {
        role.check_connected(&*link)?;
    }

    let wanted = [
        (layout.a, vec![layout.station_accumulator]),
        (layout.b, vec![layout.station_accumulator]),
        (layout.relay, layout.relay_accumulators.to_vec()),
    ];
    let mut reservations = Vec::with_capacity(wanted.len());
    for (node, slots) in wanted {
        match link.registry_mut(node).and_then(|r| r.reserve(&slots, name)) {
            Ok(id) => reservations.push((node, id)),
            Err(err) => {
                release_all(link, &reservations)?;
                return Err(err);
            }
        }
    }
    Ok(reservations)
}

fn release_all<L: PhysicalLink + ?Sized>(link: &mut L, reservations: &[(NodeId, ReservationId)]) -> QrelayResult<()> {
    for (node, id) in reservations {
        link.registry_mut(*node)?.release(*id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ClassicalChannel, Network, NodeCapabilities, PairSource, PortWiring, QuantumChannel,
        RoleState, FIBRE_C_KM_PER_S,
    };
    use qrelay_core::RoleKind;
    use qrelay_quantum::{BellMixture, DepolarNoise};

    fn network(mixture: BellMixture, wire_a_to_relay: bool) -> (Network, DistillationLayout) {
        let mut net = Network::with_seed(11);
        let a = net
            .add_node("A", NodeCapabilities::station(), 2, DepolarNoise::None)
            .unwrap();
        let relay = net
            .add_node("R", NodeCapabilities::relay(), 4, DepolarNoise::None)
            .unwrap();
        let b = net
            .add_node("B", NodeCapabilities::station(), 2, DepolarNoise::None)
            .unwrap();

        for (side, station) in [a, b].into_iter().enumerate() {
            let far = if side == 0 && !wire_a_to_relay {
                SlotRef::new(a, 1)
            } else {
                SlotRef::new(relay, side)
            };
            net.add_source(PairSource::new(
                station,
                "src",
                mixture.clone(),
                [
                    PortWiring::remote(far, QuantumChannel::fibre(10.0, FIBRE_C_KM_PER_S, DepolarNoise::None)),
                    PortWiring::local(SlotRef::new(station, 0)),
                ],
            ))
            .unwrap();
            net.connect_classical(relay, station, ClassicalChannel::fibre(10.0, FIBRE_C_KM_PER_S))
                .unwrap();
        }
        (net, DistillationLayout::standard(a, relay, b))
    }

    fn roles(net: &mut Network, layout: &DistillationLayout) -> DistillationRoles {
        DistillationRoles {
            a: EntanglementRole::new(net, layout.a, RoleKind::Source, "A", &[]).unwrap(),
            relay: EntanglementRole::new(
                net,
                layout.relay,
                RoleKind::Repeater,
                "R",
                &layout.relay_inputs,
            )
            .unwrap(),
            b: EntanglementRole::new(net, layout.b, RoleKind::Source, "B", &[]).unwrap(),
        }
    }

    fn pure() -> BellMixture {
        vec![(BellOutcome::PhiPlus, 1.0)]
    }

    #[test]
    fn test_noiseless_distillation() {
        let (mut net, layout) = network(pure(), true);
        let roles = roles(&mut net, &layout);
        let mut controller =
            DistillationController::new(&mut net, "distill", layout, roles, DistillationConfig::default())
                .unwrap();

        let report = controller.run(&mut net).unwrap();
        assert_eq!(report.attempts, 1);
        for link in [report.a, report.b] {
            assert!((link.raw_fidelity - 1.0).abs() < 1e-9);
            assert!((link.fidelity - 1.0).abs() < 1e-9);
            assert_eq!(link.correction, link.outcome.correction());
        }
        // Two 50 us rounds, then a 50 us classical hop for the corrections
        assert_eq!(report.finished_at, SimTime::from_micros(150));

        for role in controller.roles().all() {
            assert_eq!(role.state(), RoleState::Idle);
        }
        assert!(net.registry(layout.relay).unwrap().is_reserved(SlotIndex::new(0)));
    }

    #[test]
    fn test_repeated_runs_reuse_wiring() {
        let (mut net, layout) = network(pure(), true);
        let roles = roles(&mut net, &layout);
        let mut controller =
            DistillationController::new(&mut net, "distill", layout, roles, DistillationConfig::default())
                .unwrap();
        controller.run(&mut net).unwrap();
        controller.discard_retained(&mut net).unwrap();
        let second = controller.run(&mut net).unwrap();
        assert!((second.a.fidelity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_exhausts_budget() {
        let mixture = vec![(BellOutcome::PhiPlus, 0.8), (BellOutcome::PsiPlus, 0.2)];
        let (mut net, layout) = network(mixture, true);
        let roles = roles(&mut net, &layout);
        let mut controller = DistillationController::new(
            &mut net,
            "distill",
            layout,
            roles,
            DistillationConfig::min_fidelity(0.9, 3),
        )
        .unwrap();

        match controller.run(&mut net) {
            Err(QrelayError::RetryBudgetExhausted {
                attempts,
                best_fidelity,
            }) => {
                assert_eq!(attempts, 3);
                // One bit-flip out of two pairs survives: 0.8^2 + 0.2^2
                assert!((best_fidelity - 0.68).abs() < 1e-9);
            }
            other => panic!("expected exhausted budget, got {other:?}"),
        }
        // Rejected pairs were discarded
        assert_eq!(net.qubit_at(SlotRef::new(layout.a, 0)).unwrap(), None);
    }

    #[test]
    fn test_accumulators_are_exclusive() {
        let (mut net, layout) = network(pure(), true);
        let squatter = EntanglementRole::new(
            &mut net,
            layout.relay,
            RoleKind::Repeater,
            "squatter",
            &[SlotIndex::new(3), SlotIndex::new(2)],
        )
        .unwrap();
        let roles = roles(&mut net, &layout);
        let err = DistillationController::new(&mut net, "distill", layout, roles, DistillationConfig::default())
            .unwrap_err();
        assert!(matches!(err, QrelayError::SlotConflict { ref owner, .. } if owner == "squatter"));
        // Station accumulators reserved before the failure were handed back,
        // and so were the relay role's arrival slots
        assert!(!net.registry(layout.a).unwrap().is_reserved(SlotIndex::new(1)));
        assert!(!net.registry(layout.relay).unwrap().is_reserved(SlotIndex::new(0)));
        squatter.teardown(&mut net).unwrap();
    }

    #[test]
    fn test_preflight_rejects_missing_source() {
        let mut net = Network::with_seed(0);
        let a = net
            .add_node("A", NodeCapabilities::station(), 2, DepolarNoise::None)
            .unwrap();
        let relay = net
            .add_node("R", NodeCapabilities::relay(), 4, DepolarNoise::None)
            .unwrap();
        let b = net
            .add_node("B", NodeCapabilities::station(), 2, DepolarNoise::None)
            .unwrap();
        let layout = DistillationLayout::standard(a, relay, b);
        let roles = roles(&mut net, &layout);
        let err = DistillationController::new(&mut net, "distill", layout, roles, DistillationConfig::default())
            .unwrap_err();
        assert_eq!(err, QrelayError::SourceNotFound { node: a, found: 0 });
    }

    #[test]
    fn test_stalled_relay_is_reported() {
        let (mut net, layout) = network(pure(), false);
        let roles = roles(&mut net, &layout);
        let mut controller =
            DistillationController::new(&mut net, "distill", layout, roles, DistillationConfig::default())
                .unwrap();
        let err = controller.run(&mut net).unwrap_err();
        assert_eq!(
            err,
            QrelayError::StalledAwait {
                protocol: "R".into(),
                node: layout.relay,
                slot: SlotIndex::new(0),
            }
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(DistillationConfig::default().validate().is_ok());
        assert!(DistillationConfig::min_fidelity(0.9, 0).validate().is_err());
        assert!(DistillationConfig::min_fidelity(1.2, 2).validate().is_err());

        let json = serde_json::to_string(&DistillationConfig::min_fidelity(0.95, 4)).unwrap();
        let back: DistillationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DistillationConfig::min_fidelity(0.95, 4));
    }

    #[test]
    fn test_teardown_frees_everything() {
        let (mut net, layout) = network(pure(), true);
        let roles = roles(&mut net, &layout);
        let controller =
            DistillationController::new(&mut net, "distill", layout, roles, DistillationConfig::default())
                .unwrap();
        controller.teardown(&mut net).unwrap();
        assert!(net.registry(layout.relay).unwrap().reserved_slots().is_empty());
        assert!(net.registry(layout.a).unwrap().reserved_slots().is_empty());
    }
}
