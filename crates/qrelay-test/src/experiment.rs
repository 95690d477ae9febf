//! Link experiments
//!
//! Both experiments build a fresh three-node network from a `LinkConfig`,
//! run the station roles as sources and the relay as a repeater, and tear
//! the roles down afterwards so the same network can host another run.

use qrelay_core::{QrelayResult, RoleKind, SimTime, SlotRef};
use qrelay_link::{LinkConfig, ThreeNodeLayout, TopologyBuilder, STATION_INPUT_SLOT};
use qrelay_runtime::{
    perform_swap, DistillationConfig, DistillationController, DistillationReport,
    DistillationRoles, EntanglementRole, EventDriver, Network, QuantumBackend, SwapRecord,
};

/// Result of the direct-swap experiment
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectSwapResult {
    pub swap: SwapRecord,
    /// F(A, B) after the correction landed
    pub fidelity: f64,
    pub finished_at: SimTime,
}

/// A built link plus the handles needed to drive it
pub struct LinkExperiment {
    network: Network,
    layout: ThreeNodeLayout,
}

impl LinkExperiment {
    pub fn new(config: LinkConfig) -> QrelayResult<Self> {
        let (network, layout) = TopologyBuilder::new(config).build()?;
        Ok(LinkExperiment { network, layout })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn layout(&self) -> &ThreeNodeLayout {
        &self.layout
    }

    /// Source roles on both stations, a repeater on the relay arrival slots
    pub fn standard_roles(&mut self) -> QrelayResult<DistillationRoles> {
        let layout = self.layout;
        let net = &mut self.network;
        let relay_slots = [layout.relay_input(0).slot, layout.relay_input(1).slot];
        Ok(DistillationRoles {
            a: EntanglementRole::new(net, layout.a, RoleKind::Source, "A", &[])?,
            relay: EntanglementRole::new(net, layout.relay, RoleKind::Repeater, "Repeater", &relay_slots)?,
            b: EntanglementRole::new(net, layout.b, RoleKind::Source, "B", &[])?,
        })
    }

    /// One pair per station, one Bell measurement at the relay, correction at B
    pub fn direct_swap(&mut self) -> QrelayResult<DirectSwapResult> {
        let DistillationRoles {
            mut a,
            mut relay,
            mut b,
        } = self.standard_roles()?;
        let result = self.swap_once(&mut a, &mut relay, &mut b);
        for role in [a, relay, b] {
            role.teardown(&mut self.network)?;
        }
        result
    }

    fn swap_once(
        &mut self,
        a: &mut EntanglementRole,
        relay: &mut EntanglementRole,
        b: &mut EntanglementRole,
    ) -> QrelayResult<DirectSwapResult> {
        let layout = self.layout;
        let net = &mut self.network;

        // Pre-flight before anything is triggered
        for role in [&mut *a, &mut *relay, &mut *b] {
            role.check_connected(&*net)?;
        }
        for role in [&mut *a, &mut *relay, &mut *b] {
            role.start(net)?;
        }
        net.run_until_idle(&mut [a, relay, b])?.ensure_settled()?;

        let target = SlotRef::new(layout.b, STATION_INPUT_SLOT);
        let swap = perform_swap(
            net,
            layout.relay,
            (layout.relay_input(0).slot, layout.relay_input(1).slot),
            target,
        )?;
        let summary = net.run_until_idle(&mut [])?;
        summary.ensure_settled()?;

        let fidelity = net.fidelity(SlotRef::new(layout.a, STATION_INPUT_SLOT), target)?;
        tracing::debug!(outcome = %swap.outcome, fidelity, "direct swap finished");
        Ok(DirectSwapResult {
            swap,
            fidelity,
            finished_at: summary.finished_at,
        })
    }

    /// Run the distillation controller over the standard roles
    pub fn distill(&mut self, config: DistillationConfig) -> QrelayResult<DistillationReport> {
        let roles = self.standard_roles()?;
        let mut controller = DistillationController::new(
            &mut self.network,
            "distillation",
            self.layout.distillation(),
            roles,
            config,
        )?;
        let report = controller.run(&mut self.network);
        controller.teardown(&mut self.network)?;
        report
    }
}

/// Build a link from `config` and run the direct-swap experiment on it
pub fn run_direct_swap(config: LinkConfig) -> QrelayResult<DirectSwapResult> {
    LinkExperiment::new(config)?.direct_swap()
}

/// Build a link from `config` and distill one pair per station
pub fn run_distillation(config: LinkConfig, distillation: DistillationConfig) -> QrelayResult<DistillationReport> {
    LinkExperiment::new(config)?.distill(distillation)
}
