//! Simulated link runtime
//!
//! `Network` owns the nodes, their memories, the pair sources and the
//! quantum state, and drives a single event queue. Sources schedule qubit
//! arrivals; swaps schedule corrections behind the classical delay. Roles
//! are resumed when an arrival lands on the slot they wait for.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use qrelay_core::{
    CorrectionOp, NodeId, QrelayError, QrelayResult, QubitId, SimTime, SlotIndex, SlotRef,
    SourceId,
};
use qrelay_quantum::{DepolarNoise, EngineStats, QuantumEngine};
use qrelay_time::{EventScheduler, SchedulerStats};

use crate::{
    ClassicalChannel, EntanglementRole, EventDriver, MemorySlotRegistry, Node, NodeCapabilities,
    PairSource, PhysicalLink, QuantumBackend, QuantumMemory, RunSummary, StalledRole,
};

/// Event on the link timeline
#[derive(Clone, Debug)]
pub enum LinkEvent {
    /// A qubit reaches a memory slot
    Arrival {
        dest: SlotRef,
        qubit: QubitId,
        /// Depolarization picked up in transit
        transit_noise: f64,
    },
    /// A classical correction message lands
    Correction { target: SlotRef, op: CorrectionOp },
}

/// The three-party link and everything it holds
pub struct Network {
    nodes: BTreeMap<NodeId, Node>,
    sources: BTreeMap<SourceId, PairSource>,
    classical: HashMap<(NodeId, NodeId), ClassicalChannel>,
    engine: QuantumEngine,
    scheduler: EventScheduler<LinkEvent>,
    next_node: u64,
    next_source: u64,
}

impl Network {
    /// Create an empty network whose measurements draw from `seed`
    pub fn with_seed(seed: u64) -> Self {
        Network {
            nodes: BTreeMap::new(),
            sources: BTreeMap::new(),
            classical: HashMap::new(),
            engine: QuantumEngine::with_seed(seed),
            scheduler: EventScheduler::new(),
            next_node: 0,
            next_source: 0,
        }
    }

    /// Add a node with `capacity` memory slots
    pub fn add_node(
        &mut self,
        name: &str,
        capabilities: NodeCapabilities,
        capacity: usize,
        memory_noise: DepolarNoise,
    ) -> QrelayResult<NodeId> {
        memory_noise.validate()?;
        let id = NodeId::new(self.next_node);
        self.next_node += 1;
        let memory = QuantumMemory::new(id, capacity, memory_noise);
        self.nodes.insert(id, Node::new(id, name, capabilities, memory));
        tracing::debug!(node = %id, name, capacity, "node added");
        Ok(id)
    }

    /// Attach a pair source to its node after checking its wiring
    pub fn add_source(&mut self, source: PairSource) -> QrelayResult<SourceId> {
        source.validate()?;
        let host = self.node(source.node)?;
        if !host.capabilities.can_source {
            return Err(QrelayError::InvalidConfig(format!(
                "node {} cannot host pair source {}",
                host.name, source.name
            )));
        }
        for port in &source.ports {
            self.node(port.dest.node)?.memory.slot(port.dest.slot)?;
        }
        if source.ports[0].dest == source.ports[1].dest {
            return Err(QrelayError::InvalidConfig(format!(
                "both ports of {} deliver to {}",
                source.name, source.ports[0].dest
            )));
        }

        let id = SourceId::new(self.next_source);
        self.next_source += 1;
        self.node_mut(source.node)?.sources.push(id);
        tracing::debug!(source = %id, node = %source.node, name = %source.name, "pair source added");
        self.sources.insert(id, source);
        Ok(id)
    }

    /// Connect two nodes with a classical channel in both directions
    pub fn connect_classical(&mut self, a: NodeId, b: NodeId, channel: ClassicalChannel) -> QrelayResult<()> {
        self.node(a)?;
        self.node(b)?;
        self.classical.insert((a, b), channel);
        self.classical.insert((b, a), channel);
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> QrelayResult<&Node> {
        self.nodes.get(&id).ok_or(QrelayError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> QrelayResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(QrelayError::UnknownNode(id))
    }

    pub fn source(&self, id: SourceId) -> QrelayResult<&PairSource> {
        self.sources.get(&id).ok_or(QrelayError::UnknownSource(id))
    }

    /// Qubit currently stored in a slot
    pub fn qubit_at(&self, slot: SlotRef) -> QrelayResult<Option<QubitId>> {
        self.node(slot.node)?.memory.peek(slot.slot)
    }

    pub fn engine_stats(&self) -> &EngineStats {
        self.engine.stats()
    }

    pub fn scheduler_stats(&self) -> &SchedulerStats {
        self.scheduler.stats()
    }

    /// Events still waiting in the queue
    pub fn pending_events(&self) -> usize {
        self.scheduler.pending()
    }

    /// Apply storage noise accumulated since the qubit was last touched
    fn settle(&mut self, slot: SlotRef) -> QrelayResult<()> {
        let now = self.scheduler.now();
        let node = self
            .nodes
            .get_mut(&slot.node)
            .ok_or(QrelayError::UnknownNode(slot.node))?;
        let noise = node.memory.noise();
        let stored = node.memory.slot_mut(slot.slot)?;
        let Some(qubit) = stored.qubit else {
            return Ok(());
        };
        let idle = now - stored.last_touch;
        stored.last_touch = now;
        if noise.is_noiseless() || idle.is_zero() {
            return Ok(());
        }
        self.engine.depolarize(qubit, noise.probability(idle))
    }

    /// Settle and return the qubit held by a slot
    fn stored_qubit(&mut self, slot: SlotRef) -> QrelayResult<QubitId> {
        self.settle(slot)?;
        self.node(slot.node)?.memory.expect_qubit(slot.slot)
    }

    fn deliver(&mut self, dest: SlotRef, qubit: QubitId, transit_noise: f64) -> QrelayResult<()> {
        let now = self.scheduler.now();
        self.engine.depolarize(qubit, transit_noise)?;
        let displaced = self.node_mut(dest.node)?.memory.put(dest.slot, qubit, now)?;
        if let Some(old) = displaced {
            tracing::warn!(slot = %dest, %old, "arrival overwrote a stored qubit");
            self.engine.discard(old)?;
        }
        tracing::trace!(slot = %dest, %qubit, at = %now, "qubit arrived");
        Ok(())
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl PhysicalLink for Network {
    fn capabilities(&self, node: NodeId) -> QrelayResult<NodeCapabilities> {
        Ok(self.node(node)?.capabilities)
    }

    fn slot_capacity(&self, node: NodeId) -> QrelayResult<usize> {
        Ok(self.node(node)?.memory.capacity())
    }

    fn local_sources(&self, node: NodeId) -> QrelayResult<Vec<SourceId>> {
        Ok(self.node(node)?.sources.clone())
    }

    fn registry(&self, node: NodeId) -> QrelayResult<&MemorySlotRegistry> {
        Ok(self.node(node)?.memory.registry())
    }

    fn registry_mut(&mut self, node: NodeId) -> QrelayResult<&mut MemorySlotRegistry> {
        Ok(self.node_mut(node)?.memory.registry_mut())
    }

    fn classical_delay(&self, from: NodeId, to: NodeId) -> QrelayResult<Duration> {
        self.node(from)?;
        self.node(to)?;
        if from == to {
            return Ok(Duration::ZERO);
        }
        self.classical
            .get(&(from, to))
            .map(|c| c.delay)
            .ok_or_else(|| {
                QrelayError::InvalidConfig(format!("no classical channel between {from} and {to}"))
            })
    }
}

impl QuantumBackend for Network {
    fn trigger_source(&mut self, node: NodeId, source: SourceId) -> QrelayResult<()> {
        let pair_source = self.source(source)?;
        if pair_source.node != node {
            return Err(QrelayError::UnknownSource(source));
        }
        let mixture = pair_source.mixture.clone();
        let emission_delay = pair_source.emission_delay;
        let emission_p = pair_source.emission_noise.probability(emission_delay);
        let ports = pair_source.ports;

        let (first, second) = self.engine.create_pair(&mixture)?;
        for (qubit, port) in [first, second].into_iter().zip(ports) {
            self.engine.depolarize(qubit, emission_p)?;
            self.scheduler.schedule_after(
                emission_delay + port.channel.delay,
                LinkEvent::Arrival {
                    dest: port.dest,
                    qubit,
                    transit_noise: port.channel.transit_probability(),
                },
            );
        }
        tracing::debug!(%node, %source, at = %self.scheduler.now(), "pair source triggered");
        Ok(())
    }

    fn execute_local_swap(&mut self, node: NodeId, a: SlotIndex, b: SlotIndex) -> QrelayResult<()> {
        self.settle(SlotRef::new(node, a))?;
        self.settle(SlotRef::new(node, b))?;
        self.node_mut(node)?.memory.swap(a, b)?;
        tracing::trace!(%node, %a, %b, "local swap");
        Ok(())
    }

    fn execute_bell_measurement(&mut self, node: NodeId, a: SlotIndex, b: SlotIndex) -> QrelayResult<u8> {
        let qa = self.stored_qubit(SlotRef::new(node, a))?;
        let qb = self.stored_qubit(SlotRef::new(node, b))?;
        let raw = self.engine.measure_bell(qa, qb)?;
        let memory = &mut self.node_mut(node)?.memory;
        memory.take(a)?;
        memory.take(b)?;
        tracing::debug!(%node, %a, %b, outcome = raw, "Bell measurement");
        Ok(raw)
    }

    fn execute_correction(&mut self, target: SlotRef, op: CorrectionOp) -> QrelayResult<()> {
        let qubit = self.stored_qubit(target)?;
        self.engine.apply_correction(qubit, op)?;
        tracing::debug!(slot = %target, %op, "correction applied");
        Ok(())
    }

    fn fidelity(&mut self, a: SlotRef, b: SlotRef) -> QrelayResult<f64> {
        let qa = self.stored_qubit(a)?;
        let qb = self.stored_qubit(b)?;
        self.engine.fidelity(qa, qb)
    }

    fn discard(&mut self, slot: SlotRef) -> QrelayResult<()> {
        if let Some(qubit) = self.node_mut(slot.node)?.memory.take(slot.slot)? {
            self.engine.discard(qubit)?;
        }
        Ok(())
    }
}

impl EventDriver for Network {
    fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    fn send_correction(&mut self, from: NodeId, target: SlotRef, op: CorrectionOp) -> QrelayResult<()> {
        let delay = self.classical_delay(from, target.node)?;
        self.scheduler
            .schedule_after(delay, LinkEvent::Correction { target, op });
        tracing::trace!(%from, slot = %target, %op, ?delay, "correction sent");
        Ok(())
    }

    fn run_until_idle(&mut self, roles: &mut [&mut EntanglementRole]) -> QrelayResult<RunSummary> {
        let mut delivered = 0;
        while let Some((_, event)) = self.scheduler.pop() {
            delivered += 1;
            match event {
                LinkEvent::Arrival {
                    dest,
                    qubit,
                    transit_noise,
                } => {
                    self.deliver(dest, qubit, transit_noise)?;
                    for role in roles.iter_mut() {
                        role.on_arrival(dest);
                    }
                }
                LinkEvent::Correction { target, op } => self.execute_correction(target, op)?,
            }
        }

        let stalled: Vec<StalledRole> = roles
            .iter()
            .filter_map(|role| {
                role.awaiting().map(|awaiting| StalledRole {
                    protocol: role.name().to_string(),
                    awaiting,
                })
            })
            .collect();
        for role in &stalled {
            tracing::warn!(protocol = %role.protocol, slot = %role.awaiting, "role stalled with an empty event queue");
        }

        Ok(RunSummary {
            delivered,
            finished_at: self.scheduler.now(),
            stalled,
        })
    }
}
