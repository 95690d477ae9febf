//! Topology builder
//!
//! Every experiment variant goes through this one path from `LinkConfig`
//! to a wired `Network`.

use qrelay_core::{NodeId, QrelayResult, SlotIndex, SlotRef, SourceId};
use qrelay_runtime::{
    ClassicalChannel, DistillationLayout, Network, NodeCapabilities, PairSource, PortWiring,
    QuantumChannel,
};

use crate::{LinkConfig, StationConfig};

/// Station slot receiving each pair's local half
pub const STATION_INPUT_SLOT: SlotIndex = SlotIndex(0);

/// Handles to the nodes of a built link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreeNodeLayout {
    pub a: NodeId,
    pub relay: NodeId,
    pub b: NodeId,
    /// Pair source of each station, A then B
    pub sources: [Option<SourceId>; 2],
}

impl ThreeNodeLayout {
    /// Relay slot fed by station `side` (0 is A, 1 is B)
    pub fn relay_input(&self, side: usize) -> SlotRef {
        SlotRef::new(self.relay, side)
    }

    pub fn station(&self, side: usize) -> NodeId {
        if side == 0 {
            self.a
        } else {
            self.b
        }
    }

    pub fn distillation(&self) -> DistillationLayout {
        DistillationLayout::standard(self.a, self.relay, self.b)
    }
}

/// Builds the three-node network described by a `LinkConfig`
pub struct TopologyBuilder {
    config: LinkConfig,
}

impl TopologyBuilder {
    pub fn new(config: LinkConfig) -> Self {
        TopologyBuilder { config }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn build(&self) -> QrelayResult<(Network, ThreeNodeLayout)> {
        let config = &self.config;
        config.validate()?;

        let mut net = Network::with_seed(config.seed);
        let a = add_station(&mut net, &config.a)?;
        let relay = net.add_node(
            &config.relay.name,
            NodeCapabilities::relay(),
            config.relay.memory_slots,
            config.relay.memory_noise,
        )?;
        let b = add_station(&mut net, &config.b)?;

        let mut sources = [None; 2];
        for (side, (station, node)) in config.stations().into_iter().zip([a, b]).enumerate() {
            let classical =
                ClassicalChannel::fibre(station.classical.length_km, station.classical.c_km_per_s);
            net.connect_classical(node, relay, classical)?;

            let Some(source) = &station.source else {
                continue;
            };
            let to_relay = PortWiring::remote(
                SlotRef::new(relay, side),
                QuantumChannel {
                    delay: station.quantum.delay(),
                    noise: station.channel_noise,
                },
            );
            let local = PortWiring::local(SlotRef::new(node, STATION_INPUT_SLOT));
            let pair_source = PairSource::new(
                node,
                &format!("QSource_{}", station.name),
                source.mixture.clone(),
                [to_relay, local],
            )
            .with_emission_delay(source.emission_delay())
            .with_emission_noise(source.emission_noise);
            sources[side] = Some(net.add_source(pair_source)?);
        }

        tracing::debug!(%a, %relay, %b, seed = config.seed, "link topology built");
        Ok((
            net,
            ThreeNodeLayout {
                a,
                relay,
                b,
                sources,
            },
        ))
    }
}

fn add_station(net: &mut Network, station: &StationConfig) -> QrelayResult<NodeId> {
    net.add_node(
        &station.name,
        NodeCapabilities::station(),
        station.memory_slots,
        station.memory_noise,
    )
}
