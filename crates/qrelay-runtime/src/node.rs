//! Nodes, pair sources and channels of the simulated link

use std::time::Duration;

use qrelay_core::{NodeId, QrelayError, QrelayResult, RoleKind, SlotRef, SourceId};
use qrelay_quantum::{BellMixture, DepolarNoise};

use crate::QuantumMemory;

/// Speed of light in standard fibre, km/s
pub const FIBRE_C_KM_PER_S: f64 = 200_000.0;

const MIXTURE_TOLERANCE: f64 = 1e-9;

/// Propagation delay of a fibre of `length_km`
pub fn fibre_delay(length_km: f64, c_km_per_s: f64) -> Duration {
    if length_km <= 0.0 || c_km_per_s <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((length_km / c_km_per_s * 1e9).round() as u64)
}

/// What a node is able to do
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct NodeCapabilities {
    pub can_source: bool,
    pub can_repeat: bool,
    pub can_terminate: bool,
}

impl NodeCapabilities {
    /// End station: emits pairs and terminates links
    pub fn station() -> Self {
        NodeCapabilities {
            can_source: true,
            can_repeat: false,
            can_terminate: true,
        }
    }

    /// Intermediate relay
    pub fn relay() -> Self {
        NodeCapabilities {
            can_source: false,
            can_repeat: true,
            can_terminate: false,
        }
    }

    /// Whether a role of this kind may run here
    pub fn allows(&self, kind: RoleKind) -> bool {
        (!kind.is_source() || self.can_source)
            && (!kind.is_repeater() || self.can_repeat)
            && (!kind.is_end_node() || self.can_terminate)
    }
}

/// A network node
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub capabilities: NodeCapabilities,
    pub memory: QuantumMemory,
    /// Pair sources attached to this node
    pub sources: Vec<SourceId>,
}

impl Node {
    pub fn new(id: NodeId, name: &str, capabilities: NodeCapabilities, memory: QuantumMemory) -> Self {
        Node {
            id,
            name: name.to_string(),
            capabilities,
            memory,
            sources: Vec::new(),
        }
    }
}

/// One-way quantum channel
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct QuantumChannel {
    pub delay: Duration,
    pub noise: DepolarNoise,
}

impl QuantumChannel {
    /// Zero-length local connection
    pub fn local() -> Self {
        QuantumChannel::default()
    }

    pub fn fibre(length_km: f64, c_km_per_s: f64, noise: DepolarNoise) -> Self {
        QuantumChannel {
            delay: fibre_delay(length_km, c_km_per_s),
            noise,
        }
    }

    /// Depolarization probability accumulated in transit
    pub fn transit_probability(&self) -> f64 {
        self.noise.probability(self.delay)
    }
}

/// Classical channel carrying correction messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ClassicalChannel {
    pub delay: Duration,
}

impl ClassicalChannel {
    pub fn fibre(length_km: f64, c_km_per_s: f64) -> Self {
        ClassicalChannel {
            delay: fibre_delay(length_km, c_km_per_s),
        }
    }
}

/// Where one output port of a source delivers its qubit
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PortWiring {
    pub dest: SlotRef,
    pub channel: QuantumChannel,
}

impl PortWiring {
    pub fn local(dest: SlotRef) -> Self {
        PortWiring {
            dest,
            channel: QuantumChannel::local(),
        }
    }

    pub fn remote(dest: SlotRef, channel: QuantumChannel) -> Self {
        PortWiring { dest, channel }
    }
}

/// Entangled pair source.
///
/// Each trigger emits one two-qubit state drawn from `mixture`. Qubit `i`
/// leaves through `ports[i]` after `emission_delay`.
#[derive(Clone, Debug)]
pub struct PairSource {
    pub node: NodeId,
    pub name: String,
    pub mixture: BellMixture,
    pub emission_delay: Duration,
    pub emission_noise: DepolarNoise,
    pub ports: [PortWiring; 2],
}

impl PairSource {
    pub fn new(node: NodeId, name: &str, mixture: BellMixture, ports: [PortWiring; 2]) -> Self {
        PairSource {
            node,
            name: name.to_string(),
            mixture,
            emission_delay: Duration::ZERO,
            emission_noise: DepolarNoise::None,
            ports,
        }
    }

    pub fn with_emission_delay(mut self, delay: Duration) -> Self {
        self.emission_delay = delay;
        self
    }

    pub fn with_emission_noise(mut self, noise: DepolarNoise) -> Self {
        self.emission_noise = noise;
        self
    }

    /// Check the mixture and noise models
    pub fn validate(&self) -> QrelayResult<()> {
        if self.mixture.is_empty() {
            return Err(QrelayError::InvalidConfig(format!(
                "source {} has an empty state mixture",
                self.name
            )));
        }
        if self.mixture.iter().any(|(_, p)| !(0.0..=1.0).contains(p)) {
            return Err(QrelayError::InvalidConfig(format!(
                "source {} has a mixture probability outside [0, 1]",
                self.name
            )));
        }
        let total: f64 = self.mixture.iter().map(|(_, p)| p).sum();
        if (total - 1.0).abs() > MIXTURE_TOLERANCE {
            return Err(QrelayError::InvalidConfig(format!(
                "source {} mixture sums to {total}",
                self.name
            )));
        }
        self.emission_noise.validate()?;
        for port in &self.ports {
            port.channel.noise.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrelay_core::BellOutcome;

    #[test]
    fn test_fibre_delay() {
        // 20 km at 200 000 km/s
        assert_eq!(fibre_delay(20.0, FIBRE_C_KM_PER_S), Duration::from_micros(100));
        assert_eq!(fibre_delay(0.0, FIBRE_C_KM_PER_S), Duration::ZERO);
    }

    #[test]
    fn test_capabilities() {
        let station = NodeCapabilities::station();
        assert!(station.allows(RoleKind::Source));
        assert!(station.allows(RoleKind::SourceEndNode));
        assert!(!station.allows(RoleKind::Repeater));

        let relay = NodeCapabilities::relay();
        assert!(relay.allows(RoleKind::Repeater));
        assert!(!relay.allows(RoleKind::EndNode));
    }

    #[test]
    fn test_source_validate() {
        let node = NodeId::new(0);
        let ports = [
            PortWiring::local(SlotRef::new(node, 0)),
            PortWiring::local(SlotRef::new(node, 1)),
        ];
        let good = PairSource::new(
            node,
            "src",
            vec![(BellOutcome::PhiPlus, 0.8), (BellOutcome::PsiPlus, 0.2)],
            ports,
        );
        assert!(good.validate().is_ok());

        let bad = PairSource::new(node, "src", vec![(BellOutcome::PhiPlus, 0.5)], ports);
        assert!(matches!(bad.validate(), Err(QrelayError::InvalidConfig(_))));

        let empty = PairSource::new(node, "src", Vec::new(), ports);
        assert!(empty.validate().is_err());

        let noisy = good.with_emission_noise(DepolarNoise::Probability(1.5));
        assert!(noisy.validate().is_err());
    }

    #[test]
    fn test_transit_probability() {
        let channel = QuantumChannel::fibre(20.0, FIBRE_C_KM_PER_S, DepolarNoise::Rate(500.0));
        let p = channel.transit_probability();
        assert!((p - (1.0 - (-0.05f64).exp())).abs() < 1e-12);
        assert_eq!(QuantumChannel::local().transit_probability(), 0.0);
    }
}
