//! Link configuration
//!
//! Two end stations and one relay. Each station owns a pair source whose
//! port 0 crosses the quantum channel to the relay and whose port 1 stays
//! in the station's own memory.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use qrelay_core::{BellOutcome, QrelayError, QrelayResult};
use qrelay_quantum::{BellMixture, DepolarNoise};
use qrelay_runtime::{fibre_delay, FIBRE_C_KM_PER_S};

/// Fibre segment between a station and the relay
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FibreConfig {
    pub length_km: f64,
    /// Propagation speed, km/s
    pub c_km_per_s: f64,
}

impl FibreConfig {
    pub fn new(length_km: f64) -> Self {
        FibreConfig {
            length_km,
            c_km_per_s: FIBRE_C_KM_PER_S,
        }
    }

    pub fn delay(&self) -> Duration {
        fibre_delay(self.length_km, self.c_km_per_s)
    }

    fn validate(&self, what: &str) -> QrelayResult<()> {
        if !self.length_km.is_finite() || self.length_km < 0.0 {
            return Err(QrelayError::InvalidConfig(format!(
                "{what}: fibre length {} km",
                self.length_km
            )));
        }
        if !self.c_km_per_s.is_finite() || self.c_km_per_s <= 0.0 {
            return Err(QrelayError::InvalidConfig(format!(
                "{what}: propagation speed {} km/s",
                self.c_km_per_s
            )));
        }
        Ok(())
    }
}

/// Pair source of a station
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Bell states emitted and their probabilities
    pub mixture: BellMixture,
    pub emission_delay_ns: u64,
    pub emission_noise: DepolarNoise,
}

impl SourceConfig {
    /// Always emits Φ+
    pub fn ideal() -> Self {
        SourceConfig {
            mixture: vec![(BellOutcome::PhiPlus, 1.0)],
            emission_delay_ns: 0,
            emission_noise: DepolarNoise::None,
        }
    }

    /// Emits Φ+ with `target_probability`, Ψ+ otherwise
    pub fn mixed(target_probability: f64) -> Self {
        SourceConfig {
            mixture: vec![
                (BellOutcome::PhiPlus, target_probability),
                (BellOutcome::PsiPlus, 1.0 - target_probability),
            ],
            ..Self::ideal()
        }
    }

    pub fn emission_delay(&self) -> Duration {
        Duration::from_nanos(self.emission_delay_ns)
    }
}

/// End station
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    pub name: String,
    /// Input slot plus accumulator
    pub memory_slots: usize,
    pub memory_noise: DepolarNoise,
    pub source: Option<SourceConfig>,
    /// Quantum fibre toward the relay
    pub quantum: FibreConfig,
    pub channel_noise: DepolarNoise,
    /// Classical fibre to and from the relay
    pub classical: FibreConfig,
}

impl StationConfig {
    fn noiseless(name: &str, distance_km: f64) -> Self {
        StationConfig {
            name: name.to_string(),
            memory_slots: 2,
            memory_noise: DepolarNoise::None,
            source: Some(SourceConfig::ideal()),
            quantum: FibreConfig::new(distance_km),
            channel_noise: DepolarNoise::None,
            classical: FibreConfig::new(distance_km),
        }
    }

    fn validate(&self) -> QrelayResult<()> {
        if self.memory_slots < 2 {
            return Err(QrelayError::InvalidConfig(format!(
                "station {} needs at least 2 memory slots, has {}",
                self.name, self.memory_slots
            )));
        }
        self.memory_noise.validate()?;
        self.channel_noise.validate()?;
        self.quantum.validate(&self.name)?;
        self.classical.validate(&self.name)?;
        if let Some(source) = &self.source {
            validate_mixture(&self.name, &source.mixture)?;
            source.emission_noise.validate()?;
        }
        Ok(())
    }
}

/// Intermediate relay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub name: String,
    /// Two arrival slots, plus two accumulators for distillation
    pub memory_slots: usize,
    pub memory_noise: DepolarNoise,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            name: "Repeater".into(),
            memory_slots: 4,
            memory_noise: DepolarNoise::None,
        }
    }
}

/// Full three-node link description
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub a: StationConfig,
    pub relay: RelayConfig,
    pub b: StationConfig,
    /// Seed for measurement outcome sampling
    pub seed: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::noiseless(25.0)
    }
}

impl LinkConfig {
    /// Ideal sources, no noise anywhere, both stations `distance_km` from the relay
    pub fn noiseless(distance_km: f64) -> Self {
        LinkConfig {
            a: StationConfig::noiseless("A", distance_km),
            relay: RelayConfig::default(),
            b: StationConfig::noiseless("B", distance_km),
            seed: 0,
        }
    }

    /// Mixed sources and noisy hardware.
    ///
    /// Sources emit Φ+ with `target_probability` (Ψ+ otherwise) and depolarize
    /// each emitted qubit with probability 0.1. Station memories depolarize
    /// at 1 kHz. A's source is slowed by a 100 µs emission delay and its
    /// 20 km fibre depolarizes at 500 Hz; B's fibre is clean.
    pub fn noisy(target_probability: f64) -> Self {
        let source = SourceConfig {
            emission_noise: DepolarNoise::Probability(0.1),
            ..SourceConfig::mixed(target_probability)
        };
        let station = |name: &str| StationConfig {
            name: name.to_string(),
            memory_slots: 2,
            memory_noise: DepolarNoise::Rate(1000.0),
            source: Some(source.clone()),
            quantum: FibreConfig::new(20.0),
            channel_noise: DepolarNoise::None,
            classical: FibreConfig::new(20.0),
        };

        let mut a = station("A");
        a.channel_noise = DepolarNoise::Rate(500.0);
        if let Some(source) = a.source.as_mut() {
            source.emission_delay_ns = 100_000;
        }

        LinkConfig {
            a,
            relay: RelayConfig::default(),
            b: station("B"),
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Both stations in A, B order
    pub fn stations(&self) -> [&StationConfig; 2] {
        [&self.a, &self.b]
    }

    pub fn validate(&self) -> QrelayResult<()> {
        for station in self.stations() {
            station.validate()?;
        }
        if self.relay.memory_slots < 2 {
            return Err(QrelayError::InvalidConfig(format!(
                "relay {} needs at least 2 memory slots, has {}",
                self.relay.name, self.relay.memory_slots
            )));
        }
        self.relay.memory_noise.validate()
    }

    /// Parse and validate a JSON description
    pub fn from_json(json: &str) -> QrelayResult<Self> {
        let config: LinkConfig =
            serde_json::from_str(json).map_err(|e| QrelayError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> QrelayResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| QrelayError::InvalidConfig(e.to_string()))
    }
}

fn validate_mixture(owner: &str, mixture: &[(BellOutcome, f64)]) -> QrelayResult<()> {
    if mixture.is_empty() {
        return Err(QrelayError::InvalidConfig(format!("{owner}: empty source mixture")));
    }
    if let Some((state, p)) = mixture.iter().find(|(_, p)| !(0.0..=1.0).contains(p)) {
        return Err(QrelayError::InvalidConfig(format!(
            "{owner}: probability {p} for {state} outside [0, 1]"
        )));
    }
    let total: f64 = mixture.iter().map(|(_, p)| p).sum();
    if (total - 1.0).abs() > 1e-9 {
        return Err(QrelayError::InvalidConfig(format!(
            "{owner}: source mixture sums to {total}"
        )));
    }
    Ok(())
}
