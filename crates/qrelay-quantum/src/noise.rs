//! Depolarizing noise models
//!
//! A model turns an exposure (emission, transit, idle storage) into a
//! depolarization probability for the affected qubit.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use qrelay_core::{QrelayError, QrelayResult};

/// Depolarizing noise applied per exposure
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub enum DepolarNoise {
    /// Noiseless
    #[default]
    None,
    /// Fixed probability, independent of time
    Probability(f64),
    /// Time-dependent rate in Hz: p = 1 - exp(-rate * t)
    Rate(f64),
}

impl DepolarNoise {
    /// Depolarization probability for an exposure of length `elapsed`
    pub fn probability(&self, elapsed: Duration) -> f64 {
        match *self {
            DepolarNoise::None => 0.0,
            DepolarNoise::Probability(p) => p.clamp(0.0, 1.0),
            DepolarNoise::Rate(hz) => {
                if hz <= 0.0 {
                    0.0
                } else {
                    1.0 - (-hz * elapsed.as_secs_f64()).exp()
                }
            }
        }
    }

    #[inline]
    pub fn is_noiseless(&self) -> bool {
        match *self {
            DepolarNoise::None => true,
            DepolarNoise::Probability(p) => p <= 0.0,
            DepolarNoise::Rate(hz) => hz <= 0.0,
        }
    }

    pub fn validate(&self) -> QrelayResult<()> {
        match *self {
            DepolarNoise::None => Ok(()),
            DepolarNoise::Probability(p) if (0.0..=1.0).contains(&p) => Ok(()),
            DepolarNoise::Rate(hz) if hz >= 0.0 && hz.is_finite() => Ok(()),
            other => Err(QrelayError::InvalidConfig(format!(
                "invalid depolarizing noise {other:?}"
            ))),
        }
    }
}
