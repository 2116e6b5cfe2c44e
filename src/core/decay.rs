//! Exponential-decay scoring over timestamped observations.
//!
//! An observation of age `a` contributes `weight * 2^(-a / half_life)`.
//! Nothing here touches storage; mandates and patterns feed in their rows.

use crate::core::error::HivelogError;
use crate::core::time::MS_PER_DAY;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Positive,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub signal: Signal,
    /// Epoch ms.
    pub timestamp: i64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DecayedTotals {
    pub decayed_positive: f64,
    pub decayed_negative: f64,
    /// Raw observation count, undecayed.
    pub count: usize,
}

impl DecayedTotals {
    pub fn net(&self) -> f64 {
        self.decayed_positive - self.decayed_negative
    }

    pub fn total(&self) -> f64 {
        self.decayed_positive + self.decayed_negative
    }

    /// Positive share of the decayed total; 0 when there is nothing.
    pub fn ratio(&self) -> f64 {
        let total = self.total();
        if total > 0.0 {
            self.decayed_positive / total
        } else {
            0.0
        }
    }

    pub fn negative_ratio(&self) -> f64 {
        let total = self.total();
        if total > 0.0 {
            self.decayed_negative / total
        } else {
            0.0
        }
    }
}

pub fn half_life_ms(days: f64) -> f64 {
    days * MS_PER_DAY as f64
}

/// `2^(-age/half_life)`. Future timestamps count as age 0.
pub fn decayed_value(age_ms: i64, half_life_ms: f64) -> f64 {
    if half_life_ms <= 0.0 {
        return 0.0;
    }
    let age = age_ms.max(0) as f64;
    (-age / half_life_ms).exp2()
}

pub fn aggregate(observations: &[Observation], half_life_days: f64, now: i64) -> DecayedTotals {
    let hl = half_life_ms(half_life_days);
    observations
        .iter()
        .fold(DecayedTotals::default(), |mut acc, obs| {
            let v = obs.weight.max(0.0) * decayed_value(now - obs.timestamp, hl);
            match obs.signal {
                Signal::Positive => acc.decayed_positive += v,
                Signal::Negative => acc.decayed_negative += v,
            }
            acc.count += 1;
            acc
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaturityState {
    Candidate,
    Established,
    Proven,
    Deprecated,
}

impl MaturityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaturityState::Candidate => "candidate",
            MaturityState::Established => "established",
            MaturityState::Proven => "proven",
            MaturityState::Deprecated => "deprecated",
        }
    }
}

impl FromStr for MaturityState {
    type Err = HivelogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candidate" => Ok(MaturityState::Candidate),
            "established" => Ok(MaturityState::Established),
            "proven" => Ok(MaturityState::Proven),
            "deprecated" => Ok(MaturityState::Deprecated),
            _ => Err(HivelogError::ValidationError(format!(
                "Invalid maturity state: {}. Must be one of: candidate, established, proven, deprecated",
                s
            ))),
        }
    }
}

impl fmt::Display for MaturityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaturityThresholds {
    /// Decayed total needed to leave `candidate`.
    pub min_observations: f64,
    /// Decayed positive total needed for `proven`.
    pub min_positive: f64,
    /// Negative ratio must stay below this for `proven`.
    pub max_negative_ratio: f64,
    /// Negative ratio above this forces `deprecated`.
    pub deprecation_ratio: f64,
}

/// Deprecation is checked before promotion.
pub fn classify(totals: &DecayedTotals, t: &MaturityThresholds) -> MaturityState {
    if totals.total() < t.min_observations {
        return MaturityState::Candidate;
    }
    let neg = totals.negative_ratio();
    if neg > t.deprecation_ratio {
        return MaturityState::Deprecated;
    }
    if totals.decayed_positive >= t.min_positive && neg < t.max_negative_ratio {
        return MaturityState::Proven;
    }
    MaturityState::Established
}
