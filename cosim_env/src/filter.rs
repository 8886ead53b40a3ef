//! Filter configuration surface.
//!
//! Filters sit on the path between endpoints and delay, drop, jitter or
//! reroute messages. This module only describes them; the runtime applies
//! them.

use crate::error::FederationError;
use crate::types::SimTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a filter attaches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "side", content = "endpoint", rename_all = "snake_case")]
pub enum FilterTarget {
    /// Applies to messages sent from this endpoint.
    Source(String),
    /// Applies to messages addressed to this endpoint.
    Destination(String),
}

impl FilterTarget {
    /// Endpoint name the filter is attached to.
    pub fn endpoint(&self) -> &str {
        match self {
            FilterTarget::Source(name) | FilterTarget::Destination(name) => name,
        }
    }
}

impl fmt::Display for FilterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterTarget::Source(name) => write!(f, "source:{name}"),
            FilterTarget::Destination(name) => write!(f, "destination:{name}"),
        }
    }
}

/// Distribution used by a random-delay filter.
///
/// All distributions are clamped to `[0, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayDistribution {
    /// U(0, max).
    #[default]
    Uniform,
    /// Exponential with mean max/2.
    Exponential,
    /// Normal with mean max/2 and standard deviation max/6.
    Normal,
}

/// Filter behavior and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterSpec {
    /// Fixed delivery delay.
    Delay { delay: SimTime },

    /// Drop each message independently with `probability`.
    RandomDrop { probability: f64 },

    /// Random delivery delay drawn from `distribution`.
    RandomDelay {
        distribution: DelayDistribution,
        max: SimTime,
    },

    /// Redirect messages to another endpoint.
    Reroute { destination: String },
}

impl FilterSpec {
    /// Checks parameter ranges.
    pub fn validate(&self) -> Result<(), FederationError> {
        match self {
            FilterSpec::Delay { delay } if *delay < SimTime::ZERO => Err(
                FederationError::invalid_argument(format!("negative filter delay {delay}")),
            ),
            FilterSpec::RandomDrop { probability }
                if !(0.0..=1.0).contains(probability) =>
            {
                Err(FederationError::invalid_argument(format!(
                    "drop probability {probability} outside [0, 1]"
                )))
            }
            FilterSpec::RandomDelay { max, .. } if *max < SimTime::ZERO => Err(
                FederationError::invalid_argument(format!("negative random delay bound {max}")),
            ),
            FilterSpec::Reroute { destination } if destination.is_empty() => Err(
                FederationError::invalid_argument("reroute filter needs a destination"),
            ),
            _ => Ok(()),
        }
    }

    /// Short type name, as used in configuration files.
    pub fn type_name(&self) -> &'static str {
        match self {
            FilterSpec::Delay { .. } => "delay",
            FilterSpec::RandomDrop { .. } => "random_drop",
            FilterSpec::RandomDelay { .. } => "random_delay",
            FilterSpec::Reroute { .. } => "reroute",
        }
    }
}
