//! Participant configuration.

use crate::types::SimTime;
use serde::{Deserialize, Serialize};

/// Configuration a participant hands to the runtime when it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederateInfo {
    /// Unique participant name within the federation.
    pub name: String,

    /// Time grid the participant is granted on. `ZERO` means no grid.
    pub period: SimTime,

    /// Offset of the period grid.
    pub offset: SimTime,

    /// Minimum advance for non-iterative requests.
    pub time_delta: SimTime,

    /// Runtime-side cap on re-offers of the same instant.
    pub max_iterations: u32,

    /// If false, pending messages and values may pull the grant earlier
    /// than the requested time.
    pub uninterruptible: bool,
}

impl Default for FederateInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            period: SimTime::ZERO,
            offset: SimTime::ZERO,
            time_delta: SimTime::EPSILON,
            max_iterations: 50,
            uninterruptible: false,
        }
    }
}

impl FederateInfo {
    /// Creates a config with the given name and defaults elsewhere.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the time grid.
    pub fn with_period(mut self, period: SimTime) -> Self {
        self.period = period;
        self
    }

    /// Sets the runtime iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Marks the participant as uninterruptible.
    pub fn uninterruptible(mut self) -> Self {
        self.uninterruptible = true;
        self
    }
}
