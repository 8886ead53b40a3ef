//! Harness configuration.

use std::path::Path;

use cosim_env::SimTime;
use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for random filters
    pub seed: u64,

    /// Instants per coupling scenario
    pub instants: u32,

    /// Instant spacing for coupling scenarios
    pub time_step: SimTime,

    /// Per-instant iteration cap of the fixed-point participants
    pub max_iterations: u32,

    /// Cap used by the `iteration_cap` scenario
    pub cap_iterations: u32,

    /// Runtime-side cap; kept above the participants' own cap
    pub runtime_max_iterations: u32,

    /// Messages per step in the endpoint scenarios
    pub messages_per_step: u32,

    /// Steps in the endpoint scenarios (one second each)
    pub message_steps: u32,

    /// Drop probability in `random_filters`
    pub drop_probability: f64,

    /// Upper bound of the random delay in `random_filters`
    pub max_random_delay: SimTime,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            instants: 3,
            time_step: SimTime::from_secs_f64(0.01),
            max_iterations: 100,
            cap_iterations: 7,
            runtime_max_iterations: 200,
            messages_per_step: 3,
            message_steps: 12,
            drop_probability: 0.3,
            max_random_delay: SimTime::from_secs_f64(0.5),
        }
    }
}

impl SimConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.instants == 0 {
            return Err(SimError::Config("instants must be at least 1".into()));
        }
        if self.time_step <= SimTime::ZERO {
            return Err(SimError::Config("time_step must be positive".into()));
        }
        if self.max_iterations == 0 || self.cap_iterations == 0 {
            return Err(SimError::Config("iteration caps must be at least 1".into()));
        }
        if self.runtime_max_iterations <= self.max_iterations.max(self.cap_iterations) {
            return Err(SimError::Config(
                "runtime_max_iterations must exceed the participants' caps".into(),
            ));
        }
        if self.message_steps < 9 {
            // the filter schedule reconfigures at 4s and 8s
            return Err(SimError::Config("message_steps must be at least 9".into()));
        }
        if !(0.0..=1.0).contains(&self.drop_probability) {
            return Err(SimError::Config("drop_probability must be in [0, 1]".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SimConfig = serde_json::from_str(r#"{"seed": 7, "time_step": 0.5}"#).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.time_step, SimTime::from_secs_f64(0.5));
        assert_eq!(config.instants, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SimConfig {
            instants: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SimConfig {
            runtime_max_iterations: 50,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SimConfig {
            drop_probability: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
