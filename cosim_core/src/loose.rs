//! Loose coupling: exchange with a one-instant lag and no convergence loop.

use cosim_env::{Federate, SimTime, Value, ValueKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::channel::CouplingChannel;
use crate::error::CouplingError;
use crate::metrics::{LooseReport, Observation, Publication};

/// Computes the value to publish at the next instant.
pub trait LooseModel: Send + 'static {
    /// # Arguments
    /// * `own` - Value published at the instant just left
    /// * `observed` - Peer value seen at the new instant, if any
    /// * `time` - The new instant
    fn next(&mut self, own: f64, observed: Option<f64>, time: SimTime) -> f64;
}

/// Moves toward the peer value by `weight`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Relaxation {
    pub weight: f64,
}

impl LooseModel for Relaxation {
    fn next(&mut self, own: f64, observed: Option<f64>, _time: SimTime) -> f64 {
        match observed {
            Some(peer) => own + self.weight * (peer - own),
            None => own,
        }
    }
}

/// Publishes the current instant in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InstantClock;

impl LooseModel for InstantClock {
    fn next(&mut self, _own: f64, _observed: Option<f64>, time: SimTime) -> f64 {
        time.as_secs_f64()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooseConfig {
    pub output: String,
    pub input: String,
    pub time_step: SimTime,
    pub instants: u32,
    pub initial_value: f64,
}

impl Default for LooseConfig {
    fn default() -> Self {
        Self {
            output: "x".to_string(),
            input: "y".to_string(),
            time_step: SimTime::from_secs_f64(0.01),
            instants: 3,
            initial_value: 0.0,
        }
    }
}

impl LooseConfig {
    pub fn validate(&self) -> Result<(), CouplingError> {
        if self.instants == 0 {
            return Err(CouplingError::config("instants must be at least 1"));
        }
        if self.time_step <= SimTime::ZERO {
            return Err(CouplingError::config("time_step must be positive"));
        }
        Ok(())
    }
}

pub struct LooseCoupler<F: Federate, M: LooseModel> {
    config: LooseConfig,
    channel: CouplingChannel<F>,
    model: M,
}

impl<F: Federate, M: LooseModel> LooseCoupler<F, M> {
    pub fn new(federate: F, model: M, config: LooseConfig) -> Result<Self, CouplingError> {
        config.validate()?;
        let mut channel = CouplingChannel::new(federate);
        channel.add_output(&config.output, ValueKind::Double)?;
        channel.add_input(&config.input, &config.input)?;
        Ok(Self {
            config,
            channel,
            model,
        })
    }

    pub async fn run(mut self) -> Result<LooseReport, CouplingError> {
        let participant = self.channel.federate().name().to_string();
        let horizon = SimTime::from_nanos(
            self.config
                .time_step
                .as_nanos()
                .saturating_mul(self.config.instants as i64),
        );

        self.channel.federate_mut().enter_initializing().await?;
        let mut time = self.channel.federate_mut().enter_executing().await?;

        let mut publications = Vec::new();
        let mut observations = Vec::new();
        let mut value = self.config.initial_value;

        for _ in 0..self.config.instants {
            self.channel.publish(&self.config.output, Value::Double(value))?;
            publications.push(Publication { time, value });

            // Wait for the peer, one instant at a time
            let target = time + self.config.time_step;
            let mut observed = None;
            while observed.is_none() && time < horizon {
                let request = if time < target {
                    target
                } else {
                    time + self.config.time_step
                };
                let granted = self.channel.federate_mut().request_time(request).await?;
                let stalled = granted <= time;
                time = granted.max(time);
                let reading = self.channel.read(&self.config.input)?;
                if reading.updated {
                    let peer = reading
                        .value
                        .as_ref()
                        .and_then(Value::as_f64)
                        .ok_or_else(|| CouplingError::codec("non-numeric loose coupling value"))?;
                    debug!(participant = %participant, time = %time, peer, "Observed peer update");
                    observations.push(Observation {
                        observed_at: time,
                        value: peer,
                    });
                    observed = Some(peer);
                }
                if stalled || time.is_max() {
                    break;
                }
            }

            value = self.model.next(value, observed, time);
            if time >= horizon {
                break;
            }
        }

        self.channel.federate_mut().finalize().await?;
        info!(
            participant = %participant,
            publications = publications.len(),
            observations = observations.len(),
            "Loose coupling complete"
        );

        Ok(LooseReport {
            participant,
            publications,
            observations,
            final_state: self.channel.federate().state(),
        })
    }
}
