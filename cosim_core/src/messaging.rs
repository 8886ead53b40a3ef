//! Endpoint-based message exchange and runtime filter control.

use cosim_env::{EndpointId, Federate, FilterSpec, FilterTarget, SimTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CouplingError;
use crate::metrics::{AppliedFilter, FilterReport, MessageLog, ReceivedMessage, SentMessage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Endpoint name. Local names are prefixed with the federate name.
    pub endpoint: String,

    /// Register `endpoint` verbatim instead of prefixing it.
    pub global: bool,

    /// Endpoint names every step's messages go to.
    pub destinations: Vec<String>,

    pub time_step: SimTime,

    pub steps: u32,

    /// Messages sent to each destination per step.
    pub messages_per_step: u32,

    /// Keep draining until this time after the last step.
    pub end_time: Option<SimTime>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            endpoint: "ept".to_string(),
            global: false,
            destinations: Vec::new(),
            time_step: SimTime::from_secs_f64(1.0),
            steps: 10,
            messages_per_step: 1,
            end_time: None,
        }
    }
}

/// Sends addressed messages each step and drains its FIFO after every grant.
pub struct MessageExchange<F: Federate> {
    config: ExchangeConfig,
    federate: F,
    endpoint: EndpointId,
    sent: Vec<SentMessage>,
    received: Vec<ReceivedMessage>,
    max_coalesced: usize,
}

impl<F: Federate> MessageExchange<F> {
    pub fn new(mut federate: F, config: ExchangeConfig) -> Result<Self, CouplingError> {
        let endpoint = if config.global {
            federate.register_global_endpoint(&config.endpoint)?
        } else {
            federate.register_endpoint(&config.endpoint)?
        };
        Ok(Self {
            config,
            federate,
            endpoint,
            sent: Vec::new(),
            received: Vec::new(),
            max_coalesced: 0,
        })
    }

    pub async fn run(mut self) -> Result<MessageLog, CouplingError> {
        let participant = self.federate.name().to_string();
        self.federate.enter_initializing().await?;
        let mut time = self.federate.enter_executing().await?;

        for step in 0..self.config.steps {
            self.send_step(time)?;

            let target = SimTime::from_nanos(
                self.config
                    .time_step
                    .as_nanos()
                    .saturating_mul(step as i64 + 1),
            );
            time = self.advance_to(time, target).await?;
            if time.is_max() {
                break;
            }
        }

        if let Some(end) = self.config.end_time {
            time = self.advance_to(time, end).await?;
        }

        self.federate.finalize().await?;
        info!(
            participant = %participant,
            sent = self.sent.len(),
            received = self.received.len(),
            time = %time,
            "Message exchange complete"
        );

        Ok(MessageLog {
            participant,
            sent: self.sent,
            received: self.received,
            max_coalesced: self.max_coalesced,
            final_state: self.federate.state(),
        })
    }

    fn send_step(&mut self, time: SimTime) -> Result<(), CouplingError> {
        let source = self.federate.name().to_string();
        for destination in &self.config.destinations {
            for i in 0..self.config.messages_per_step {
                let payload = format!("message {i} sent from {source} to {destination} at time {time}");
                self.federate
                    .send_message(self.endpoint, destination, payload.clone().into_bytes(), time)?;
                self.sent.push(SentMessage {
                    time,
                    destination: destination.clone(),
                    payload,
                });
            }
        }
        Ok(())
    }

    /// Requests `target` until granted, draining after every grant.
    async fn advance_to(&mut self, mut time: SimTime, target: SimTime) -> Result<SimTime, CouplingError> {
        while time < target {
            let granted = self.federate.request_time(target).await?;
            self.drain(granted)?;
            if granted <= time || granted.is_max() {
                // Halted: no further progress is possible
                time = granted.max(time);
                break;
            }
            time = granted;
        }
        Ok(time)
    }

    fn drain(&mut self, granted_at: SimTime) -> Result<(), CouplingError> {
        let mut count = 0;
        while let Some(message) = self.federate.get_message(self.endpoint)? {
            debug!(
                participant = %self.federate.name(),
                granted = %granted_at,
                source = %message.source,
                sent = %message.send_time,
                "Received message"
            );
            self.received.push(ReceivedMessage {
                granted_at,
                message,
            });
            count += 1;
        }
        self.max_coalesced = self.max_coalesced.max(count);
        Ok(())
    }
}

/// Requests `target` until granted or until the runtime stops advancing.
async fn advance<F: Federate>(federate: &mut F, mut time: SimTime, target: SimTime) -> Result<SimTime, CouplingError> {
    while time < target {
        let granted = federate.request_time(target).await?;
        if granted <= time {
            break;
        }
        time = granted;
    }
    Ok(time)
}

/// A filter reconfiguration at a given time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledFilter {
    pub time: SimTime,
    pub spec: FilterSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterControllerConfig {
    pub target: FilterTarget,
    pub initial: FilterSpec,
    pub schedule: Vec<ScheduledFilter>,
    pub end_time: SimTime,
}

/// Owns one filter and reconfigures it on a schedule.
pub struct FilterController<F: Federate> {
    config: FilterControllerConfig,
    federate: F,
}

impl<F: Federate> FilterController<F> {
    pub fn new(federate: F, mut config: FilterControllerConfig) -> Self {
        config.schedule.sort_by_key(|entry| entry.time);
        Self { config, federate }
    }

    pub async fn run(mut self) -> Result<FilterReport, CouplingError> {
        let participant = self.federate.name().to_string();
        let filter = self
            .federate
            .register_filter(self.config.target.clone(), self.config.initial.clone())?;

        self.federate.enter_initializing().await?;
        let mut time = self.federate.enter_executing().await?;

        let mut applied = vec![AppliedFilter {
            time,
            spec: self.config.initial.clone(),
        }];

        for entry in &self.config.schedule {
            time = advance(&mut self.federate, time, entry.time).await?;
            self.federate.set_filter(filter, entry.spec.clone())?;
            info!(
                participant = %participant,
                time = %time,
                filter = entry.spec.type_name(),
                "Filter reconfigured"
            );
            applied.push(AppliedFilter {
                time,
                spec: entry.spec.clone(),
            });
        }

        advance(&mut self.federate, time, self.config.end_time).await?;
        self.federate.finalize().await?;

        Ok(FilterReport {
            participant,
            applied,
            final_state: self.federate.state(),
        })
    }
}
