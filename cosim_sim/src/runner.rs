//! Scenario runner - executes co-simulation scenarios end to end.
//!
//! Each run builds a fresh broker and a single-threaded tokio runtime,
//! spawns one task per participant, joins them all, then checks the
//! participants' reports against the scenario's expectations.

use std::future::Future;

use cosim_core::{
    CouplingConfig, CouplingReport, ExchangeConfig, FilterController, FilterControllerConfig,
    FilterReport, FixedPointCoupler, InputReduction, InstantClock, IterationMode, LinearResidual,
    LooseConfig, LooseCoupler, LooseReport, MessageExchange, MessageLog, Residual, ScheduledFilter,
    EllipseResidual, QuadraticResidual,
};
use cosim_env::{
    DelayDistribution, FederateInfo, Federation, FilterSpec, FilterTarget, LifecycleState, SimTime,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::broker::{BrokerConfig, BrokerStats, SimBroker};
use crate::config::SimConfig;
use crate::error::SimError;
use crate::oracle::CoupledSystemOracle;
use crate::scenarios::ScenarioId;

/// Agreement required between the federated and the monolithic solution.
const ORACLE_TOLERANCE: f64 = 1e-6;

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Per-participant reports
    pub participants: Vec<ParticipantReport>,
}

impl ScenarioResult {
    fn errored(scenario: ScenarioId, seed: u64, error: &SimError) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            failure_reason: Some(error.to_string()),
            metrics: ScenarioMetrics::default(),
            participants: Vec::new(),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Instants closed across all coupling participants
    pub instants: usize,

    /// Local solves across all coupling participants
    pub total_iterations: u32,

    /// Instants left through the iteration cap
    pub forced_instants: usize,

    /// Local solves that missed the tolerance
    pub solver_failures: u32,

    /// Largest distance from the oracle solution
    pub max_error: Option<f64>,

    /// Latest time any participant reached, in seconds
    pub final_time_secs: f64,

    /// Broker counters
    pub broker: BrokerStats,
}

/// What one participant reported.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParticipantReport {
    Coupling(CouplingReport),
    Loose(LooseReport),
    Messages(MessageLog),
    Filter(FilterReport),
}

impl ParticipantReport {
    pub fn participant(&self) -> &str {
        match self {
            ParticipantReport::Coupling(r) => &r.participant,
            ParticipantReport::Loose(r) => &r.participant,
            ParticipantReport::Messages(r) => &r.participant,
            ParticipantReport::Filter(r) => &r.participant,
        }
    }

    pub fn final_state(&self) -> LifecycleState {
        match self {
            ParticipantReport::Coupling(r) => r.final_state,
            ParticipantReport::Loose(r) => r.final_state,
            ParticipantReport::Messages(r) => r.final_state,
            ParticipantReport::Filter(r) => r.final_state,
        }
    }
}

/// Collects failed expectations.
#[derive(Default)]
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn expect(&mut self, ok: bool, failure: impl FnOnce() -> String) {
        if !ok {
            self.failures.push(failure());
        }
    }

    fn all_finalized(&mut self, participants: &[ParticipantReport]) {
        for report in participants {
            self.expect(report.final_state() == LifecycleState::Finalized, || {
                format!("{} ended in {}", report.participant(), report.final_state())
            });
        }
    }

    fn reason(&self) -> Option<String> {
        if self.failures.is_empty() {
            None
        } else {
            Some(self.failures.join("; "))
        }
    }
}

/// Runs co-simulation scenarios.
pub struct ScenarioRunner {
    config: SimConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            config: SimConfig {
                seed,
                ..Default::default()
            },
        }
    }

    pub fn from_config(config: SimConfig) -> Self {
        Self { config }
    }

    /// Sets the number of instants in coupling scenarios.
    pub fn with_instants(mut self, instants: u32) -> Self {
        self.config.instants = instants;
        self
    }

    /// Sets the instant spacing in coupling scenarios.
    pub fn with_time_step(mut self, time_step: SimTime) -> Self {
        self.config.time_step = time_step;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.config.seed);

        let outcome = match scenario {
            ScenarioId::Nonlinear => self.run_nonlinear(IterationMode::Consensus),
            ScenarioId::OnUpdate => self.run_nonlinear(IterationMode::OnUpdate),
            ScenarioId::ThreeWay => self.run_three_way(),
            ScenarioId::IterationCap => self.run_iteration_cap(),
            ScenarioId::Loose => self.run_loose(),
            ScenarioId::Messages => self.run_messages(),
            ScenarioId::FilterReconfig => self.run_filter_reconfig(),
            ScenarioId::RandomFilters => self.run_random_filters(),
        };

        match outcome {
            Ok((checks, metrics, participants)) => {
                let failure_reason = checks.reason();
                ScenarioResult {
                    scenario,
                    seed: self.config.seed,
                    passed: failure_reason.is_none(),
                    failure_reason,
                    metrics,
                    participants,
                }
            }
            Err(e) => {
                if e.is_fatal() {
                    error!("Scenario {} aborted: {}", scenario.name(), e);
                } else {
                    warn!("Scenario {} errored: {}", scenario.name(), e);
                }
                ScenarioResult::errored(scenario, self.config.seed, &e)
            }
        }
    }

    // =========================================================================
    // Fixed-point scenarios
    // =========================================================================

    /// Quadratic and ellipse participants; checked against the oracle.
    fn run_nonlinear(&self, mode: IterationMode) -> Outcome {
        let broker = self.broker(2);
        let quadratic = CouplingConfig {
            output: "x".into(),
            inputs: vec!["y".into()],
            initial_guess: 0.0,
            initial_input: 1.0,
            mode,
            ..self.coupling_config()
        };
        let ellipse = CouplingConfig {
            output: "y".into(),
            inputs: vec!["x".into()],
            initial_guess: 1.0,
            initial_input: 0.0,
            mode,
            ..self.coupling_config()
        };

        let c0 = FixedPointCoupler::new(broker.create_federate(self.federate_info("fed0"))?, QuadraticResidual, quadratic)?;
        let c1 = FixedPointCoupler::new(broker.create_federate(self.federate_info("fed1"))?, EllipseResidual, ellipse)?;
        let (r0, r1) = block_on(async move {
            let h0 = tokio::spawn(c0.run());
            let h1 = tokio::spawn(c1.run());
            Ok::<_, SimError>((h0.await??, h1.await??))
        })?;

        let oracle = CoupledSystemOracle::default().reference();
        let mut checks = Checks::default();
        let mut metrics = coupling_metrics(&[&r0, &r1]);

        let x = r0.last().map(|r| r.x).unwrap_or(f64::NAN);
        let y = r1.last().map(|r| r.x).unwrap_or(f64::NAN);
        let error = (x - oracle.x).abs().max((y - oracle.y).abs());
        metrics.max_error = Some(error);
        info!(x, y, oracle_x = oracle.x, oracle_y = oracle.y, "Fixed point reached");

        checks.expect(error < ORACLE_TOLERANCE, || {
            format!("({x:.10}, {y:.10}) differs from oracle ({:.10}, {:.10})", oracle.x, oracle.y)
        });
        for report in [&r0, &r1] {
            checks.expect(report.forced_instants() == 0, || {
                format!("{} hit the iteration cap", report.participant)
            });
            if mode == IterationMode::Consensus {
                checks.expect(report.instants.len() == self.config.instants as usize, || {
                    format!("{} closed {} instants", report.participant, report.instants.len())
                });
                checks.expect(report.all_converged(), || {
                    format!("{} left an instant without global convergence", report.participant)
                });
            }
        }

        Ok(self.finish(checks, metrics, &broker, coupling_participants(vec![r0, r1])))
    }

    /// Three participants, each averaging the other two.
    ///
    /// `x_i = 0.5 * mean(x_j) + 1` has its fixed point at 2.
    fn run_three_way(&self) -> Outcome {
        let broker = self.broker(3);
        let residual = LinearResidual {
            slope: 1.0,
            coupling: -0.5,
            constant: -1.0,
        };
        let names = ["x0", "x1", "x2"];

        let mut couplers = Vec::new();
        for (i, output) in names.iter().enumerate() {
            let config = CouplingConfig {
                output: output.to_string(),
                inputs: names
                    .iter()
                    .filter(|name| *name != output)
                    .map(|name| name.to_string())
                    .collect(),
                reduction: InputReduction::Average,
                initial_guess: i as f64,
                initial_input: 0.0,
                ..self.coupling_config()
            };
            let federate = broker.create_federate(self.federate_info(&format!("fed{i}")))?;
            couplers.push(FixedPointCoupler::new(federate, residual, config)?);
        }

        let reports = block_on(async move {
            let handles: Vec<_> = couplers.into_iter().map(|c| tokio::spawn(c.run())).collect();
            let mut reports = Vec::new();
            for handle in handles {
                reports.push(handle.await??);
            }
            Ok::<_, SimError>(reports)
        })?;

        let mut checks = Checks::default();
        let refs: Vec<&CouplingReport> = reports.iter().collect();
        let mut metrics = coupling_metrics(&refs);
        let mut error: f64 = 0.0;
        for report in &reports {
            let x = report.last().map(|r| r.x).unwrap_or(f64::NAN);
            error = error.max((x - 2.0).abs());
            checks.expect(report.all_converged() && report.forced_instants() == 0, || {
                format!("{} did not converge every instant", report.participant)
            });
        }
        metrics.max_error = Some(error);
        checks.expect(error < ORACLE_TOLERANCE, || format!("fixed point off by {error:e}"));

        Ok(self.finish(checks, metrics, &broker, coupling_participants(reports)))
    }

    /// `x = -y`, `y = x + 1`: Jacobi iteration cycles with period four.
    fn run_iteration_cap(&self) -> Outcome {
        let broker = self.broker(2);
        let cap = self.config.cap_iterations;
        let left = CouplingConfig {
            output: "x".into(),
            inputs: vec!["y".into()],
            initial_guess: 0.0,
            initial_input: 1.0,
            max_iterations: cap,
            ..self.coupling_config()
        };
        let right = CouplingConfig {
            output: "y".into(),
            inputs: vec!["x".into()],
            initial_guess: 1.0,
            initial_input: 0.0,
            max_iterations: cap,
            ..self.coupling_config()
        };
        let c0 = FixedPointCoupler::new(
            broker.create_federate(self.federate_info("fed0"))?,
            LinearResidual {
                slope: 1.0,
                coupling: 1.0,
                constant: 0.0,
            },
            left,
        )?;
        let c1 = FixedPointCoupler::new(
            broker.create_federate(self.federate_info("fed1"))?,
            LinearResidual {
                slope: 1.0,
                coupling: -1.0,
                constant: -1.0,
            },
            right,
        )?;
        let (r0, r1) = block_on(async move {
            let h0 = tokio::spawn(c0.run());
            let h1 = tokio::spawn(c1.run());
            Ok::<_, SimError>((h0.await??, h1.await??))
        })?;

        let mut checks = Checks::default();
        let metrics = coupling_metrics(&[&r0, &r1]);
        for report in [&r0, &r1] {
            checks.expect(report.instants.len() == self.config.instants as usize, || {
                format!("{} closed {} instants", report.participant, report.instants.len())
            });
            for record in &report.instants {
                checks.expect(record.forced && !record.converged, || {
                    format!("{} at {} was not forced", report.participant, record.time)
                });
                checks.expect(record.iterations == cap, || {
                    format!(
                        "{} at {} iterated {} times, cap is {cap}",
                        report.participant, record.time, record.iterations
                    )
                });
            }
        }

        Ok(self.finish(checks, metrics, &broker, coupling_participants(vec![r0, r1])))
    }

    // =========================================================================
    // Loose coupling
    // =========================================================================

    fn run_loose(&self) -> Outcome {
        let broker = self.broker(2);
        let dt = self.config.time_step;
        let config = |output: &str, input: &str| LooseConfig {
            output: output.into(),
            input: input.into(),
            time_step: dt,
            instants: self.config.instants,
            initial_value: 0.0,
        };
        let l0 = LooseCoupler::new(broker.create_federate(FederateInfo::new("fed0"))?, InstantClock, config("x", "y"))?;
        let l1 = LooseCoupler::new(broker.create_federate(FederateInfo::new("fed1"))?, InstantClock, config("y", "x"))?;
        let (r0, r1) = block_on(async move {
            let h0 = tokio::spawn(l0.run());
            let h1 = tokio::spawn(l1.run());
            Ok::<_, SimError>((h0.await??, h1.await??))
        })?;

        let mut checks = Checks::default();
        let mut metrics = ScenarioMetrics::default();
        for report in [&r0, &r1] {
            checks.expect(report.publications.len() == self.config.instants as usize, || {
                format!("{} published {} times", report.participant, report.publications.len())
            });
            checks.expect(!report.observations.is_empty(), || {
                format!("{} never observed its peer", report.participant)
            });
            // The peer publishes the instant it is at, seen one instant later
            for observation in &report.observations {
                let expected = (observation.observed_at - dt).as_secs_f64();
                checks.expect((observation.value - expected).abs() < 1e-12, || {
                    format!(
                        "{} saw {} at {}, expected {expected}",
                        report.participant, observation.value, observation.observed_at
                    )
                });
            }
            if let Some(last) = report.observations.last() {
                metrics.final_time_secs = metrics.final_time_secs.max(last.observed_at.as_secs_f64());
            }
        }

        let participants = vec![ParticipantReport::Loose(r0), ParticipantReport::Loose(r1)];
        Ok(self.finish(checks, metrics, &broker, participants))
    }

    // =========================================================================
    // Endpoint scenarios
    // =========================================================================

    fn run_messages(&self) -> Outcome {
        let broker = self.broker(2);
        let exchange = |peer: &str| ExchangeConfig {
            destinations: vec![format!("{peer}/ept")],
            steps: self.config.message_steps,
            messages_per_step: self.config.messages_per_step,
            ..Default::default()
        };
        let e0 = MessageExchange::new(broker.create_federate(FederateInfo::new("fed0"))?, exchange("fed1"))?;
        let e1 = MessageExchange::new(broker.create_federate(FederateInfo::new("fed1"))?, exchange("fed0"))?;
        let (r0, r1) = block_on(async move {
            let h0 = tokio::spawn(e0.run());
            let h1 = tokio::spawn(e1.run());
            Ok::<_, SimError>((h0.await??, h1.await??))
        })?;

        let mut checks = Checks::default();
        for (log, peer) in [(&r0, &r1), (&r1, &r0)] {
            checks.expect(log.received.len() == peer.sent.len(), || {
                format!("{} received {} of {} messages", log.participant, log.received.len(), peer.sent.len())
            });
            checks.expect(log.max_coalesced >= self.config.messages_per_step as usize, || {
                format!("{} never drained several messages per grant", log.participant)
            });
            checks.expect(log.received.iter().all(|r| r.granted_at >= r.message.time), || {
                format!("{} received a message before its delivery time", log.participant)
            });
            let ids: Vec<u64> = log.received.iter().map(|r| r.message.id).collect();
            checks.expect(ids.windows(2).all(|w| w[0] < w[1]), || {
                format!("{} received messages out of order", log.participant)
            });
        }

        let metrics = message_metrics(&[&r0, &r1]);
        let participants = vec![ParticipantReport::Messages(r0), ParticipantReport::Messages(r1)];
        Ok(self.finish(checks, metrics, &broker, participants))
    }

    /// Delay 0.5s, reconfigured to 1.5s at t=4 and to 0.75s at t=8.
    fn run_filter_reconfig(&self) -> Outcome {
        let broker = self.broker(3);
        let steps = self.config.message_steps;
        let end = SimTime::from_secs_f64(f64::from(steps) + 1.0);
        let secs = SimTime::from_secs_f64;

        let sender = MessageExchange::new(
            broker.create_federate(FederateInfo::new("sender"))?,
            ExchangeConfig {
                destinations: vec!["receiver/ept".into()],
                steps,
                ..Default::default()
            },
        )?;
        let receiver = MessageExchange::new(
            broker.create_federate(FederateInfo::new("receiver"))?,
            ExchangeConfig {
                steps,
                end_time: Some(end),
                ..Default::default()
            },
        )?;
        let controller = FilterController::new(
            broker.create_federate(FederateInfo::new("filter"))?,
            FilterControllerConfig {
                target: FilterTarget::Source("sender/ept".into()),
                initial: FilterSpec::Delay { delay: secs(0.5) },
                schedule: vec![
                    ScheduledFilter {
                        time: secs(4.0),
                        spec: FilterSpec::Delay { delay: secs(1.5) },
                    },
                    ScheduledFilter {
                        time: secs(8.0),
                        spec: FilterSpec::Delay { delay: secs(0.75) },
                    },
                ],
                end_time: end,
            },
        );

        let (sent, received, filter) = block_on(async move {
            let hs = tokio::spawn(sender.run());
            let hr = tokio::spawn(receiver.run());
            let hf = tokio::spawn(controller.run());
            Ok::<_, SimError>((hs.await??, hr.await??, hf.await??))
        })?;

        let mut checks = Checks::default();
        checks.expect(received.received.len() == sent.sent.len(), || {
            format!("received {} of {} messages", received.received.len(), sent.sent.len())
        });
        for r in &received.received {
            let send = r.message.send_time.as_secs_f64();
            let delay = r.message.delay().as_secs_f64();
            // Sends at exactly 4s and 8s race the reconfiguration
            let allowed: &[f64] = if send < 4.0 {
                &[0.5]
            } else if send == 4.0 {
                &[0.5, 1.5]
            } else if send < 8.0 {
                &[1.5]
            } else if send == 8.0 {
                &[1.5, 0.75]
            } else {
                &[0.75]
            };
            checks.expect(allowed.iter().any(|a| (a - delay).abs() < 1e-9), || {
                format!("message sent at {send}s was delayed {delay}s")
            });
        }
        let applied: Vec<SimTime> = filter.applied.iter().map(|a| a.time).collect();
        checks.expect(applied == vec![SimTime::ZERO, secs(4.0), secs(8.0)], || {
            format!("filter applied at {applied:?}")
        });

        let metrics = message_metrics(&[&sent, &received]);
        let participants = vec![
            ParticipantReport::Messages(sent),
            ParticipantReport::Messages(received),
            ParticipantReport::Filter(filter),
        ];
        Ok(self.finish(checks, metrics, &broker, participants))
    }

    /// Random drop at the source, random delay at the destination; run twice.
    fn run_random_filters(&self) -> Outcome {
        let (first, broker) = self.random_filter_run()?;
        let (second, _) = self.random_filter_run()?;

        let mut checks = Checks::default();
        let stats = broker.stats();
        let (sent, received) = match first.as_slice() {
            [ParticipantReport::Messages(s), ParticipantReport::Messages(r), ..] => (s, r),
            _ => return Err(SimError::Config("unexpected participant layout".into())),
        };

        let trace = |reports: &[ParticipantReport]| -> Vec<(u64, SimTime)> {
            match reports.get(1) {
                Some(ParticipantReport::Messages(r)) => {
                    r.received.iter().map(|m| (m.message.id, m.message.time)).collect()
                }
                _ => Vec::new(),
            }
        };
        checks.expect(trace(first.as_slice()) == trace(second.as_slice()), || {
            "two runs with the same seed diverged".to_string()
        });

        let total = sent.sent.len() as u64;
        checks.expect(stats.messages_dropped > 0 && stats.messages_dropped < total, || {
            format!("{} of {total} messages dropped", stats.messages_dropped)
        });
        checks.expect(received.received.len() as u64 + stats.messages_dropped == total, || {
            format!(
                "{} delivered + {} dropped != {total} sent",
                received.received.len(),
                stats.messages_dropped
            )
        });
        let max = self.config.max_random_delay;
        checks.expect(received.received.iter().all(|r| r.message.delay() <= max), || {
            format!("a delay exceeded {max}")
        });

        let metrics = message_metrics(&[sent, received]);
        Ok(self.finish(checks, metrics, &broker, first))
    }

    fn random_filter_run(&self) -> Result<(Vec<ParticipantReport>, SimBroker), SimError> {
        let broker = self.broker(4);
        let steps = self.config.message_steps;
        let end = SimTime::from_secs_f64(f64::from(steps) + 1.0);

        let sender = MessageExchange::new(
            broker.create_federate(FederateInfo::new("sender"))?,
            ExchangeConfig {
                destinations: vec!["receiver/ept".into()],
                steps,
                messages_per_step: self.config.messages_per_step,
                ..Default::default()
            },
        )?;
        let receiver = MessageExchange::new(
            broker.create_federate(FederateInfo::new("receiver"))?,
            ExchangeConfig {
                steps,
                end_time: Some(end),
                ..Default::default()
            },
        )?;
        let dropper = FilterController::new(
            broker.create_federate(FederateInfo::new("dropper"))?,
            FilterControllerConfig {
                target: FilterTarget::Source("sender/ept".into()),
                initial: FilterSpec::RandomDrop {
                    probability: self.config.drop_probability,
                },
                schedule: Vec::new(),
                end_time: end,
            },
        );
        let delayer = FilterController::new(
            broker.create_federate(FederateInfo::new("delayer"))?,
            FilterControllerConfig {
                target: FilterTarget::Destination("receiver/ept".into()),
                initial: FilterSpec::RandomDelay {
                    distribution: DelayDistribution::Uniform,
                    max: self.config.max_random_delay,
                },
                schedule: Vec::new(),
                end_time: end,
            },
        );

        let reports = block_on(async move {
            let hs = tokio::spawn(sender.run());
            let hr = tokio::spawn(receiver.run());
            let hd = tokio::spawn(dropper.run());
            let hy = tokio::spawn(delayer.run());
            Ok::<_, SimError>(vec![
                ParticipantReport::Messages(hs.await??),
                ParticipantReport::Messages(hr.await??),
                ParticipantReport::Filter(hd.await??),
                ParticipantReport::Filter(hy.await??),
            ])
        })?;
        Ok((reports, broker))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn broker(&self, federates: usize) -> SimBroker {
        SimBroker::new(BrokerConfig {
            expected_federates: federates,
            seed: self.config.seed,
            stop_time: SimTime::MAX,
        })
    }

    fn federate_info(&self, name: &str) -> FederateInfo {
        FederateInfo::new(name).with_max_iterations(self.config.runtime_max_iterations)
    }

    fn coupling_config(&self) -> CouplingConfig {
        CouplingConfig {
            time_step: self.config.time_step,
            instants: self.config.instants,
            max_iterations: self.config.max_iterations,
            ..Default::default()
        }
    }

    fn finish(
        &self,
        mut checks: Checks,
        mut metrics: ScenarioMetrics,
        broker: &SimBroker,
        participants: Vec<ParticipantReport>,
    ) -> (Checks, ScenarioMetrics, Vec<ParticipantReport>) {
        checks.all_finalized(&participants);
        if let Some(reason) = broker.abort_reason() {
            checks.expect(false, || format!("federation aborted: {reason}"));
        }
        metrics.broker = broker.stats();
        (checks, metrics, participants)
    }
}

type Outcome = Result<(Checks, ScenarioMetrics, Vec<ParticipantReport>), SimError>;

/// Drives participant tasks on a fresh single-threaded runtime.
fn block_on<T>(future: impl Future<Output = Result<T, SimError>>) -> Result<T, SimError> {
    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    runtime.block_on(future)
}

fn coupling_metrics(reports: &[&CouplingReport]) -> ScenarioMetrics {
    let mut metrics = ScenarioMetrics::default();
    for report in reports {
        metrics.instants += report.instants.len();
        metrics.total_iterations += report.total_iterations();
        metrics.forced_instants += report.forced_instants();
        metrics.solver_failures += report.solver_failures();
        metrics.final_time_secs = metrics.final_time_secs.max(report.final_time.as_secs_f64());
    }
    metrics
}

fn message_metrics(logs: &[&MessageLog]) -> ScenarioMetrics {
    let mut metrics = ScenarioMetrics::default();
    for log in logs {
        if let Some(last) = log.received.last() {
            metrics.final_time_secs = metrics.final_time_secs.max(last.granted_at.as_secs_f64());
        }
    }
    metrics
}

fn coupling_participants(reports: Vec<CouplingReport>) -> Vec<ParticipantReport> {
    reports.into_iter().map(ParticipantReport::Coupling).collect()
}

/// Convenience for running one residual pair outside the named scenarios.
pub fn run_pair<A: Residual, B: Residual>(
    runner: &ScenarioRunner,
    residuals: (A, B),
    configs: (CouplingConfig, CouplingConfig),
) -> Result<(CouplingReport, CouplingReport), SimError> {
    let broker = runner.broker(2);
    let c0 = FixedPointCoupler::new(broker.create_federate(runner.federate_info("fed0"))?, residuals.0, configs.0)?;
    let c1 = FixedPointCoupler::new(broker.create_federate(runner.federate_info("fed1"))?, residuals.1, configs.1)?;
    block_on(async move {
        let h0 = tokio::spawn(c0.run());
        let h1 = tokio::spawn(c1.run());
        Ok::<_, SimError>((h0.await??, h1.await??))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn assert_passed(result: &ScenarioResult) {
        assert!(
            result.passed,
            "{} failed: {}",
            result.scenario,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }

    #[test]
    fn test_nonlinear_matches_oracle() {
        let result = ScenarioRunner::new(42).run(ScenarioId::Nonlinear);
        assert_passed(&result);
        assert!(result.metrics.max_error.unwrap() < 1e-6);
        assert_eq!(result.metrics.forced_instants, 0);
        assert!(result.metrics.broker.iteration_grants > 0);

        // Converges at the first instant; later instants confirm in one pass
        for report in &result.participants {
            let ParticipantReport::Coupling(report) = report else {
                panic!("expected coupling reports");
            };
            assert!(report.instants[0].iterations > 2);
            for record in &report.instants[1..] {
                assert!(record.iterations <= 2);
            }
        }
    }

    #[test]
    fn test_nonlinear_first_instant_values() {
        let result = ScenarioRunner::new(1).run(ScenarioId::Nonlinear);
        assert_passed(&result);

        let ParticipantReport::Coupling(quadratic) = &result.participants[0] else {
            panic!("expected coupling report");
        };
        assert_eq!(quadratic.instants[0].time, SimTime::ZERO);
        assert_abs_diff_eq!(quadratic.instants[0].x, -0.2222, epsilon = 1e-4);
        assert_abs_diff_eq!(quadratic.instants[0].y, 0.9938, epsilon = 1e-4);
    }

    #[test]
    fn test_on_update_matches_oracle() {
        let result = ScenarioRunner::new(42).run(ScenarioId::OnUpdate);
        assert_passed(&result);
    }

    #[test]
    fn test_three_way_scenario() {
        let result = ScenarioRunner::new(42).with_instants(2).run(ScenarioId::ThreeWay);
        assert_passed(&result);
        assert_eq!(result.participants.len(), 3);
    }

    #[test]
    fn test_iteration_cap_forces_every_instant() {
        let result = ScenarioRunner::new(42).with_instants(4).run(ScenarioId::IterationCap);
        assert_passed(&result);
        assert_eq!(result.metrics.forced_instants, 8);
        assert_eq!(result.metrics.total_iterations, 8 * 7);
    }

    #[test]
    fn test_loose_lags_one_instant() {
        let result = ScenarioRunner::new(42)
            .with_time_step(SimTime::from_secs_f64(0.25))
            .run(ScenarioId::Loose);
        assert_passed(&result);
    }

    #[test]
    fn test_messages_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::Messages);
        assert_passed(&result);
        assert_eq!(result.metrics.broker.messages_dropped, 0);
        assert_eq!(
            result.metrics.broker.messages_delivered,
            result.metrics.broker.messages_admitted
        );
    }

    #[test]
    fn test_filter_reconfig_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::FilterReconfig);
        assert_passed(&result);
    }

    #[test]
    fn test_random_filters_deterministic() {
        let a = ScenarioRunner::new(7).run(ScenarioId::RandomFilters);
        let b = ScenarioRunner::new(7).run(ScenarioId::RandomFilters);
        assert_passed(&a);
        assert_passed(&b);
        assert_eq!(a.metrics.broker, b.metrics.broker);
    }

    #[test]
    fn test_all_scenarios_pass() {
        let runner = ScenarioRunner::new(42);
        for scenario in ScenarioId::all() {
            assert_passed(&runner.run(scenario));
        }
    }

    #[test]
    fn test_run_pair_with_custom_residuals() {
        let runner = ScenarioRunner::new(42);
        let left = CouplingConfig {
            output: "x".into(),
            inputs: vec!["y".into()],
            ..runner.coupling_config()
        };
        let right = CouplingConfig {
            output: "y".into(),
            inputs: vec!["x".into()],
            ..runner.coupling_config()
        };
        // x = 0.5y + 1, y = 0.5x + 1 meet at 2
        let residual = LinearResidual {
            slope: 1.0,
            coupling: -0.5,
            constant: -1.0,
        };
        let (r0, r1) = run_pair(&runner, (residual, residual), (left, right)).unwrap();
        assert_abs_diff_eq!(r0.last().unwrap().x, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(r1.last().unwrap().x, 2.0, epsilon = 1e-6);
    }
}
