//! Fixed-point coupling driver.
//!
//! Runs one participant through the iterate-until-consensus protocol:
//!
//! ```text
//!  ┌──────────── instant t ─────────────┐
//!  │ read peers ─► AND(flags)? ──yes──► │ request t+Δt (NO_ITERATION)
//!  │      ▲            │ no             │
//!  │      │            ▼                │
//!  │      └── request t (FORCE) ◄── solve, publish (x, flag)
//!  └────────────────────────────────────┘
//! ```
//!
//! The iteration cap turns a non-converging instant into an advance.

use std::collections::BTreeMap;

use cosim_env::{Federate, IterationRequest, SimTime, ValueKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::{CouplingChannel, CouplingSample};
use crate::convergence::{ConvergenceTracker, Verdict};
use crate::error::CouplingError;
use crate::metrics::{CouplingReport, InstantRecord};
use crate::policy::{Action, IterationMode, TimeAdvancePolicy, Transition};
use crate::solver::{NewtonSolver, Residual};

/// How several coupling inputs collapse into the scalar `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputReduction {
    #[default]
    First,
    Sum,
    Average,
    Min,
    Max,
}

impl InputReduction {
    /// Reduces `values`. `None` when empty.
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        let first = *values.first()?;
        let reduced = match self {
            InputReduction::First => first,
            InputReduction::Sum => values.iter().sum(),
            InputReduction::Average => values.iter().sum::<f64>() / values.len() as f64,
            InputReduction::Min => values.iter().copied().fold(first, f64::min),
            InputReduction::Max => values.iter().copied().fold(first, f64::max),
        };
        Some(reduced)
    }
}

/// Configuration for a [`FixedPointCoupler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplingConfig {
    /// Publication key of this participant's state variable.
    pub output: String,

    /// Publication keys of the peers' state variables.
    pub inputs: Vec<String>,

    pub reduction: InputReduction,

    /// Spacing of the discrete instants.
    pub time_step: SimTime,

    /// Number of instants to run.
    pub instants: u32,

    /// `x₀`, published during initialization.
    pub initial_guess: f64,

    /// `y` used until a peer value arrives.
    pub initial_input: f64,

    pub tolerance: f64,

    /// Newton iterations per local solve.
    pub solver_max_iter: u32,

    /// Local solves per instant before the cap escape fires.
    pub max_iterations: u32,

    pub mode: IterationMode,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            output: "x".to_string(),
            inputs: vec!["y".to_string()],
            reduction: InputReduction::First,
            time_step: SimTime::from_secs_f64(0.01),
            instants: 3,
            initial_guess: 0.0,
            initial_input: 1.0,
            tolerance: 1e-8,
            solver_max_iter: 10,
            max_iterations: 100,
            mode: IterationMode::Consensus,
        }
    }
}

impl CouplingConfig {
    pub fn validate(&self) -> Result<(), CouplingError> {
        if self.instants == 0 {
            return Err(CouplingError::config("instants must be at least 1"));
        }
        if self.time_step <= SimTime::ZERO {
            return Err(CouplingError::config("time_step must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(CouplingError::config("max_iterations must be at least 1"));
        }
        Ok(())
    }
}

/// Drives one participant through fixed-point coupling.
pub struct FixedPointCoupler<F: Federate, R: Residual> {
    config: CouplingConfig,
    channel: CouplingChannel<F>,
    solver: NewtonSolver<R>,
    tracker: ConvergenceTracker,
    policy: TimeAdvancePolicy,

    /// Own state variable.
    x: f64,

    /// Reduced input used by the last solve.
    y: f64,

    last_published: f64,
    latest_inputs: BTreeMap<String, f64>,
    solver_failures: u32,
}

impl<F: Federate, R: Residual> FixedPointCoupler<F, R> {
    /// Registers the coupling variables on `federate`.
    pub fn new(federate: F, residual: R, config: CouplingConfig) -> Result<Self, CouplingError> {
        config.validate()?;
        let mut channel = CouplingChannel::new(federate);
        channel.add_output(&config.output, ValueKind::Text)?;

        let mut tracker = ConvergenceTracker::new(config.tolerance, config.max_iterations);
        for input in &config.inputs {
            channel.add_input(input, input)?;
            if config.mode == IterationMode::Consensus {
                tracker.track_peer(input.clone());
            }
        }

        let policy = TimeAdvancePolicy::new(config.mode, config.time_step, config.instants);

        Ok(Self {
            x: config.initial_guess,
            y: config.initial_input,
            last_published: config.initial_guess,
            channel,
            solver: NewtonSolver::new(residual),
            tracker,
            policy,
            latest_inputs: BTreeMap::new(),
            solver_failures: 0,
            config,
        })
    }

    pub fn config(&self) -> &CouplingConfig {
        &self.config
    }

    /// Runs the participant from `Created` to `Finalized`.
    pub async fn run(mut self) -> Result<CouplingReport, CouplingError> {
        let participant = self.channel.federate().name().to_string();

        self.channel.federate_mut().enter_initializing().await?;
        self.publish_current(false)?;
        let start = self.channel.federate_mut().enter_executing().await?;
        info!(participant = %participant, time = %start, mode = ?self.config.mode, "Entered executing mode");

        self.tracker.begin_instant();
        let (instants, final_time) = match self.config.mode {
            IterationMode::Consensus => self.run_consensus(start).await?,
            IterationMode::OnUpdate => self.run_on_update(start).await?,
        };

        self.channel.federate_mut().finalize().await?;
        let final_state = self.channel.federate().state();
        info!(
            participant = %participant,
            instants = instants.len(),
            x = self.x,
            "Coupling complete"
        );

        Ok(CouplingReport {
            participant,
            instants,
            final_state,
            final_time,
        })
    }

    async fn run_consensus(
        &mut self,
        start: SimTime,
    ) -> Result<(Vec<InstantRecord>, SimTime), CouplingError> {
        let mut records = Vec::new();
        let mut time = start;

        loop {
            self.absorb_inputs()?;
            let verdict = self.tracker.verdict();
            let action = self.policy.decide(verdict, time);

            let Some((requested, iterate)) = self.policy.request(action) else {
                records.push(self.close_instant(time, verdict));
                break;
            };

            if let Action::Iterate { .. } = action {
                self.solve_and_track();
                let flag = self.tracker.state().local_flag;
                self.publish_current(flag)?;
            } else {
                records.push(self.close_instant(time, verdict));
            }

            let step = self
                .channel
                .federate_mut()
                .request_time_iterative(requested, iterate)
                .await?;
            debug!(
                participant = %self.channel.federate().name(),
                request = %iterate,
                granted = %step.granted,
                outcome = %step.outcome,
                "Time request returned"
            );

            match self.policy.interpret(time, step)? {
                Transition::SameInstant => {}
                Transition::NewInstant(next) => {
                    if iterate == IterationRequest::ForceIteration {
                        // The runtime cap moved us on before local consensus
                        warn!(
                            participant = %self.channel.federate().name(),
                            time = %time,
                            "Runtime iteration cap reached"
                        );
                        records.push(self.close_instant(time, Verdict::CapReached));
                    }
                    time = next;
                    self.tracker.begin_instant();
                    if self.policy.is_past_horizon(time) {
                        break;
                    }
                }
                Transition::Halted(at) => {
                    if iterate == IterationRequest::ForceIteration {
                        records.push(self.close_instant(time, Verdict::CapReached));
                    }
                    info!(participant = %self.channel.federate().name(), time = %at, "Federation halted");
                    time = at;
                    break;
                }
            }
        }

        Ok((records, time))
    }

    async fn run_on_update(
        &mut self,
        start: SimTime,
    ) -> Result<(Vec<InstantRecord>, SimTime), CouplingError> {
        let mut records = Vec::new();
        let mut time = start;

        loop {
            self.absorb_inputs()?;
            self.solve_and_track();
            if (self.x - self.last_published).abs() > self.config.tolerance {
                let flag = self.tracker.state().local_flag;
                self.publish_current(flag)?;
            }

            let verdict = self.tracker.verdict();
            let action = self.policy.decide(verdict, time);
            let Some((requested, iterate)) = self.policy.request(action) else {
                break;
            };

            let step = self
                .channel
                .federate_mut()
                .request_time_iterative(requested, iterate)
                .await?;
            debug!(
                participant = %self.channel.federate().name(),
                request = %iterate,
                granted = %step.granted,
                outcome = %step.outcome,
                "Time request returned"
            );

            match self.policy.interpret(time, step)? {
                Transition::SameInstant => {}
                Transition::NewInstant(next) => {
                    records.push(self.close_instant(time, verdict));
                    time = next;
                    self.tracker.begin_instant();
                    if self.policy.is_past_horizon(time) {
                        break;
                    }
                }
                Transition::Halted(at) => {
                    records.push(self.close_instant(time, verdict));
                    time = at;
                    break;
                }
            }
        }

        Ok((records, time))
    }

    /// Reads every input, updates peer flags, and reduces to `y`.
    fn absorb_inputs(&mut self) -> Result<f64, CouplingError> {
        for name in &self.config.inputs {
            if let Some((sample, updated)) = self.channel.read_sample(name)? {
                self.latest_inputs.insert(name.clone(), sample.value);
                if updated {
                    self.tracker.observe_peer(name, sample.converged);
                }
            }
        }

        let values: Vec<f64> = self
            .config
            .inputs
            .iter()
            .map(|name| {
                self.latest_inputs
                    .get(name)
                    .copied()
                    .unwrap_or(self.config.initial_input)
            })
            .collect();
        self.y = self
            .config
            .reduction
            .apply(&values)
            .unwrap_or(self.config.initial_input);
        Ok(self.y)
    }

    fn solve_and_track(&mut self) {
        let result = self.solver.solve(
            self.y,
            self.x,
            self.config.tolerance,
            self.config.solver_max_iter,
        );
        if !result.converged {
            self.solver_failures += 1;
            warn!(
                participant = %self.channel.federate().name(),
                y = self.y,
                x = result.x,
                residual = result.residual,
                "Local solver did not converge"
            );
        }
        if result.x.is_finite() {
            self.x = result.x;
        }

        let flag = self.tracker.record_iterate(self.x);
        debug!(
            participant = %self.channel.federate().name(),
            iteration = self.tracker.state().iteration_count,
            x = self.x,
            y = self.y,
            local_flag = flag,
            "Local solve"
        );
    }

    fn publish_current(&mut self, converged: bool) -> Result<(), CouplingError> {
        self.channel
            .publish_sample(&self.config.output, CouplingSample::new(self.x, converged))?;
        self.last_published = self.x;
        Ok(())
    }

    fn close_instant(&mut self, time: SimTime, verdict: Verdict) -> InstantRecord {
        let state = self.tracker.state();
        InstantRecord {
            time,
            x: self.x,
            y: self.y,
            iterations: state.iteration_count,
            local_flag: state.local_flag,
            converged: verdict == Verdict::Converged,
            forced: verdict == Verdict::CapReached,
            solver_failures: std::mem::take(&mut self.solver_failures),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{EllipseResidual, LinearResidual, QuadraticResidual};
    use crate::testing::ScriptedFederate;
    use approx::assert_abs_diff_eq;
    use cosim_env::{LifecycleState, Value};

    #[test]
    fn test_input_reduction() {
        let values = [3.0, 1.0, 2.0];
        assert_eq!(InputReduction::First.apply(&values), Some(3.0));
        assert_eq!(InputReduction::Sum.apply(&values), Some(6.0));
        assert_eq!(InputReduction::Average.apply(&values), Some(2.0));
        assert_eq!(InputReduction::Min.apply(&values), Some(1.0));
        assert_eq!(InputReduction::Max.apply(&values), Some(3.0));
        assert_eq!(InputReduction::Sum.apply(&[]), None);
    }

    /// Peer that re-solves the ellipse against our latest x.
    fn ellipse_peer() -> ScriptedFederate {
        let solver = NewtonSolver::new(EllipseResidual);
        let mut v = 1.0;
        let mut v_prev: Option<f64> = None;
        ScriptedFederate::new("fed1", move |mine: Option<&Value>| {
            let u = mine
                .and_then(|value| CouplingSample::from_value(value).ok())
                .map(|s| s.value)
                .unwrap_or(0.0);
            v = solver.solve(u, v, 1e-8, 10).x;
            let converged = v_prev.map(|p| (v - p).abs() <= 1e-8).unwrap_or(false);
            v_prev = Some(v);
            Some(Value::Text(CouplingSample::new(v, converged).encode()))
        })
    }

    #[tokio::test]
    async fn test_consensus_reaches_coupled_fixed_point() {
        let config = CouplingConfig {
            output: "fed1/x".into(),
            inputs: vec!["fed2/y".into()],
            ..Default::default()
        };
        let coupler = FixedPointCoupler::new(ellipse_peer(), QuadraticResidual, config).unwrap();
        let report = coupler.run().await.unwrap();

        assert_eq!(report.final_state, LifecycleState::Finalized);
        assert_eq!(report.instants.len(), 3);
        assert!(report.all_converged());
        assert_eq!(report.forced_instants(), 0);

        // Both residuals vanish at the final iterate
        let last = report.last().unwrap();
        assert_abs_diff_eq!(QuadraticResidual.value(last.x, last.y), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(EllipseResidual.value(last.y, last.x), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(last.x, -0.2222, epsilon = 1e-3);
    }

    #[tokio::test]
    async fn test_cap_escape_forces_progress() {
        // x = −y against a peer answering y = x + 1: a period-4 oscillation
        let peer = ScriptedFederate::new("fed1", |mine: Option<&Value>| {
            let x = mine
                .and_then(|value| CouplingSample::from_value(value).ok())
                .map(|s| s.value)
                .unwrap_or(0.0);
            Some(Value::Text(CouplingSample::new(x + 1.0, false).encode()))
        });
        let config = CouplingConfig {
            max_iterations: 7,
            ..Default::default()
        };
        let residual = LinearResidual {
            slope: 1.0,
            coupling: 1.0,
            constant: 0.0,
        };
        let report = FixedPointCoupler::new(peer, residual, config)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(report.instants.len(), 3);
        assert!(report.instants.iter().all(|r| r.forced && r.iterations == 7));
        assert_eq!(report.final_state, LifecycleState::Finalized);
    }

    #[tokio::test]
    async fn test_requests_follow_protocol() {
        let config = CouplingConfig {
            output: "fed1/x".into(),
            inputs: vec!["fed2/y".into()],
            instants: 2,
            ..Default::default()
        };
        let coupler = FixedPointCoupler::new(ellipse_peer(), QuadraticResidual, config).unwrap();
        let log = coupler.channel.federate().request_log();
        coupler.run().await.unwrap();

        let requests = log.lock().unwrap();
        // Iterations at t = 0 precede exactly one advance, then iterations at t = Δt
        let advances: Vec<_> = requests
            .iter()
            .filter(|(_, r)| *r == IterationRequest::NoIteration)
            .collect();
        assert_eq!(advances.len(), 1);
        assert_eq!(advances[0].0, SimTime::from_secs_f64(0.01));
        assert_eq!(requests[0], (SimTime::ZERO, IterationRequest::ForceIteration));
        assert!(requests
            .iter()
            .skip_while(|(_, r)| *r != IterationRequest::NoIteration)
            .skip(1)
            .all(|(t, r)| *t == SimTime::from_secs_f64(0.01) && *r == IterationRequest::ForceIteration));
    }

    #[tokio::test]
    async fn test_on_update_stops_when_nothing_changes() {
        let config = CouplingConfig {
            output: "fed1/x".into(),
            inputs: vec!["fed2/y".into()],
            mode: IterationMode::OnUpdate,
            ..Default::default()
        };
        let coupler = FixedPointCoupler::new(ellipse_peer(), QuadraticResidual, config).unwrap();
        let report = coupler.run().await.unwrap();

        assert_eq!(report.instants.len(), 3);
        assert!(report.instants.iter().all(|r| !r.forced));
        let last = report.last().unwrap();
        assert_abs_diff_eq!(last.x, -0.2222, epsilon = 1e-3);
    }

    #[tokio::test]
    async fn test_on_update_records_local_flag() {
        // A peer that never changes: the runtime moves on after a single solve
        let peer = ScriptedFederate::new("fed1", |_: Option<&Value>| {
            Some(Value::Text(CouplingSample::new(1.0, false).encode()))
        });
        let config = CouplingConfig {
            mode: IterationMode::OnUpdate,
            ..Default::default()
        };
        let report = FixedPointCoupler::new(peer, QuadraticResidual, config)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(report.instants.len(), 3);
        // The first iterate has nothing to compare against
        let first = &report.instants[0];
        assert!(!first.local_flag);
        assert!(!first.converged);
        assert!(!first.forced);
        assert!(report.instants[1..].iter().all(|r| r.local_flag && r.converged));
    }

    #[test]
    fn test_rejects_empty_horizon() {
        let peer = ScriptedFederate::new("fed1", |_: Option<&Value>| None);
        let config = CouplingConfig {
            instants: 0,
            ..Default::default()
        };
        let err = FixedPointCoupler::new(peer, QuadraticResidual, config).err().unwrap();
        assert!(matches!(err, CouplingError::Config(_)));

        let config = CouplingConfig {
            time_step: SimTime::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(CouplingConfig::default().validate().is_ok());
    }
}
