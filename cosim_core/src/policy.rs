//! Time-advance decisions.
//!
//! Turns a convergence verdict into the next time request and interprets
//! the runtime's answer.

use cosim_env::{IterationOutcome, IterationRequest, SimTime, TimeStep};
use serde::{Deserialize, Serialize};

use crate::convergence::Verdict;
use crate::error::CouplingError;

/// How a participant iterates within an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationMode {
    /// Force iteration until the AND of all convergence bits holds.
    #[default]
    Consensus,
    /// Let the runtime re-offer the instant whenever peers publish.
    OnUpdate,
}

/// Next step chosen by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Move to the next instant without iteration.
    Advance { next: SimTime },
    /// Re-run the current instant.
    Iterate { at: SimTime },
    /// Move on unless the runtime has new data for the current instant.
    AwaitUpdates { next: SimTime },
    /// The run horizon is reached.
    Finish,
}

/// What the granted step means for the participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    SameInstant,
    NewInstant(SimTime),
    /// The runtime will not grant anything further.
    Halted(SimTime),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeAdvancePolicy {
    mode: IterationMode,
    time_step: SimTime,
    last_instant: SimTime,
}

impl TimeAdvancePolicy {
    /// Policy for instants `0, Δt, …, (instants − 1)·Δt`.
    pub fn new(mode: IterationMode, time_step: SimTime, instants: u32) -> Self {
        let last = (instants.max(1) - 1) as i64;
        Self {
            mode,
            time_step,
            last_instant: SimTime::from_nanos(time_step.as_nanos().saturating_mul(last)),
        }
    }

    pub fn mode(&self) -> IterationMode {
        self.mode
    }

    pub fn last_instant(&self) -> SimTime {
        self.last_instant
    }

    pub fn next_instant(&self, current: SimTime) -> SimTime {
        current + self.time_step
    }

    pub fn is_past_horizon(&self, time: SimTime) -> bool {
        time > self.last_instant
    }

    pub fn decide(&self, verdict: Verdict, current: SimTime) -> Action {
        let next = self.next_instant(current);
        match self.mode {
            IterationMode::Consensus => match verdict {
                Verdict::Continue => Action::Iterate { at: current },
                Verdict::Converged | Verdict::CapReached if current >= self.last_instant => {
                    Action::Finish
                }
                Verdict::Converged | Verdict::CapReached => Action::Advance { next },
            },
            IterationMode::OnUpdate => match verdict {
                Verdict::CapReached => Action::Advance { next },
                Verdict::Converged | Verdict::Continue => Action::AwaitUpdates { next },
            },
        }
    }

    /// Time request for an action. `None` for `Finish`.
    pub fn request(&self, action: Action) -> Option<(SimTime, IterationRequest)> {
        match action {
            Action::Advance { next } => Some((next, IterationRequest::NoIteration)),
            Action::Iterate { at } => Some((at, IterationRequest::ForceIteration)),
            Action::AwaitUpdates { next } => Some((next, IterationRequest::IterateIfNeeded)),
            Action::Finish => None,
        }
    }

    /// Interprets a grant relative to the instant the request was made at.
    pub fn interpret(&self, current: SimTime, step: TimeStep) -> Result<Transition, CouplingError> {
        if step.granted < current {
            return Err(CouplingError::TimeRegression {
                previous: current,
                granted: step.granted,
            });
        }
        match step.outcome {
            IterationOutcome::Error => Err(CouplingError::FederationFailed { at: step.granted }),
            IterationOutcome::Halted => Ok(Transition::Halted(step.granted)),
            IterationOutcome::Iterating | IterationOutcome::NextStep => {
                if step.granted > current {
                    Ok(Transition::NewInstant(step.granted))
                } else {
                    Ok(Transition::SameInstant)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: IterationMode) -> TimeAdvancePolicy {
        TimeAdvancePolicy::new(mode, SimTime::from_secs_f64(0.01), 3)
    }

    #[test]
    fn test_consensus_decisions() {
        let p = policy(IterationMode::Consensus);
        let t0 = SimTime::ZERO;
        let t1 = SimTime::from_secs_f64(0.01);

        assert_eq!(p.decide(Verdict::Continue, t0), Action::Iterate { at: t0 });
        assert_eq!(p.decide(Verdict::Converged, t0), Action::Advance { next: t1 });
        assert_eq!(p.decide(Verdict::CapReached, t0), Action::Advance { next: t1 });

        // Last instant finishes instead of advancing
        assert_eq!(p.last_instant(), SimTime::from_secs_f64(0.02));
        assert_eq!(p.decide(Verdict::Converged, p.last_instant()), Action::Finish);
    }

    #[test]
    fn test_on_update_decisions() {
        let p = policy(IterationMode::OnUpdate);
        let t0 = SimTime::ZERO;
        let t1 = SimTime::from_secs_f64(0.01);

        assert_eq!(p.decide(Verdict::Continue, t0), Action::AwaitUpdates { next: t1 });
        assert_eq!(p.decide(Verdict::CapReached, t0), Action::Advance { next: t1 });
        assert_eq!(
            p.request(Action::AwaitUpdates { next: t1 }),
            Some((t1, IterationRequest::IterateIfNeeded))
        );
        assert_eq!(p.request(Action::Finish), None);
    }

    #[test]
    fn test_interpret() {
        let p = policy(IterationMode::Consensus);
        let t0 = SimTime::ZERO;
        let t1 = SimTime::from_secs_f64(0.01);
        let step = |granted, outcome| TimeStep {
            requested: t1,
            granted,
            outcome,
        };

        assert_eq!(
            p.interpret(t0, step(t0, IterationOutcome::Iterating)).unwrap(),
            Transition::SameInstant
        );
        assert_eq!(
            p.interpret(t0, step(t1, IterationOutcome::NextStep)).unwrap(),
            Transition::NewInstant(t1)
        );
        assert_eq!(
            p.interpret(t0, step(t1, IterationOutcome::Halted)).unwrap(),
            Transition::Halted(t1)
        );
        assert!(matches!(
            p.interpret(t1, step(t0, IterationOutcome::NextStep)),
            Err(CouplingError::TimeRegression { .. })
        ));
        assert!(matches!(
            p.interpret(t0, step(t0, IterationOutcome::Error)),
            Err(CouplingError::FederationFailed { .. })
        ));
    }
}
