//! Run records produced by the coordination drivers.
//!
//! Every driver returns a report describing what it published, observed
//! and decided, for assertions in the simulation harness and for export.

use cosim_env::{FilterSpec, LifecycleState, Message, SimTime};
use serde::Serialize;

// =============================================================================
// FIXED-POINT COUPLING
// =============================================================================

/// Outcome of one instant of fixed-point iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstantRecord {
    pub time: SimTime,

    /// Own state variable when leaving the instant.
    pub x: f64,

    /// Reduced coupling input used for the last solve.
    pub y: f64,

    /// Local solves performed during the instant.
    pub iterations: u32,

    pub local_flag: bool,

    /// Left the instant with the global flag set.
    pub converged: bool,

    /// Left the instant through an iteration cap.
    pub forced: bool,

    /// Solves that ended with `converged = false`.
    pub solver_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouplingReport {
    pub participant: String,
    pub instants: Vec<InstantRecord>,
    pub final_state: LifecycleState,
    pub final_time: SimTime,
}

impl CouplingReport {
    pub fn total_iterations(&self) -> u32 {
        self.instants.iter().map(|r| r.iterations).sum()
    }

    pub fn forced_instants(&self) -> usize {
        self.instants.iter().filter(|r| r.forced).count()
    }

    pub fn solver_failures(&self) -> u32 {
        self.instants.iter().map(|r| r.solver_failures).sum()
    }

    /// True if every instant ended with the global flag set.
    pub fn all_converged(&self) -> bool {
        !self.instants.is_empty() && self.instants.iter().all(|r| r.converged)
    }

    pub fn last(&self) -> Option<&InstantRecord> {
        self.instants.last()
    }
}

// =============================================================================
// LOOSE COUPLING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Publication {
    pub time: SimTime,
    pub value: f64,
}

/// A peer value seen as updated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Observation {
    /// Granted time at which the update became visible.
    pub observed_at: SimTime,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LooseReport {
    pub participant: String,
    pub publications: Vec<Publication>,
    pub observations: Vec<Observation>,
    pub final_state: LifecycleState,
}

// =============================================================================
// MESSAGING
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentMessage {
    pub time: SimTime,
    pub destination: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivedMessage {
    /// Granted time after which the message was drained.
    pub granted_at: SimTime,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageLog {
    pub participant: String,
    pub sent: Vec<SentMessage>,
    pub received: Vec<ReceivedMessage>,
    /// Most messages drained after a single grant.
    pub max_coalesced: usize,
    pub final_state: LifecycleState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedFilter {
    pub time: SimTime,
    pub spec: FilterSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterReport {
    pub participant: String,
    pub applied: Vec<AppliedFilter>,
    pub final_state: LifecycleState,
}
