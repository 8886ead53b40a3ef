//! Co-simulation Core - time-advance and convergence protocol.
//!
//! Participants that compute coupled subsystems agree on consistent coupling
//! values at every discrete instant before anyone advances:
//! 1. **Fixed-point coupling**: local Newton solves against the latest peer
//!    value, with a convergence bit packed into every published sample and a
//!    bounded-iteration escape
//! 2. **Loose coupling**: one-instant lag, no intra-instant loop
//! 3. **Message exchange**: addressed messages drained after every grant,
//!    with runtime-reconfigurable filters on the path
//!
//! Every driver is generic over [`cosim_env::Federate`] and never touches
//! another participant except through the federation runtime.

pub mod channel;
pub mod convergence;
pub mod coupler;
pub mod error;
pub mod lifecycle;
pub mod loose;
pub mod messaging;
pub mod metrics;
pub mod policy;
pub mod solver;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use channel::{CouplingChannel, CouplingSample};
pub use convergence::{ConvergenceState, ConvergenceTracker, Verdict};
pub use coupler::{CouplingConfig, FixedPointCoupler, InputReduction};
pub use error::CouplingError;
pub use lifecycle::ParticipantLifecycle;
pub use loose::{InstantClock, LooseConfig, LooseCoupler, LooseModel, Relaxation};
pub use messaging::{
    ExchangeConfig, FilterController, FilterControllerConfig, MessageExchange, ScheduledFilter,
};
pub use metrics::{CouplingReport, FilterReport, InstantRecord, LooseReport, MessageLog};
pub use policy::{Action, IterationMode, TimeAdvancePolicy, Transition};
pub use solver::{
    EllipseResidual, FnResidual, LinearResidual, NewtonSolver, QuadraticResidual, Residual,
    SolverResult,
};
