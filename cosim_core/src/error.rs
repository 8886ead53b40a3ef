//! Errors raised by the coordination drivers.

use cosim_env::{FederationError, SimTime};
use thiserror::Error;

/// Errors from the coupling protocol.
///
/// Local solver non-convergence is not an error; it is reported through
/// `SolverResult::converged`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CouplingError {
    #[error("Federation error: {0}")]
    Federation(#[from] FederationError),

    /// A packed coupling value could not be decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Unknown coupling variable: {0}")]
    UnknownVariable(String),

    /// The runtime granted a time earlier than a previous grant.
    #[error("Time regression: granted {granted} after {previous}")]
    TimeRegression { previous: SimTime, granted: SimTime },

    /// A driver was configured with values it cannot run.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The runtime answered a time request with an error outcome.
    #[error("Federation failed at {at}")]
    FederationFailed { at: SimTime },
}

impl CouplingError {
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unknown_variable(name: impl Into<String>) -> Self {
        Self::UnknownVariable(name.into())
    }
}
