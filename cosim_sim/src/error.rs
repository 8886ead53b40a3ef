//! Error type for the simulation harness.

use cosim_core::CouplingError;
use cosim_env::FederationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Coupling(#[from] CouplingError),

    #[error(transparent)]
    Federation(#[from] FederationError),

    #[error("Participant task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SimError {
    /// Returns true for connection and lifecycle errors, which end the whole run.
    pub fn is_fatal(&self) -> bool {
        match self {
            SimError::Federation(e) => e.is_fatal(),
            SimError::Coupling(CouplingError::Federation(e)) => e.is_fatal(),
            _ => false,
        }
    }
}
