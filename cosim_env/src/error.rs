//! Error types for the federation abstraction.

use crate::types::LifecycleState;
use thiserror::Error;

/// Errors returned by calls that cross the federation runtime boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FederationError {
    /// The runtime could not be reached or refused the participant.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Lifecycle misuse (e.g. entering executing mode twice).
    #[error("State transition error: cannot {operation} from {from}")]
    StateTransition {
        from: LifecycleState,
        operation: &'static str,
    },

    /// Operation not permitted in the participant's current state.
    #[error("Invalid state: {operation} is not allowed in {state}")]
    InvalidState {
        state: LifecycleState,
        operation: &'static str,
    },

    /// Bad handle, unknown name or target, or malformed parameters.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Another participant left abnormally; the federation is unusable.
    #[error("Federation aborted: {0}")]
    Aborted(String),
}

impl FederationError {
    /// Creates a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates an aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted(reason.into())
    }

    /// Returns true for errors that must terminate the participant's run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::StateTransition { .. } | Self::Aborted(_)
        )
    }
}
