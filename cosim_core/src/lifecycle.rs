//! Participant lifecycle state machine.
//!
//! ```text
//! Created -> Initializing -> Executing -> Finalized
//! ```
//!
//! Strictly linear. Value, message and filter participants all go through
//! the same checks.

use cosim_env::{FederationError, LifecycleState};

/// Lifecycle of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantLifecycle {
    state: LifecycleState,
}

impl Default for ParticipantLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticipantLifecycle {
    /// Creates a lifecycle in `Created`.
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Created,
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state == LifecycleState::Finalized
    }

    /// `Created -> Initializing`.
    pub fn enter_initializing(&mut self) -> Result<(), FederationError> {
        self.transition(LifecycleState::Created, LifecycleState::Initializing, "enter_initializing")
    }

    /// `Initializing -> Executing`.
    pub fn enter_executing(&mut self) -> Result<(), FederationError> {
        self.transition(LifecycleState::Initializing, LifecycleState::Executing, "enter_executing")
    }

    /// `Executing -> Finalized`. Terminal.
    pub fn finalize(&mut self) -> Result<(), FederationError> {
        self.transition(LifecycleState::Executing, LifecycleState::Finalized, "finalize")
    }

    /// Checks that the participant has not been finalized.
    pub fn ensure_active(&self, operation: &'static str) -> Result<(), FederationError> {
        if self.is_finalized() {
            return Err(FederationError::InvalidState {
                state: self.state,
                operation,
            });
        }
        Ok(())
    }

    /// Checks that the participant is in executing mode.
    pub fn ensure_executing(&self, operation: &'static str) -> Result<(), FederationError> {
        if self.state != LifecycleState::Executing {
            return Err(FederationError::InvalidState {
                state: self.state,
                operation,
            });
        }
        Ok(())
    }

    /// Checks that registrations are still allowed (before executing mode).
    pub fn ensure_configurable(&self, operation: &'static str) -> Result<(), FederationError> {
        match self.state {
            LifecycleState::Created | LifecycleState::Initializing => Ok(()),
            state => Err(FederationError::InvalidState { state, operation }),
        }
    }

    fn transition(
        &mut self,
        from: LifecycleState,
        to: LifecycleState,
        operation: &'static str,
    ) -> Result<(), FederationError> {
        self.ensure_active(operation)?;
        if self.state != from {
            return Err(FederationError::StateTransition {
                from: self.state,
                operation,
            });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_progression() {
        let mut lc = ParticipantLifecycle::new();
        assert_eq!(lc.state(), LifecycleState::Created);

        lc.enter_initializing().unwrap();
        lc.enter_executing().unwrap();
        lc.finalize().unwrap();

        assert!(lc.is_finalized());
    }

    #[test]
    fn test_out_of_order_transitions_rejected() {
        let mut lc = ParticipantLifecycle::new();

        // Skipping initialization
        let err = lc.enter_executing().unwrap_err();
        assert_eq!(
            err,
            FederationError::StateTransition {
                from: LifecycleState::Created,
                operation: "enter_executing",
            }
        );

        // Finalize only from executing
        assert!(matches!(
            lc.finalize(),
            Err(FederationError::StateTransition { .. })
        ));

        lc.enter_initializing().unwrap();
        assert!(lc.enter_initializing().is_err());
        assert_eq!(lc.state(), LifecycleState::Initializing);
    }

    #[test]
    fn test_finalized_is_terminal() {
        let mut lc = ParticipantLifecycle::new();
        lc.enter_initializing().unwrap();
        lc.enter_executing().unwrap();
        lc.finalize().unwrap();

        // Every further operation is an invalid-state error
        assert!(matches!(
            lc.finalize(),
            Err(FederationError::InvalidState { .. })
        ));
        assert!(matches!(
            lc.enter_initializing(),
            Err(FederationError::InvalidState { .. })
        ));
        assert!(lc.ensure_active("publish").is_err());
        assert!(lc.ensure_executing("request_time").is_err());
    }

    #[test]
    fn test_registration_window() {
        let mut lc = ParticipantLifecycle::new();
        assert!(lc.ensure_configurable("register_publication").is_ok());
        lc.enter_initializing().unwrap();
        assert!(lc.ensure_configurable("register_publication").is_ok());
        lc.enter_executing().unwrap();
        assert!(lc.ensure_configurable("register_publication").is_err());
    }
}
