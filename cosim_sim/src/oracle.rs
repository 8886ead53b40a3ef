//! Ground truth for the coupled nonlinear system.
//!
//! Solves both residuals together as one 2-D system with a full Newton
//! step, the way a monolithic (non-federated) solver would:
//! - `f1(x, y) = x² − 2x − y + 0.5`
//! - `f2(x, y) = x² + 4y² − 4`

use nalgebra::{Matrix2, Vector2};
use serde::Serialize;

/// Result of the monolithic solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OracleSolution {
    pub x: f64,
    pub y: f64,
    pub iterations: u32,
    pub converged: bool,
}

/// Monolithic Newton solver for the two-participant example.
#[derive(Debug, Clone)]
pub struct CoupledSystemOracle {
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for CoupledSystemOracle {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 50,
        }
    }
}

impl CoupledSystemOracle {
    pub fn new(tolerance: f64, max_iterations: u32) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }

    pub fn residual(state: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (state.x, state.y);
        Vector2::new(x * x - 2.0 * x - y + 0.5, x * x + 4.0 * y * y - 4.0)
    }

    pub fn jacobian(state: &Vector2<f64>) -> Matrix2<f64> {
        let (x, y) = (state.x, state.y);
        Matrix2::new(2.0 * x - 2.0, -1.0, 2.0 * x, 8.0 * y)
    }

    /// Solves from `(x0, y0)`. A singular Jacobian stops the iteration.
    pub fn solve(&self, x0: f64, y0: f64) -> OracleSolution {
        let mut state = Vector2::new(x0, y0);
        let mut iterations = 0;

        while iterations < self.max_iterations {
            let f = Self::residual(&state);
            if f.norm() < self.tolerance {
                break;
            }
            let Some(inverse) = Self::jacobian(&state).try_inverse() else {
                break;
            };
            state -= inverse * f;
            iterations += 1;
        }

        OracleSolution {
            x: state.x,
            y: state.y,
            iterations,
            converged: Self::residual(&state).norm() < self.tolerance,
        }
    }

    /// The fixed point the federated run starts next to.
    pub fn reference(&self) -> OracleSolution {
        self.solve(0.0, 1.0)
    }
}
