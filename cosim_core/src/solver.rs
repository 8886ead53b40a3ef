//! Local Newton resolution of a participant's own state variable.
//!
//! Each participant solves `f(x, y) = 0` for its own `x` given the latest
//! peer value `y`:
//!
//! ```text
//! x <- x - f(x, y) / f'(x, y)
//! ```
//!
//! Running out of iterations or hitting a flat derivative is reported as
//! `converged = false`, never as an error.

use serde::{Deserialize, Serialize};

/// A participant-defined residual and its derivative with respect to `x`.
pub trait Residual: Send + 'static {
    /// `f(x, y)`.
    fn value(&self, x: f64, y: f64) -> f64;

    /// `∂f/∂x (x, y)`.
    fn derivative(&self, x: f64, y: f64) -> f64;
}

/// `f(x, y) = x² − 2x − y + 0.5`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuadraticResidual;

impl Residual for QuadraticResidual {
    fn value(&self, x: f64, y: f64) -> f64 {
        x * x - 2.0 * x - y + 0.5
    }

    fn derivative(&self, x: f64, _y: f64) -> f64 {
        2.0 * x - 2.0
    }
}

/// `g(v, u) = u² + 4v² − 4`, solved for `v`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EllipseResidual;

impl Residual for EllipseResidual {
    fn value(&self, v: f64, u: f64) -> f64 {
        u * u + 4.0 * v * v - 4.0
    }

    fn derivative(&self, v: f64, _u: f64) -> f64 {
        8.0 * v
    }
}

/// `f(x, y) = slope·x + coupling·y + constant`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearResidual {
    pub slope: f64,
    pub coupling: f64,
    pub constant: f64,
}

impl Residual for LinearResidual {
    fn value(&self, x: f64, y: f64) -> f64 {
        self.slope * x + self.coupling * y + self.constant
    }

    fn derivative(&self, _x: f64, _y: f64) -> f64 {
        self.slope
    }
}

/// Residual built from two closures.
pub struct FnResidual<V, D> {
    value: V,
    derivative: D,
}

impl<V, D> FnResidual<V, D>
where
    V: Fn(f64, f64) -> f64 + Send + 'static,
    D: Fn(f64, f64) -> f64 + Send + 'static,
{
    pub fn new(value: V, derivative: D) -> Self {
        Self { value, derivative }
    }
}

impl<V, D> Residual for FnResidual<V, D>
where
    V: Fn(f64, f64) -> f64 + Send + 'static,
    D: Fn(f64, f64) -> f64 + Send + 'static,
{
    fn value(&self, x: f64, y: f64) -> f64 {
        (self.value)(x, y)
    }

    fn derivative(&self, x: f64, y: f64) -> f64 {
        (self.derivative)(x, y)
    }
}

/// Outcome of one `solve` call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverResult {
    /// Last iterate (the root on success).
    pub x: f64,

    pub converged: bool,

    /// Newton updates performed.
    pub iterations: u32,

    /// `|f(x, y)|` at the returned `x`.
    pub residual: f64,
}

/// Scalar Newton solver over a [`Residual`].
#[derive(Debug, Clone)]
pub struct NewtonSolver<R> {
    residual: R,

    /// Derivatives smaller than this in magnitude abort the solve.
    pub min_derivative: f64,
}

impl<R: Residual> NewtonSolver<R> {
    pub fn new(residual: R) -> Self {
        Self {
            residual,
            min_derivative: 1e-12,
        }
    }

    pub fn residual(&self) -> &R {
        &self.residual
    }

    /// Solves `f(x, y) = 0` starting from `x0`.
    ///
    /// Succeeds when `|f(x, y)| < tol`. After `max_iter` updates without
    /// success, returns the last iterate with `converged = false`.
    pub fn solve(&self, y: f64, x0: f64, tol: f64, max_iter: u32) -> SolverResult {
        let mut x = x0;

        for iterations in 0..max_iter {
            let f = self.residual.value(x, y);
            if !f.is_finite() {
                return Self::failed(x, iterations, f);
            }
            if f.abs() < tol {
                return SolverResult {
                    x,
                    converged: true,
                    iterations,
                    residual: f.abs(),
                };
            }

            let d = self.residual.derivative(x, y);
            if !d.is_finite() || d.abs() < self.min_derivative {
                return Self::failed(x, iterations, f);
            }
            x -= f / d;
        }

        let f = self.residual.value(x, y);
        SolverResult {
            x,
            converged: f.is_finite() && f.abs() < tol,
            iterations: max_iter,
            residual: f.abs(),
        }
    }

    fn failed(x: f64, iterations: u32, f: f64) -> SolverResult {
        SolverResult {
            x,
            converged: false,
            iterations,
            residual: f.abs(),
        }
    }
}
