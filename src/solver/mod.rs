mod bicgstab;
mod lu;

pub use lu::Factors;

use crate::arith::Arithmetic;
use thiserror::Error;

/// Dense row-major square matrix over an abstract scalar. The solver layer
/// uses this instead of nalgebra types because the arbitrary-precision
/// scalar carries its context in the calculator, not in operator traits.
#[derive(Clone, Debug)]
pub struct SquareMatrix<T> {
    n: usize,
    values: Vec<T>,
}

impl<T: Clone> SquareMatrix<T> {
    pub fn from_fn(n: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut values = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                values.push(f(i, j));
            }
        }
        Self { n, values }
    }

    pub fn filled(n: usize, value: T) -> Self {
        Self {
            n,
            values: vec![value; n * n],
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn get(&self, i: usize, j: usize) -> &T {
        &self.values[i * self.n + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: T) {
        self.values[i * self.n + j] = value;
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolverError {
    /// Factorization hit a zero pivot or produced invalid values; the
    /// system has no usable direct solution.
    #[error("coefficient matrix is singular")]
    SingularMatrix,
}

/// Best-effort result of a linear solve. `converged` is only ever false on
/// the Krylov path, where the caller decides whether the outer iteration
/// continues.
#[derive(Clone, Debug)]
pub struct Solution<T> {
    pub x: Vec<T>,
    pub converged: bool,
}

/// Linear-solver strategy selected per calculator instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SolverStrategy {
    /// LU factorization with partial pivoting.
    Direct,
    /// Bounded BiCGSTAB with its own tolerance and inner iteration cap,
    /// independent of any outer iteration budget.
    BiCgStab { tolerance: f64, max_iterations: usize },
}

impl SolverStrategy {
    /// Krylov defaults tight enough that inner error never dominates an
    /// outer power-mismatch target of 1e-10 or looser.
    pub fn bicgstab() -> Self {
        SolverStrategy::BiCgStab {
            tolerance: 1e-12,
            max_iterations: 5_000,
        }
    }

    pub fn solve<A: Arithmetic>(
        &self,
        calc: &A,
        a: &SquareMatrix<A::Value>,
        b: &[A::Value],
    ) -> Result<Solution<A::Value>, SolverError> {
        match *self {
            SolverStrategy::Direct => {
                let factors = Factors::factorize(calc, a)?;
                let x = factors.solve(calc, b);
                if x.iter().any(|v| !calc.is_valid(v)) {
                    return Err(SolverError::SingularMatrix);
                }
                Ok(Solution { x, converged: true })
            }
            SolverStrategy::BiCgStab {
                tolerance,
                max_iterations,
            } => Ok(bicgstab::solve(calc, a, b, tolerance, max_iterations)),
        }
    }
}
