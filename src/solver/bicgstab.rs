//! Bi-Conjugate Gradient Stabilized solve for nonsymmetric complex systems,
//! written against the [`Arithmetic`] contract so it runs unchanged at
//! double or arbitrary precision.
//!
//! van der Vorst (1992), "Bi-CGSTAB: A Fast and Smoothly Converging Variant
//! of Bi-CG for the Solution of Nonsymmetric Linear Systems".

use super::{Solution, SquareMatrix};
use crate::arith::Arithmetic;

const BREAKDOWN: f64 = 1e-60;

fn matvec<A: Arithmetic>(
    calc: &A,
    a: &SquareMatrix<A::Value>,
    x: &[A::Value],
) -> Vec<A::Value> {
    let n = a.n();
    let mut y = Vec::with_capacity(n);
    for i in 0..n {
        let mut acc = calc.zero();
        for j in 0..n {
            acc = calc.add(&acc, &calc.mul(a.get(i, j), &x[j]));
        }
        y.push(acc);
    }
    y
}

/// `sum conj(x_i) * y_i`
fn dot<A: Arithmetic>(calc: &A, x: &[A::Value], y: &[A::Value]) -> A::Value {
    let mut acc = calc.zero();
    for (a, b) in x.iter().zip(y) {
        acc = calc.add(&acc, &calc.mul(&calc.conj(a), b));
    }
    acc
}

fn norm<A: Arithmetic>(calc: &A, x: &[A::Value]) -> f64 {
    x.iter().map(|v| calc.magnitude(v).powi(2)).sum::<f64>().sqrt()
}

/// `x + scale * y` element-wise.
fn axpy<A: Arithmetic>(
    calc: &A,
    x: &[A::Value],
    scale: &A::Value,
    y: &[A::Value],
) -> Vec<A::Value> {
    x.iter()
        .zip(y)
        .map(|(a, b)| calc.add(a, &calc.mul(scale, b)))
        .collect()
}

pub(super) fn solve<A: Arithmetic>(
    calc: &A,
    a: &SquareMatrix<A::Value>,
    b: &[A::Value],
    tolerance: f64,
    max_iterations: usize,
) -> Solution<A::Value> {
    let n = a.n();
    let mut x = vec![calc.zero(); n];
    let rhs_norm = norm(calc, b);
    if rhs_norm == 0.0 {
        return Solution { x, converged: true };
    }
    let threshold = tolerance * rhs_norm;

    let mut r = b.to_vec();
    let r_tilde = r.clone();
    let mut rho = calc.one();
    let mut alpha = calc.one();
    let mut omega = calc.one();
    let mut p = vec![calc.zero(); n];
    let mut v = vec![calc.zero(); n];

    for iteration in 0..max_iterations {
        let rho_new = dot(calc, &r_tilde, &r);
        if calc.magnitude(&rho_new) < BREAKDOWN {
            break;
        }
        let beta = calc.mul(&calc.div(&rho_new, &rho), &calc.div(&alpha, &omega));
        rho = rho_new;

        // p = r + beta * (p - omega * v)
        let neg_omega = calc.neg(&omega);
        let p_shifted = axpy(calc, &p, &neg_omega, &v);
        p = axpy(calc, &r, &beta, &p_shifted);

        v = matvec(calc, a, &p);
        let denom = dot(calc, &r_tilde, &v);
        if calc.magnitude(&denom) < BREAKDOWN {
            break;
        }
        alpha = calc.div(&rho, &denom);

        let neg_alpha = calc.neg(&alpha);
        let s = axpy(calc, &r, &neg_alpha, &v);
        if norm(calc, &s) <= threshold {
            x = axpy(calc, &x, &alpha, &p);
            return Solution { x, converged: true };
        }

        let t = matvec(calc, a, &s);
        let tt = dot(calc, &t, &t);
        if calc.magnitude(&tt) < BREAKDOWN {
            x = axpy(calc, &x, &alpha, &p);
            break;
        }
        omega = calc.div(&dot(calc, &t, &s), &tt);

        x = axpy(calc, &x, &alpha, &p);
        x = axpy(calc, &x, &omega, &s);
        let neg_omega = calc.neg(&omega);
        r = axpy(calc, &s, &neg_omega, &t);

        if x.iter().any(|value| !calc.is_valid(value)) {
            tracing::debug!(iteration, "bicgstab produced invalid values, aborting");
            break;
        }

        let res = norm(calc, &r);
        tracing::trace!(iteration, residual = res, "bicgstab step");
        if res <= threshold {
            return Solution { x, converged: true };
        }
        if calc.magnitude(&omega) < BREAKDOWN {
            break;
        }
    }

    Solution {
        x,
        converged: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::DoubleArithmetic;
    use approx::assert_relative_eq;
    use num_complex::Complex64;

    #[test]
    fn diagonally_dominant_system_converges_quickly() {
        let calc = DoubleArithmetic;
        let n = 6;
        let a = SquareMatrix::from_fn(n, |i, j| {
            if i == j {
                Complex64::new(10.0, 0.5)
            } else if i.abs_diff(j) == 1 {
                Complex64::new(1.0, -0.2)
            } else {
                Complex64::new(0.0, 0.0)
            }
        });
        let b: Vec<_> = (0..n).map(|i| Complex64::new(i as f64 + 1.0, 0.0)).collect();
        let sol = solve(&calc, &a, &b, 1e-12, 500);
        assert!(sol.converged);
        let residual: Vec<_> = matvec(&calc, &a, &sol.x)
            .iter()
            .zip(&b)
            .map(|(p, q)| p - q)
            .collect();
        assert_relative_eq!(norm(&calc, &residual), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_rhs_returns_zero_solution() {
        let calc = DoubleArithmetic;
        let a = SquareMatrix::filled(3, Complex64::new(1.0, 0.0));
        let b = vec![Complex64::new(0.0, 0.0); 3];
        let sol = solve(&calc, &a, &b, 1e-10, 10);
        assert!(sol.converged);
        assert!(sol.x.iter().all(|v| v.norm() == 0.0));
    }
}
