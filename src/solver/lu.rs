use super::{SolverError, SquareMatrix};
use crate::arith::Arithmetic;

/// LU factorization with partial pivoting, reusable across right-hand
/// sides. The fast-decoupled method factorizes its two constant blocks
/// once and back-substitutes every iteration.
pub struct Factors<A: Arithmetic> {
    lu: SquareMatrix<A::Value>,
    pivots: Vec<usize>,
}

impl<A: Arithmetic> Factors<A> {
    pub fn factorize(calc: &A, a: &SquareMatrix<A::Value>) -> Result<Self, SolverError> {
        let n = a.n();
        let mut lu = a.clone();
        let mut pivots = vec![0usize; n];
        for k in 0..n {
            let mut p = k;
            let mut best = calc.magnitude(lu.get(k, k));
            for i in k + 1..n {
                let m = calc.magnitude(lu.get(i, k));
                if m > best {
                    best = m;
                    p = i;
                }
            }
            if !best.is_finite() || best == 0.0 {
                return Err(SolverError::SingularMatrix);
            }
            pivots[k] = p;
            if p != k {
                swap_rows(&mut lu, k, p);
            }
            let pivot = lu.get(k, k).clone();
            for i in k + 1..n {
                let factor = calc.div(lu.get(i, k), &pivot);
                if !calc.is_valid(&factor) {
                    return Err(SolverError::SingularMatrix);
                }
                lu.set(i, k, factor.clone());
                for j in k + 1..n {
                    let updated = calc.sub(lu.get(i, j), &calc.mul(&factor, lu.get(k, j)));
                    lu.set(i, j, updated);
                }
            }
        }
        Ok(Self { lu, pivots })
    }

    pub fn solve(&self, calc: &A, b: &[A::Value]) -> Vec<A::Value> {
        let n = self.lu.n();
        debug_assert_eq!(b.len(), n);
        let mut x = b.to_vec();
        for k in 0..n {
            x.swap(k, self.pivots[k]);
        }
        for i in 0..n {
            for j in 0..i {
                x[i] = calc.sub(&x[i], &calc.mul(self.lu.get(i, j), &x[j]));
            }
        }
        for i in (0..n).rev() {
            for j in i + 1..n {
                x[i] = calc.sub(&x[i], &calc.mul(self.lu.get(i, j), &x[j]));
            }
            x[i] = calc.div(&x[i], self.lu.get(i, i));
        }
        x
    }
}

fn swap_rows<T: Clone>(m: &mut SquareMatrix<T>, a: usize, b: usize) {
    for j in 0..m.n() {
        let tmp = m.get(a, j).clone();
        m.set(a, j, m.get(b, j).clone());
        m.set(b, j, tmp);
    }
}
