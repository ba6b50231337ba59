use crate::arith::Arithmetic;

/// Fixed-length power series with coefficients in an [`Arithmetic`]
/// representation. The length is set at construction and never grows; all
/// products are truncated to it.
#[derive(Clone, Debug)]
pub struct PowerSeries<A: Arithmetic> {
    coefficients: Vec<A::Value>,
}

impl<A: Arithmetic> PowerSeries<A> {
    pub fn new(len: usize, calc: &A) -> Self {
        Self {
            coefficients: vec![calc.zero(); len],
        }
    }

    pub fn from_coefficients(coefficients: Vec<A::Value>) -> Self {
        Self { coefficients }
    }

    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    pub fn coeff(&self, k: usize) -> &A::Value {
        &self.coefficients[k]
    }

    pub fn set_coeff(&mut self, k: usize, value: A::Value) {
        self.coefficients[k] = value;
    }

    /// Coefficient-wise sum; both series must have the same length.
    pub fn add(&self, other: &Self, calc: &A) -> Self {
        debug_assert_eq!(self.len(), other.len());
        Self {
            coefficients: self
                .coefficients
                .iter()
                .zip(&other.coefficients)
                .map(|(a, b)| calc.add(a, b))
                .collect(),
        }
    }

    /// Single product coefficient: `sum over i + j = k of self[i] * other[j]`.
    pub fn convolve_coeff(&self, other: &Self, k: usize, calc: &A) -> A::Value {
        let mut acc = calc.zero();
        for i in 0..=k {
            let j = k - i;
            if i < self.len() && j < other.len() {
                acc = calc.add(&acc, &calc.mul(&self.coefficients[i], &other.coefficients[j]));
            }
        }
        acc
    }

    /// Cauchy product truncated to this series' length.
    pub fn multiply(&self, other: &Self, calc: &A) -> Self {
        Self {
            coefficients: (0..self.len())
                .map(|k| self.convolve_coeff(other, k, calc))
                .collect(),
        }
    }

    /// Horner evaluation at `at`.
    pub fn evaluate(&self, at: &A::Value, calc: &A) -> A::Value {
        let mut acc = calc.zero();
        for c in self.coefficients.iter().rev() {
            acc = calc.add(&calc.mul(&acc, at), c);
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::{Arithmetic, DoubleArithmetic, PreciseArithmetic};
    use approx::assert_relative_eq;
    use num_complex::Complex64;

    fn series_from(values: &[f64], calc: &DoubleArithmetic) -> PowerSeries<DoubleArithmetic> {
        PowerSeries::from_coefficients(values.iter().map(|v| calc.from_f64(*v, 0.0)).collect())
    }

    #[test]
    fn addition_is_coefficient_wise() {
        let calc = DoubleArithmetic;
        let a = series_from(&[1.0, 2.0, 3.0], &calc);
        let b = series_from(&[0.5, -2.0, 1.0], &calc);
        let sum = a.add(&b, &calc);
        assert_eq!(sum.coeff(0).re, 1.5);
        assert_eq!(sum.coeff(1).re, 0.0);
        assert_eq!(sum.coeff(2).re, 4.0);
    }

    #[test]
    fn multiplication_is_truncated_convolution() {
        let calc = DoubleArithmetic;
        // (1 + x)^2 = 1 + 2x + x^2, truncated to three terms
        let a = series_from(&[1.0, 1.0, 0.0], &calc);
        let sq = a.multiply(&a, &calc);
        assert_eq!(sq.coeff(0).re, 1.0);
        assert_eq!(sq.coeff(1).re, 2.0);
        assert_eq!(sq.coeff(2).re, 1.0);
        assert_eq!(sq.len(), 3);
    }

    #[test]
    fn evaluation_uses_horner() {
        let calc = DoubleArithmetic;
        // p(x) = 2 - x + 3x^2 at x = 0.5 -> 2.25
        let p = series_from(&[2.0, -1.0, 3.0], &calc);
        let at = calc.from_f64(0.5, 0.0);
        assert_relative_eq!(p.evaluate(&at, &calc).re, 2.25, max_relative = 1e-15);
    }

    #[test]
    fn geometric_series_approximates_its_limit() {
        // sum of (1/2)^k approaches 2; check against the closed form.
        let calc = PreciseArithmetic::new(96);
        let one = calc.one();
        let mut s = PowerSeries::new(40, &calc);
        for k in 0..40 {
            s.set_coeff(k, one.clone());
        }
        let half = calc.from_f64(0.5, 0.0);
        let value = calc.to_c64(&s.evaluate(&half, &calc));
        assert_relative_eq!(value.re, 2.0, max_relative = 1e-11);
    }

    #[test]
    fn precise_and_double_convolutions_agree() {
        let double = DoubleArithmetic;
        let precise = PreciseArithmetic::new(128);
        let coeffs = [0.3, -1.7, 2.2, 0.05];
        let d = series_from(&coeffs, &double);
        let p = PowerSeries::from_coefficients(
            coeffs.iter().map(|v| precise.from_f64(*v, 0.0)).collect(),
        );
        let dd = d.multiply(&d, &double);
        let pp = p.multiply(&p, &precise);
        for k in 0..coeffs.len() {
            let a: Complex64 = *dd.coeff(k);
            let b = precise.to_c64(pp.coeff(k));
            assert_relative_eq!(a.re, b.re, max_relative = 1e-12);
        }
    }
}
