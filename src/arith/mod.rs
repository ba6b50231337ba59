mod precise;
pub use precise::{BigReal, PreciseArithmetic, PreciseComplex};

use num_complex::Complex64;

/// Uniform complex arithmetic over an abstract numeric representation.
///
/// The calculator instance carries whatever context the representation
/// needs (the arbitrary-precision implementation carries its mantissa bit
/// width), so all operations go through `&self` instead of operator traits.
/// The series engine and the linear solvers are written once against this
/// trait and instantiated with either representation.
pub trait Arithmetic {
    type Value: Clone + PartialEq + std::fmt::Debug;

    /// Builds a value from real and imaginary double-precision parts.
    fn from_f64(&self, re: f64, im: f64) -> Self::Value;

    /// Narrows a value back to double-precision complex.
    fn to_c64(&self, v: &Self::Value) -> Complex64;

    fn add(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;
    fn sub(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;
    fn mul(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;
    fn div(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;

    /// Integer power by binary exponentiation; `pow_int(v, 0)` is one.
    fn pow_int(&self, v: &Self::Value, n: u32) -> Self::Value;

    fn neg(&self, v: &Self::Value) -> Self::Value;
    fn conj(&self, v: &Self::Value) -> Self::Value;

    /// Rejects values that are no longer numerically meaningful
    /// (not-a-number, infinite, or tainted by a division by zero).
    fn is_valid(&self, v: &Self::Value) -> bool;

    fn from_c64(&self, z: Complex64) -> Self::Value {
        self.from_f64(z.re, z.im)
    }

    fn zero(&self) -> Self::Value {
        self.from_f64(0.0, 0.0)
    }

    fn one(&self) -> Self::Value {
        self.from_f64(1.0, 0.0)
    }

    fn magnitude(&self, v: &Self::Value) -> f64 {
        self.to_c64(v).norm()
    }
}

/// Native double-precision complex arithmetic.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleArithmetic;

impl Arithmetic for DoubleArithmetic {
    type Value = Complex64;

    fn from_f64(&self, re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn to_c64(&self, v: &Complex64) -> Complex64 {
        *v
    }

    fn add(&self, a: &Complex64, b: &Complex64) -> Complex64 {
        a + b
    }

    fn sub(&self, a: &Complex64, b: &Complex64) -> Complex64 {
        a - b
    }

    fn mul(&self, a: &Complex64, b: &Complex64) -> Complex64 {
        a * b
    }

    fn div(&self, a: &Complex64, b: &Complex64) -> Complex64 {
        a / b
    }

    fn pow_int(&self, v: &Complex64, n: u32) -> Complex64 {
        v.powi(n as i32)
    }

    fn neg(&self, v: &Complex64) -> Complex64 {
        -v
    }

    fn conj(&self, v: &Complex64) -> Complex64 {
        v.conj()
    }

    fn is_valid(&self, v: &Complex64) -> bool {
        v.re.is_finite() && v.im.is_finite()
    }
}
