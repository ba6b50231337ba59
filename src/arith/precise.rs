use num_bigint::BigInt;
use num_complex::Complex64;
use num_traits::{Float, ToPrimitive, Zero};

use super::Arithmetic;

/// Arbitrary-precision binary floating-point real number.
///
/// Value = `mantissa * 2^exponent` with the mantissa kept at the calculator's
/// configured bit width. Operations that cannot produce a meaningful number
/// (division by zero, construction from a non-finite double) set a sticky
/// `invalid` flag instead of propagating a silent artifact.
#[derive(Clone, Debug, PartialEq)]
pub struct BigReal {
    mantissa: BigInt,
    exponent: i64,
    invalid: bool,
}

impl BigReal {
    pub fn zero() -> Self {
        Self {
            mantissa: BigInt::zero(),
            exponent: 0,
            invalid: false,
        }
    }

    fn invalid() -> Self {
        Self {
            mantissa: BigInt::zero(),
            exponent: 0,
            invalid: true,
        }
    }

    pub fn from_f64(v: f64, bits: u64) -> Self {
        if !v.is_finite() {
            return Self::invalid();
        }
        if v == 0.0 {
            return Self::zero();
        }
        let (mant, exp, sign) = Float::integer_decode(v);
        let mut mantissa = BigInt::from(mant);
        if sign < 0 {
            mantissa = -mantissa;
        }
        Self {
            mantissa,
            exponent: exp as i64,
            invalid: false,
        }
        .normalized(bits)
    }

    pub fn is_zero(&self) -> bool {
        !self.invalid && self.mantissa.is_zero()
    }

    pub fn is_valid(&self) -> bool {
        !self.invalid
    }

    /// Truncates the mantissa to `bits` and strips trailing zero bits so
    /// equal values share one representation.
    fn normalized(mut self, bits: u64) -> Self {
        if self.invalid {
            return self;
        }
        if self.mantissa.is_zero() {
            self.exponent = 0;
            return self;
        }
        let width = self.mantissa.bits();
        if width > bits {
            let excess = width - bits;
            self.mantissa >>= excess as usize;
            self.exponent += excess as i64;
            if self.mantissa.is_zero() {
                self.exponent = 0;
                return self;
            }
        }
        if let Some(tz) = self.mantissa.trailing_zeros() {
            if tz > 0 {
                self.mantissa >>= tz as usize;
                self.exponent += tz as i64;
            }
        }
        self
    }

    pub fn add(&self, other: &Self, bits: u64) -> Self {
        if self.invalid || other.invalid {
            return Self::invalid();
        }
        let (mantissa, exponent) = if self.exponent >= other.exponent {
            let shift = (self.exponent - other.exponent) as usize;
            ((&self.mantissa << shift) + &other.mantissa, other.exponent)
        } else {
            let shift = (other.exponent - self.exponent) as usize;
            ((&other.mantissa << shift) + &self.mantissa, self.exponent)
        };
        Self {
            mantissa,
            exponent,
            invalid: false,
        }
        .normalized(bits)
    }

    pub fn sub(&self, other: &Self, bits: u64) -> Self {
        self.add(&other.neg(), bits)
    }

    pub fn neg(&self) -> Self {
        Self {
            mantissa: -&self.mantissa,
            exponent: self.exponent,
            invalid: self.invalid,
        }
    }

    pub fn mul(&self, other: &Self, bits: u64) -> Self {
        if self.invalid || other.invalid {
            return Self::invalid();
        }
        Self {
            mantissa: &self.mantissa * &other.mantissa,
            exponent: self.exponent + other.exponent,
            invalid: false,
        }
        .normalized(bits)
    }

    pub fn div(&self, other: &Self, bits: u64) -> Self {
        if self.invalid || other.invalid || other.mantissa.is_zero() {
            return Self::invalid();
        }
        if self.mantissa.is_zero() {
            return Self::zero();
        }
        // Pre-shift the numerator so the quotient keeps the full width.
        let shift = (bits + 32) as usize;
        let mantissa = (&self.mantissa << shift) / &other.mantissa;
        Self {
            mantissa,
            exponent: self.exponent - other.exponent - shift as i64,
            invalid: false,
        }
        .normalized(bits)
    }

    pub fn to_f64(&self) -> f64 {
        if self.invalid {
            return f64::NAN;
        }
        if self.mantissa.is_zero() {
            return 0.0;
        }
        let width = self.mantissa.bits();
        let shift = width.saturating_sub(53);
        let top = (&self.mantissa >> shift as usize).to_i64().unwrap_or(0);
        (top as f64) * ((self.exponent + shift as i64) as f64).exp2()
    }
}

/// Complex value over [`BigReal`] parts.
#[derive(Clone, Debug, PartialEq)]
pub struct PreciseComplex {
    pub re: BigReal,
    pub im: BigReal,
}

/// Arbitrary-precision complex calculator with a selectable mantissa bit
/// width. Used by the holomorphic embedding method to keep cancellation
/// error out of high-order series terms.
#[derive(Debug, Clone, Copy)]
pub struct PreciseArithmetic {
    bits: u64,
}

impl PreciseArithmetic {
    /// Mantissa widths below the double-precision 53 bits would lose
    /// information on construction, so 64 is the floor.
    pub fn new(bits: u64) -> Self {
        Self { bits: bits.max(64) }
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }
}

impl Arithmetic for PreciseArithmetic {
    type Value = PreciseComplex;

    fn from_f64(&self, re: f64, im: f64) -> PreciseComplex {
        PreciseComplex {
            re: BigReal::from_f64(re, self.bits),
            im: BigReal::from_f64(im, self.bits),
        }
    }

    fn to_c64(&self, v: &PreciseComplex) -> Complex64 {
        Complex64::new(v.re.to_f64(), v.im.to_f64())
    }

    fn add(&self, a: &PreciseComplex, b: &PreciseComplex) -> PreciseComplex {
        PreciseComplex {
            re: a.re.add(&b.re, self.bits),
            im: a.im.add(&b.im, self.bits),
        }
    }

    fn sub(&self, a: &PreciseComplex, b: &PreciseComplex) -> PreciseComplex {
        PreciseComplex {
            re: a.re.sub(&b.re, self.bits),
            im: a.im.sub(&b.im, self.bits),
        }
    }

    fn mul(&self, a: &PreciseComplex, b: &PreciseComplex) -> PreciseComplex {
        let bits = self.bits;
        PreciseComplex {
            re: a.re.mul(&b.re, bits).sub(&a.im.mul(&b.im, bits), bits),
            im: a.re.mul(&b.im, bits).add(&a.im.mul(&b.re, bits), bits),
        }
    }

    fn div(&self, a: &PreciseComplex, b: &PreciseComplex) -> PreciseComplex {
        let bits = self.bits;
        let den = b.re.mul(&b.re, bits).add(&b.im.mul(&b.im, bits), bits);
        let re = a.re.mul(&b.re, bits).add(&a.im.mul(&b.im, bits), bits);
        let im = a.im.mul(&b.re, bits).sub(&a.re.mul(&b.im, bits), bits);
        PreciseComplex {
            re: re.div(&den, bits),
            im: im.div(&den, bits),
        }
    }

    fn pow_int(&self, v: &PreciseComplex, n: u32) -> PreciseComplex {
        let mut result = self.one();
        let mut base = v.clone();
        let mut n = n;
        while n > 0 {
            if n & 1 == 1 {
                result = self.mul(&result, &base);
            }
            n >>= 1;
            if n > 0 {
                base = self.mul(&base, &base);
            }
        }
        result
    }

    fn neg(&self, v: &PreciseComplex) -> PreciseComplex {
        PreciseComplex {
            re: v.re.neg(),
            im: v.im.neg(),
        }
    }

    fn conj(&self, v: &PreciseComplex) -> PreciseComplex {
        PreciseComplex {
            re: v.re.clone(),
            im: v.im.neg(),
        }
    }

    fn is_valid(&self, v: &PreciseComplex) -> bool {
        v.re.is_valid() && v.im.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const BITS: u64 = 128;

    #[test]
    fn f64_round_trip_is_exact() {
        for v in [0.0, 1.0, -1.0, 0.1, 1234.5678, -9.87e-12, 3.1e15] {
            assert_eq!(BigReal::from_f64(v, BITS).to_f64(), v);
        }
    }

    #[test]
    fn non_finite_input_is_invalid() {
        assert!(!BigReal::from_f64(f64::NAN, BITS).is_valid());
        assert!(!BigReal::from_f64(f64::INFINITY, BITS).is_valid());
        assert!(BigReal::from_f64(0.0, BITS).is_valid());
    }

    #[test]
    fn add_aligns_exponents() {
        let a = BigReal::from_f64(1.5, BITS);
        let b = BigReal::from_f64(2f64.powi(-40), BITS);
        let sum = a.add(&b, BITS);
        assert_relative_eq!(sum.to_f64(), 1.5 + 2f64.powi(-40), max_relative = 1e-15);
        let diff = sum.sub(&a, BITS);
        assert_relative_eq!(diff.to_f64(), 2f64.powi(-40), max_relative = 1e-15);
    }

    #[test]
    fn division_matches_double() {
        let a = BigReal::from_f64(7.25, BITS);
        let b = BigReal::from_f64(-0.3, BITS);
        assert_relative_eq!(a.div(&b, BITS).to_f64(), 7.25 / -0.3, max_relative = 1e-14);
    }

    #[test]
    fn division_by_zero_is_invalid() {
        let a = BigReal::from_f64(1.0, BITS);
        let q = a.div(&BigReal::zero(), BITS);
        assert!(!q.is_valid());
        assert!(q.to_f64().is_nan());
    }

    #[test]
    fn mantissa_is_truncated_to_width() {
        let bits = 64;
        let a = BigReal::from_f64(1.0 + 2f64.powi(-50), bits);
        let mut product = a.clone();
        for _ in 0..10 {
            product = product.mul(&a, bits);
        }
        // still a sane finite value after repeated widening multiplies
        assert!(product.is_valid());
        assert_relative_eq!(
            product.to_f64(),
            (1.0 + 2f64.powi(-50)).powi(11),
            max_relative = 1e-12
        );
    }

    #[test]
    fn precise_pow_int() {
        let calc = PreciseArithmetic::new(96);
        let v = calc.from_f64(1.0, 1.0);
        // (1+i)^4 = -4
        let p = calc.to_c64(&calc.pow_int(&v, 4));
        assert_relative_eq!(p.re, -4.0, max_relative = 1e-14);
        assert_relative_eq!(p.im, 0.0, epsilon = 1e-14);
    }
}
