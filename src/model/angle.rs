use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::{Add, Sub};

const TAU: f64 = 2.0 * PI;

/// Electrical angle in radians, kept normalized to `(-pi, pi]`.
///
/// Two instances representing the same physical angle plus or minus full
/// turns compare equal under [`Angle::approx_eq`] at arbitrarily small
/// tolerance; the wraparound is resolved before the tolerance check.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Angle {
    radians: f64,
}

impl Angle {
    pub fn from_radians(radians: f64) -> Self {
        Self {
            radians: normalize(radians),
        }
    }

    pub fn from_degrees(degrees: f64) -> Self {
        Self::from_radians(degrees.to_radians())
    }

    pub fn radians(&self) -> f64 {
        self.radians
    }

    pub fn degrees(&self) -> f64 {
        self.radians.to_degrees()
    }

    pub fn approx_eq(&self, other: &Angle, tolerance: f64) -> bool {
        let mut diff = (self.radians - other.radians).abs().rem_euclid(TAU);
        if diff > PI {
            diff = TAU - diff;
        }
        diff <= tolerance
    }
}

impl Add for Angle {
    type Output = Angle;

    fn add(self, rhs: Angle) -> Angle {
        Angle::from_radians(self.radians + rhs.radians)
    }
}

impl Sub for Angle {
    type Output = Angle;

    fn sub(self, rhs: Angle) -> Angle {
        Angle::from_radians(self.radians - rhs.radians)
    }
}

fn normalize(radians: f64) -> f64 {
    if !radians.is_finite() {
        return radians;
    }
    let wrapped = radians.rem_euclid(TAU);
    if wrapped > PI { wrapped - TAU } else { wrapped }
}
