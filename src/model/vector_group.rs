use super::{TopologyError, angle::Angle};

/// Decodes a two-winding connection-symbol code into its vector-group
/// clock number (phase displacement in multiples of 30 degrees).
///
/// The catalogue enumerates the winding combinations in clock-number
/// blocks; every realizable two-winding group falls on one of the clock
/// positions 0, 1, 5, 6, 7 or 11. Codes at or below zero and above 80 do
/// not name a vector group and are rejected.
pub fn phase_shift_clock(code: i32) -> Result<u8, TopologyError> {
    if !(1..=80).contains(&code) {
        return Err(TopologyError::InvalidConnectionSymbol(code));
    }
    let clock = match code {
        // Yy0 / YNy0 / Yyn0 / YNyn0 / Dd0 / Dz0 family
        1..=12 => 0,
        // Dy5 / Dyn5 / Yd5 / YNd5 / Yz5 / YNzn5 family
        13..=24 => 5,
        // Yy6 / Dd6 / Dz6 family
        25..=36 => 6,
        // Dy11 / Dyn11 / Yd11 / YNd11 / Yz11 / YNzn11 family
        37..=48 => 11,
        // Dz1 / Yz1 / Dy1 family
        49..=60 => 1,
        // Dz7 / Yz7 / Dy7 family
        61..=72 => 7,
        // autotransformer and parallel-winding variants, zero displacement
        _ => 0,
    };
    Ok(clock)
}

/// Phase displacement of the lower winding against the upper one.
pub fn phase_shift(code: i32) -> Result<Angle, TopologyError> {
    let clock = phase_shift_clock(code)?;
    Ok(Angle::from_degrees(clock as f64 * 30.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_valid_code_maps_to_a_realizable_clock_number() {
        for code in 1..=80 {
            let clock = phase_shift_clock(code).unwrap();
            assert!(
                [0, 1, 5, 6, 7, 11].contains(&clock),
                "code {code} produced clock {clock}"
            );
        }
    }

    #[test]
    fn out_of_domain_codes_are_rejected() {
        for code in [i32::MIN, -1, 0, 81, 200, i32::MAX] {
            assert!(matches!(
                phase_shift_clock(code),
                Err(TopologyError::InvalidConnectionSymbol(c)) if c == code
            ));
        }
    }

    #[test]
    fn clock_number_scales_to_thirty_degree_steps() {
        let shift = phase_shift(13).unwrap();
        assert!(shift.approx_eq(&Angle::from_degrees(150.0), 1e-12));
        let zero = phase_shift(1).unwrap();
        assert!(zero.approx_eq(&Angle::from_degrees(0.0), 1e-12));
    }
}
