//! Full Newton-Raphson in polar voltage coordinates. The mismatch vector
//! stacks the real-power residuals of all non-slack rows over the
//! reactive-power residuals of the load rows; the Jacobian is the exact
//! derivative of the complex injection with respect to angle and
//! magnitude, evaluated dense at every iterate.

use super::{
    NodeVoltageCalculator, Partition, PowerFlowError, PowerFlowOutcome, Settings,
    build_outcome, relative_power_error, trivial_outcome,
};
use crate::arith::DoubleArithmetic;
use crate::model::{AdmittanceModel, BusConstraint};
use crate::solver::SquareMatrix;
use num_complex::Complex64;

pub struct NewtonRaphson {
    settings: Settings,
}

impl NewtonRaphson {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

struct Derivatives {
    injection: Vec<Complex64>,
    d_angle: Vec<Vec<Complex64>>,
    d_magnitude: Vec<Vec<Complex64>>,
}

/// `dS/d(angle)` and `dS/d(magnitude)` of `S = diag(V) conj(Y V)`.
fn derivatives(model: &AdmittanceModel, voltages: &[Complex64]) -> Derivatives {
    let y = model.admittance();
    let n = model.n();
    let current: Vec<Complex64> = (0..n)
        .map(|i| (0..n).map(|j| y[(i, j)] * voltages[j]).sum())
        .collect();
    let unit: Vec<Complex64> = voltages
        .iter()
        .map(|v| {
            let norm = v.norm();
            if norm > 0.0 { v / norm } else { Complex64::new(1.0, 0.0) }
        })
        .collect();

    let mut d_angle = vec![vec![Complex64::new(0.0, 0.0); n]; n];
    let mut d_magnitude = vec![vec![Complex64::new(0.0, 0.0); n]; n];
    for i in 0..n {
        for j in 0..n {
            let delta = if i == j { current[i] } else { Complex64::new(0.0, 0.0) };
            d_angle[i][j] = Complex64::i() * voltages[i] * (delta - y[(i, j)] * voltages[j]).conj();
            d_magnitude[i][j] = voltages[i] * (y[(i, j)] * unit[j]).conj();
            if i == j {
                d_magnitude[i][j] += current[i].conj() * unit[i];
            }
        }
    }
    let injection = (0..n).map(|i| voltages[i] * current[i].conj()).collect();
    Derivatives {
        injection,
        d_angle,
        d_magnitude,
    }
}

impl NodeVoltageCalculator for NewtonRaphson {
    fn calculate(
        &mut self,
        model: &AdmittanceModel,
    ) -> Result<PowerFlowOutcome, PowerFlowError> {
        let partition = Partition::of(model);
        if let Some(outcome) = trivial_outcome(model, &partition) {
            return Ok(outcome);
        }
        let calc = DoubleArithmetic;
        let angle_rows = partition.unknown();
        let magnitude_rows = &partition.pq;
        let dim = angle_rows.len() + magnitude_rows.len();

        let mut voltages = model.initial_voltages();
        let mut inner_converged = true;
        let mut converged = relative_power_error(model, &voltages)
            < self.settings.target_precision;

        let mut iteration = 0;
        while !converged && iteration < self.settings.max_iterations {
            iteration += 1;
            let d = derivatives(model, &voltages);

            let residual: Vec<Complex64> = angle_rows
                .iter()
                .map(|&i| Complex64::new(mismatch(model, &d.injection, i).re, 0.0))
                .chain(
                    magnitude_rows
                        .iter()
                        .map(|&i| Complex64::new(mismatch(model, &d.injection, i).im, 0.0)),
                )
                .collect();

            let jacobian = SquareMatrix::from_fn(dim, |r, c| {
                let na = angle_rows.len();
                let value = match (r < na, c < na) {
                    (true, true) => d.d_angle[angle_rows[r]][angle_rows[c]].re,
                    (true, false) => d.d_magnitude[angle_rows[r]][magnitude_rows[c - na]].re,
                    (false, true) => d.d_angle[magnitude_rows[r - na]][angle_rows[c]].im,
                    (false, false) => {
                        d.d_magnitude[magnitude_rows[r - na]][magnitude_rows[c - na]].im
                    }
                };
                Complex64::new(value, 0.0)
            });

            let solution = self.settings.solver.solve(&calc, &jacobian, &residual)?;
            inner_converged &= solution.converged;

            let na = angle_rows.len();
            for (slot, &i) in angle_rows.iter().enumerate() {
                let angle = voltages[i].arg() - solution.x[slot].re;
                voltages[i] = Complex64::from_polar(voltages[i].norm(), angle);
            }
            for (slot, &i) in magnitude_rows.iter().enumerate() {
                let magnitude = voltages[i].norm() - solution.x[na + slot].re;
                voltages[i] = Complex64::from_polar(magnitude, voltages[i].arg());
            }

            let error = relative_power_error(model, &voltages);
            tracing::debug!(iteration, error, "newton step");
            converged = error < self.settings.target_precision;
        }

        Ok(build_outcome(model, &voltages, converged, inner_converged))
    }
}

/// Computed minus specified injection; only the real part is meaningful at
/// generator rows.
fn mismatch(model: &AdmittanceModel, injection: &[Complex64], row: usize) -> Complex64 {
    match model.constraint(row) {
        BusConstraint::Load { power } => injection[row] - power,
        BusConstraint::Generator { active_power, .. } => {
            Complex64::new(injection[row].re - active_power, 0.0)
        }
        BusConstraint::Slack { .. } => Complex64::new(0.0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::tests::{assert_outcome_converged, two_node_network};
    use crate::solver::SolverStrategy;
    use approx::assert_relative_eq;

    #[test]
    fn converges_quadratically_on_the_two_node_line() {
        let model = two_node_network().admittance_model().unwrap();
        let mut calc = NewtonRaphson::new(Settings {
            target_precision: 1e-12,
            max_iterations: 20,
            solver: SolverStrategy::Direct,
        });
        let outcome = calc.calculate(&model).unwrap();
        assert_outcome_converged(&outcome, 1e-12);
        assert!(
            outcome.node_results[1].voltage.norm() < outcome.node_results[0].voltage.norm()
        );
    }

    #[test]
    fn injection_derivatives_match_finite_differences() {
        let model = two_node_network().admittance_model().unwrap();
        let voltages = vec![Complex64::new(1.05, 0.1), Complex64::new(0.97, -0.02)];
        let d = derivatives(&model, &voltages);
        let h = 1e-7;

        // perturb the angle of row 1
        let mut shifted = voltages.clone();
        shifted[1] *= Complex64::from_polar(1.0, h);
        let plus = derivatives(&model, &shifted).injection;
        for i in 0..2 {
            let numeric = (plus[i] - d.injection[i]) / h;
            assert_relative_eq!(numeric.re, d.d_angle[i][1].re, max_relative = 1e-5);
            assert_relative_eq!(numeric.im, d.d_angle[i][1].im, max_relative = 1e-5);
        }

        // perturb the magnitude of row 1
        let mut shifted = voltages.clone();
        let unit = shifted[1] / shifted[1].norm();
        shifted[1] += unit * h;
        let plus = derivatives(&model, &shifted).injection;
        for i in 0..2 {
            let numeric = (plus[i] - d.injection[i]) / h;
            assert_relative_eq!(numeric.re, d.d_magnitude[i][1].re, max_relative = 1e-5);
            assert_relative_eq!(numeric.im, d.d_magnitude[i][1].im, max_relative = 1e-5);
        }
    }
}
