//! Fixed-point current iteration. Each sweep converts the specified powers
//! at the previous voltage iterate into equivalent current injections and
//! solves one linear nodal system for the unknown voltages. Linear
//! convergence, but each sweep reuses the same coefficient matrix, so the
//! direct backend factorizes exactly once.

use super::{
    NodeVoltageCalculator, Partition, PowerFlowError, PowerFlowOutcome, Settings,
    build_outcome, relative_power_error, trivial_outcome,
};
use crate::arith::DoubleArithmetic;
use crate::model::{AdmittanceModel, BusConstraint};
use crate::solver::{Factors, SolverStrategy, SquareMatrix};
use num_complex::Complex64;

pub struct CurrentIteration {
    settings: Settings,
}

impl CurrentIteration {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl NodeVoltageCalculator for CurrentIteration {
    fn calculate(
        &mut self,
        model: &AdmittanceModel,
    ) -> Result<PowerFlowOutcome, PowerFlowError> {
        let partition = Partition::of(model);
        if let Some(outcome) = trivial_outcome(model, &partition) {
            return Ok(outcome);
        }
        let calc = DoubleArithmetic;
        let unknown = partition.unknown();
        let y = model.admittance();

        let y_uu = SquareMatrix::from_fn(unknown.len(), |r, c| y[(unknown[r], unknown[c])]);
        // Slack voltages are fixed, their coupling moves to the right-hand
        // side once.
        let slack_injection: Vec<Complex64> = unknown
            .iter()
            .map(|&i| {
                let mut acc = Complex64::new(0.0, 0.0);
                for &s in &partition.slack {
                    acc -= y[(i, s)] * slack_voltage(model, s);
                }
                acc
            })
            .collect();

        let direct_factors = match self.settings.solver {
            SolverStrategy::Direct => Some(Factors::factorize(&calc, &y_uu)?),
            SolverStrategy::BiCgStab { .. } => None,
        };

        let mut voltages = model.initial_voltages();
        let mut inner_converged = true;
        let mut converged = false;

        for iteration in 0..self.settings.max_iterations {
            let rhs: Vec<Complex64> = unknown
                .iter()
                .zip(&slack_injection)
                .map(|(&i, &base)| base + injected_current(model, &voltages, i))
                .collect();

            let solution = match &direct_factors {
                Some(factors) => factors.solve(&calc, &rhs),
                None => {
                    let sol = self.settings.solver.solve(&calc, &y_uu, &rhs)?;
                    inner_converged &= sol.converged;
                    sol.x
                }
            };
            for (slot, &i) in unknown.iter().enumerate() {
                voltages[i] = solution[slot];
            }
            // Generator rows hold their magnitude setpoint, the solve only
            // updates their angle.
            for &i in &partition.pv {
                if let BusConstraint::Generator {
                    voltage_magnitude, ..
                } = model.constraint(i)
                {
                    let norm = voltages[i].norm();
                    if norm > 0.0 {
                        voltages[i] *= voltage_magnitude / norm;
                    }
                }
            }

            let error = relative_power_error(model, &voltages);
            tracing::debug!(iteration, error, "current iteration sweep");
            if error < self.settings.target_precision {
                converged = true;
                break;
            }
        }

        Ok(build_outcome(model, &voltages, converged, inner_converged))
    }
}

fn slack_voltage(model: &AdmittanceModel, row: usize) -> Complex64 {
    match model.constraint(row) {
        BusConstraint::Slack { voltage } => voltage,
        _ => Complex64::new(0.0, 0.0),
    }
}

/// `I_i = conj(S_i / V_i)` at the previous iterate. Generator rows take
/// their reactive power from the present network state.
fn injected_current(
    model: &AdmittanceModel,
    voltages: &[Complex64],
    row: usize,
) -> Complex64 {
    let power = match model.constraint(row) {
        BusConstraint::Load { power } => power,
        BusConstraint::Generator { active_power, .. } => {
            let y = model.admittance();
            let mut current = Complex64::new(0.0, 0.0);
            for j in 0..model.n() {
                current += y[(row, j)] * voltages[j];
            }
            let reactive = (voltages[row] * current.conj()).im;
            Complex64::new(active_power, reactive)
        }
        BusConstraint::Slack { .. } => return Complex64::new(0.0, 0.0),
    };
    let v = voltages[row];
    if v.norm() == 0.0 {
        Complex64::new(0.0, 0.0)
    } else {
        (power / v).conj()
    }
}
