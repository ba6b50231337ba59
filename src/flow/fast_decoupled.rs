//! Fast-decoupled Newton approximation after Stott and Alsac. The angle
//! and magnitude corrections decouple into two constant real coefficient
//! matrices built from the imaginary part of the admittance matrix, so the
//! direct backend factorizes each of them exactly once for the whole run.

use super::{
    NodeVoltageCalculator, Partition, PowerFlowError, PowerFlowOutcome, Settings,
    build_outcome, computed_injection, relative_power_error, trivial_outcome,
};
use crate::arith::DoubleArithmetic;
use crate::model::{AdmittanceModel, BusConstraint};
use crate::solver::{Factors, SolverStrategy, SquareMatrix};
use num_complex::Complex64;

pub struct FastDecoupled {
    settings: Settings,
}

impl FastDecoupled {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    fn half_step(
        &self,
        matrix: &SquareMatrix<Complex64>,
        factors: &Option<Factors<DoubleArithmetic>>,
        rhs: &[Complex64],
        inner_converged: &mut bool,
    ) -> Result<Vec<Complex64>, PowerFlowError> {
        let calc = DoubleArithmetic;
        match factors {
            Some(factors) => Ok(factors.solve(&calc, rhs)),
            None => {
                let solution = self.settings.solver.solve(&calc, matrix, rhs)?;
                *inner_converged &= solution.converged;
                Ok(solution.x)
            }
        }
    }
}

impl NodeVoltageCalculator for FastDecoupled {
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
        let y = model.admittance();

        let b_prime = SquareMatrix::from_fn(angle_rows.len(), |r, c| {
            Complex64::new(-y[(angle_rows[r], angle_rows[c])].im, 0.0)
        });
        let b_double_prime = SquareMatrix::from_fn(magnitude_rows.len(), |r, c| {
            Complex64::new(-y[(magnitude_rows[r], magnitude_rows[c])].im, 0.0)
        });

        let (angle_factors, magnitude_factors) = match self.settings.solver {
            SolverStrategy::Direct => (
                Some(Factors::factorize(&calc, &b_prime)?),
                if magnitude_rows.is_empty() {
                    None
                } else {
                    Some(Factors::factorize(&calc, &b_double_prime)?)
                },
            ),
            SolverStrategy::BiCgStab { .. } => (None, None),
        };

        let mut voltages = model.initial_voltages();
        let mut inner_converged = true;
        let mut converged = relative_power_error(model, &voltages)
            < self.settings.target_precision;

        let mut iteration = 0;
        while !converged && iteration < self.settings.max_iterations {
            iteration += 1;

            // P half-step corrects the angles.
            let injection = computed_injection(model, &voltages);
            let rhs: Vec<Complex64> = angle_rows
                .iter()
                .map(|&i| {
                    let delta = specified_real(model, i) - injection[i].re;
                    Complex64::new(delta / voltages[i].norm(), 0.0)
                })
                .collect();
            let correction =
                self.half_step(&b_prime, &angle_factors, &rhs, &mut inner_converged)?;
            for (slot, &i) in angle_rows.iter().enumerate() {
                let angle = voltages[i].arg() + correction[slot].re;
                voltages[i] = Complex64::from_polar(voltages[i].norm(), angle);
            }

            // Q half-step corrects the magnitudes at load rows.
            if !magnitude_rows.is_empty() {
                let injection = computed_injection(model, &voltages);
                let rhs: Vec<Complex64> = magnitude_rows
                    .iter()
                    .map(|&i| {
                        let delta = specified_reactive(model, i) - injection[i].im;
                        Complex64::new(delta / voltages[i].norm(), 0.0)
                    })
                    .collect();
                let correction = self.half_step(
                    &b_double_prime,
                    &magnitude_factors,
                    &rhs,
                    &mut inner_converged,
                )?;
                for (slot, &i) in magnitude_rows.iter().enumerate() {
                    let magnitude = voltages[i].norm() + correction[slot].re;
                    voltages[i] = Complex64::from_polar(magnitude, voltages[i].arg());
                }
            }

            let error = relative_power_error(model, &voltages);
            tracing::debug!(iteration, error, "fast-decoupled sweep");
            converged = error < self.settings.target_precision;
        }

        Ok(build_outcome(model, &voltages, converged, inner_converged))
    }
}

fn specified_real(model: &AdmittanceModel, row: usize) -> f64 {
    match model.constraint(row) {
        BusConstraint::Load { power } => power.re,
        BusConstraint::Generator { active_power, .. } => active_power,
        BusConstraint::Slack { .. } => 0.0,
    }
}

fn specified_reactive(model: &AdmittanceModel, row: usize) -> f64 {
    match model.constraint(row) {
        BusConstraint::Load { power } => power.im,
        _ => 0.0,
    }
}
