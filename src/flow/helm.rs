//! Holomorphic embedding. The nodal equations are embedded into a family
//! parametrized by a complex scalar so that every node voltage becomes a
//! power series in that parameter, with the no-load solution as the germ
//! at zero. Series coefficients follow from one linear solve per order
//! against a constant coefficient matrix, and the physical solution is the
//! series evaluated at one.
//!
//! Coefficients accumulate round-off across orders, so the whole
//! construction runs in arbitrary-precision arithmetic and only the final
//! evaluation narrows back to double.

use super::{
    NodeVoltageCalculator, Partition, PowerFlowError, PowerFlowOutcome, Settings,
    build_outcome, relative_power_error, trivial_outcome,
};
use crate::arith::{Arithmetic, PreciseArithmetic};
use crate::model::{AdmittanceModel, BusConstraint};
use crate::series::PowerSeries;
use crate::solver::{Factors, SolverStrategy, SquareMatrix};
use num_complex::Complex64;

pub struct HolomorphicEmbedding {
    settings: Settings,
    precision_bits: u64,
}

impl HolomorphicEmbedding {
    /// `max_iterations` acts as the series order budget here.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            precision_bits: 64,
        }
    }

    pub fn with_precision_bits(mut self, bits: u64) -> Self {
        self.precision_bits = bits;
        self
    }
}

impl NodeVoltageCalculator for HolomorphicEmbedding {
    fn calculate(
        &mut self,
        model: &AdmittanceModel,
    ) -> Result<PowerFlowOutcome, PowerFlowError> {
        let calc = PreciseArithmetic::new(self.precision_bits);
        run(&calc, model, &self.settings)
    }
}

fn re_of<A: Arithmetic>(calc: &A, v: &A::Value) -> A::Value {
    let half = calc.from_f64(0.5, 0.0);
    calc.mul(&calc.add(v, &calc.conj(v)), &half)
}

fn im_of<A: Arithmetic>(calc: &A, v: &A::Value) -> A::Value {
    let scale = calc.from_f64(0.0, -0.5);
    calc.mul(&calc.sub(v, &calc.conj(v)), &scale)
}

/// Unknown-row context shared by the per-order solves.
struct Embedding<'m, A: Arithmetic> {
    model: &'m AdmittanceModel,
    rows: Vec<usize>,
    pv_slots: Vec<usize>,
    y_uu: SquareMatrix<A::Value>,
    /// Fixed slack coupling moved to the right-hand side of the germ.
    slack_injection: Vec<A::Value>,
    /// Reciprocal series, one per unknown row: `W * conj(V) = 1`.
    v: Vec<PowerSeries<A>>,
    w: Vec<PowerSeries<A>>,
    /// Reactive-power series coefficients of the generator rows.
    q: Vec<Vec<A::Value>>,
}

impl<'m, A: Arithmetic> Embedding<'m, A> {
    fn build(calc: &A, model: &'m AdmittanceModel, partition: &Partition, len: usize) -> Self {
        let rows = partition.unknown();
        let pv_slots = partition
            .pv
            .iter()
            .map(|row| rows.iter().position(|r| r == row).unwrap_or(0))
            .collect();
        let y = model.admittance();
        let y_uu = SquareMatrix::from_fn(rows.len(), |r, c| {
            calc.from_c64(y[(rows[r], rows[c])])
        });
        let slack_injection = rows
            .iter()
            .map(|&i| {
                let mut acc = calc.zero();
                for &s in &partition.slack {
                    if let BusConstraint::Slack { voltage } = model.constraint(s) {
                        acc = calc.sub(&acc, &calc.mul(&calc.from_c64(y[(i, s)]), &calc.from_c64(voltage)));
                    }
                }
                acc
            })
            .collect();
        let v = (0..rows.len()).map(|_| PowerSeries::new(len, calc)).collect();
        let w = (0..rows.len()).map(|_| PowerSeries::new(len, calc)).collect();
        let q = vec![Vec::new(); partition.pv.len()];
        Self {
            model,
            rows,
            pv_slots,
            y_uu,
            slack_injection,
            v,
            w,
            q,
        }
    }

    /// `W[k] = -(sum of W[m] * conj(V[k-m]) for m < k) / conj(V[0])`.
    fn extend_reciprocal(&mut self, calc: &A, k: usize) {
        if k == 0 {
            for slot in 0..self.rows.len() {
                let w0 = calc.div(&calc.one(), &calc.conj(self.v[slot].coeff(0)));
                self.w[slot].set_coeff(0, w0);
            }
            return;
        }
        for slot in 0..self.rows.len() {
            let mut acc = calc.zero();
            for m in 0..k {
                acc = calc.add(
                    &acc,
                    &calc.mul(self.w[slot].coeff(m), &calc.conj(self.v[slot].coeff(k - m))),
                );
            }
            let w_k = calc.div(&calc.neg(&acc), &calc.conj(self.v[slot].coeff(0)));
            self.w[slot].set_coeff(k, w_k);
        }
    }

    /// Known part of the order-`n` right-hand side of one unknown row. The
    /// generator rows leave their newest reactive coefficient on the
    /// left-hand side.
    fn balance_rhs(&self, calc: &A, slot: usize, n: usize) -> A::Value {
        match self.model.constraint(self.rows[slot]) {
            BusConstraint::Load { power } => {
                let s_conj = calc.conj(&calc.from_c64(power));
                calc.mul(&s_conj, self.w[slot].coeff(n - 1))
            }
            BusConstraint::Generator { active_power, .. } => {
                let p = calc.from_f64(active_power, 0.0);
                let mut rhs = calc.mul(&p, self.w[slot].coeff(n - 1));
                let pv = self
                    .pv_slots
                    .iter()
                    .position(|&s| s == slot)
                    .unwrap_or(0);
                let minus_j = calc.from_f64(0.0, -1.0);
                for m in 0..n.saturating_sub(1) {
                    let term = calc.mul(&self.q[pv][m], self.w[slot].coeff(n - 1 - m));
                    rhs = calc.add(&rhs, &calc.mul(&minus_j, &term));
                }
                rhs
            }
            BusConstraint::Slack { .. } => calc.zero(),
        }
    }

    /// Order-`n` coefficient of the embedded squared-magnitude constraint
    /// at one generator row.
    fn magnitude_rhs(&self, calc: &A, pv: usize, n: usize) -> A::Value {
        let slot = self.pv_slots[pv];
        let setpoint = match self.model.constraint(self.rows[slot]) {
            BusConstraint::Generator {
                voltage_magnitude, ..
            } => voltage_magnitude,
            _ => 1.0,
        };
        let mut rhs = if n == 1 {
            let v0 = self.v[slot].coeff(0);
            let v0_sq = calc.mul(v0, &calc.conj(v0));
            calc.sub(&calc.from_f64(setpoint * setpoint, 0.0), &v0_sq)
        } else {
            calc.zero()
        };
        for m in 1..n {
            let term = calc.mul(self.v[slot].coeff(m), &calc.conj(self.v[slot].coeff(n - m)));
            rhs = calc.sub(&rhs, &term);
        }
        re_of(calc, &rhs)
    }

    /// Real block matrix for networks with generator rows: the complex
    /// balance equations split into real and imaginary rows, one extra row
    /// and column per generator for the magnitude constraint and the
    /// reactive unknown.
    fn augmented_matrix(&self, calc: &A) -> SquareMatrix<A::Value> {
        let u = self.rows.len();
        let g = self.pv_slots.len();
        let mut m = SquareMatrix::filled(2 * u + g, calc.zero());
        for r in 0..u {
            for c in 0..u {
                let y = self.y_uu.get(r, c);
                let a = re_of(calc, y);
                let b = im_of(calc, y);
                m.set(2 * r, 2 * c, a.clone());
                m.set(2 * r, 2 * c + 1, calc.neg(&b));
                m.set(2 * r + 1, 2 * c, b);
                m.set(2 * r + 1, 2 * c + 1, a);
            }
        }
        for (k, &slot) in self.pv_slots.iter().enumerate() {
            let w0 = self.w[slot].coeff(0);
            m.set(2 * slot, 2 * u + k, calc.neg(&im_of(calc, w0)));
            m.set(2 * slot + 1, 2 * u + k, re_of(calc, w0));
            let v0 = self.v[slot].coeff(0);
            let two = calc.from_f64(2.0, 0.0);
            m.set(2 * u + k, 2 * slot, calc.mul(&two, &re_of(calc, v0)));
            m.set(2 * u + k, 2 * slot + 1, calc.mul(&two, &im_of(calc, v0)));
        }
        m
    }

    /// Series values at one, narrowed to double, with slack rows at their
    /// specified voltage.
    fn evaluate(&self, calc: &A) -> Vec<Complex64> {
        let one = calc.one();
        let mut voltages: Vec<Complex64> = self
            .model
            .constraints()
            .iter()
            .map(|c| match *c {
                BusConstraint::Slack { voltage } => voltage,
                _ => Complex64::new(0.0, 0.0),
            })
            .collect();
        for (slot, &row) in self.rows.iter().enumerate() {
            voltages[row] = calc.to_c64(&self.v[slot].evaluate(&one, calc));
        }
        voltages
    }
}

fn run<A: Arithmetic>(
    calc: &A,
    model: &AdmittanceModel,
    settings: &Settings,
) -> Result<PowerFlowOutcome, PowerFlowError> {
    let partition = Partition::of(model);
    if let Some(outcome) = trivial_outcome(model, &partition) {
        return Ok(outcome);
    }
    let order_budget = settings.max_iterations.max(1);
    let mut emb = Embedding::build(calc, model, &partition, order_budget + 1);
    let mut inner_converged = true;

    // Germ: the no-load voltages, a plain complex solve.
    let germ_factors = match settings.solver {
        SolverStrategy::Direct => Some(Factors::factorize(calc, &emb.y_uu)?),
        SolverStrategy::BiCgStab { .. } => None,
    };
    let germ = match &germ_factors {
        Some(factors) => factors.solve(calc, &emb.slack_injection),
        None => {
            let sol = settings.solver.solve(calc, &emb.y_uu, &emb.slack_injection)?;
            inner_converged &= sol.converged;
            sol.x
        }
    };
    for (slot, value) in germ.into_iter().enumerate() {
        emb.v[slot].set_coeff(0, value);
    }
    emb.extend_reciprocal(calc, 0);

    let has_generators = !emb.pv_slots.is_empty();
    let augmented = has_generators.then(|| emb.augmented_matrix(calc));
    let augmented_factors = match (&augmented, settings.solver) {
        (Some(matrix), SolverStrategy::Direct) => Some(Factors::factorize(calc, matrix)?),
        _ => None,
    };

    let mut converged = false;
    let mut order = 0;
    while !converged && order < order_budget {
        order += 1;
        if order > 1 {
            emb.extend_reciprocal(calc, order - 1);
        }

        let coefficients: Vec<A::Value> = if let Some(matrix) = &augmented {
            let u = emb.rows.len();
            let g = emb.pv_slots.len();
            let mut rhs = vec![calc.zero(); 2 * u + g];
            for slot in 0..u {
                let b = emb.balance_rhs(calc, slot, order);
                rhs[2 * slot] = re_of(calc, &b);
                rhs[2 * slot + 1] = im_of(calc, &b);
            }
            for k in 0..g {
                rhs[2 * u + k] = emb.magnitude_rhs(calc, k, order);
            }
            let solution = match &augmented_factors {
                Some(factors) => factors.solve(calc, &rhs),
                None => {
                    let sol = settings.solver.solve(calc, matrix, &rhs)?;
                    inner_converged &= sol.converged;
                    sol.x
                }
            };
            let j_unit = calc.from_f64(0.0, 1.0);
            for k in 0..g {
                emb.q[k].push(solution[2 * u + k].clone());
            }
            (0..u)
                .map(|slot| {
                    calc.add(
                        &solution[2 * slot],
                        &calc.mul(&j_unit, &solution[2 * slot + 1]),
                    )
                })
                .collect()
        } else {
            let rhs: Vec<A::Value> = (0..emb.rows.len())
                .map(|slot| emb.balance_rhs(calc, slot, order))
                .collect();
            match &germ_factors {
                Some(factors) => factors.solve(calc, &rhs),
                None => {
                    let sol = settings.solver.solve(calc, &emb.y_uu, &rhs)?;
                    inner_converged &= sol.converged;
                    sol.x
                }
            }
        };

        if coefficients.iter().any(|c| !calc.is_valid(c)) {
            tracing::debug!(order, "series coefficients lost validity, stopping");
            break;
        }
        for (slot, value) in coefficients.into_iter().enumerate() {
            emb.v[slot].set_coeff(order, value);
        }

        let voltages = emb.evaluate(calc);
        let error = relative_power_error(model, &voltages);
        tracing::debug!(order, error, "series order added");
        converged = error < settings.target_precision;
    }

    let voltages = emb.evaluate(calc);
    Ok(build_outcome(model, &voltages, converged, inner_converged))
}
