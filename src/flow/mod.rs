//! Node-voltage calculation engine.
//!
//! Four interchangeable calculators solve the nonlinear nodal power
//! equations over an [`AdmittanceModel`]: a fixed-point current iteration,
//! full Newton-Raphson, the fast-decoupled Newton approximation, and a
//! holomorphic-embedding series method. They share one convergence
//! criterion (relative power mismatch), one outcome shape, and the
//! pluggable linear-solver backend from [`crate::solver`].

pub mod current_iteration;
pub mod fast_decoupled;
pub mod helm;
pub mod newton;

pub use current_iteration::CurrentIteration;
pub use fast_decoupled::FastDecoupled;
pub use helm::HolomorphicEmbedding;
pub use newton::NewtonRaphson;

use crate::model::{AdmittanceModel, BusConstraint};
use crate::solver::{SolverError, SolverStrategy};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard failures. Running out of iterations is not one of them; that case
/// is reported through [`PowerFlowOutcome::converged`] together with the
/// best iterate reached.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PowerFlowError {
    #[error("linear system could not be solved: {0}")]
    Solver(#[from] SolverError),
}

/// Solved state of one node in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub node: i32,
    /// Complex node voltage in volt.
    pub voltage: Complex64,
    /// Net injected complex power in volt-ampere.
    pub power: Complex64,
}

/// Result of one calculation. `inner_solver_converged` is false when the
/// Krylov backend exhausted its inner budget at least once; the outer
/// result is then best-effort even if `converged` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerFlowOutcome {
    pub converged: bool,
    pub inner_solver_converged: bool,
    pub relative_power_error: f64,
    pub node_results: Vec<NodeResult>,
}

/// Construction parameters shared by all calculators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    /// Stopping tolerance on the relative power mismatch.
    pub target_precision: f64,
    /// Outer iteration cap, or the series order budget for the embedding
    /// method.
    pub max_iterations: usize,
    pub solver: SolverStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_precision: 1e-8,
            max_iterations: 100,
            solver: SolverStrategy::Direct,
        }
    }
}

/// Common contract of the four calculation methods.
pub trait NodeVoltageCalculator {
    fn calculate(
        &mut self,
        model: &AdmittanceModel,
    ) -> Result<PowerFlowOutcome, PowerFlowError>;
}

/// Row indices grouped by constraint kind, in ascending order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Partition {
    pub slack: Vec<usize>,
    pub pv: Vec<usize>,
    pub pq: Vec<usize>,
}

impl Partition {
    pub fn of(model: &AdmittanceModel) -> Self {
        let mut p = Partition::default();
        for (i, c) in model.constraints().iter().enumerate() {
            match c {
                BusConstraint::Slack { .. } => p.slack.push(i),
                BusConstraint::Generator { .. } => p.pv.push(i),
                BusConstraint::Load { .. } => p.pq.push(i),
            }
        }
        p
    }

    /// Non-slack rows in ascending order, the unknowns of every method.
    pub fn unknown(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.pv.iter().chain(&self.pq).copied().collect();
        rows.sort_unstable();
        rows
    }
}

/// `S_i = V_i * conj(sum_j Y_ij V_j)` for every row.
pub(crate) fn computed_injection(
    model: &AdmittanceModel,
    voltages: &[Complex64],
) -> Vec<Complex64> {
    let y = model.admittance();
    let n = model.n();
    let mut result = Vec::with_capacity(n);
    for i in 0..n {
        let mut current = Complex64::new(0.0, 0.0);
        for j in 0..n {
            current += y[(i, j)] * voltages[j];
        }
        result.push(voltages[i] * current.conj());
    }
    result
}

/// Specified injection magnitude used to normalize the mismatch. Falls back
/// to one per-unit when every constrained bus specifies zero power.
fn mismatch_scale(model: &AdmittanceModel) -> f64 {
    let mut scale: f64 = 0.0;
    for c in model.constraints() {
        match *c {
            BusConstraint::Generator { active_power, .. } => {
                scale = scale.max(active_power.abs())
            }
            BusConstraint::Load { power } => scale = scale.max(power.norm()),
            BusConstraint::Slack { .. } => {}
        }
    }
    if scale > 0.0 { scale } else { 1.0 }
}

/// Largest power-mismatch component relative to the specified injection
/// scale: real and reactive parts at load buses, real part only at
/// generator buses.
pub(crate) fn relative_power_error(
    model: &AdmittanceModel,
    voltages: &[Complex64],
) -> f64 {
    let computed = computed_injection(model, voltages);
    let scale = mismatch_scale(model);
    let mut worst: f64 = 0.0;
    for (i, c) in model.constraints().iter().enumerate() {
        match *c {
            BusConstraint::Load { power } => {
                let delta = power - computed[i];
                worst = worst.max(delta.re.abs()).max(delta.im.abs());
            }
            BusConstraint::Generator { active_power, .. } => {
                worst = worst.max((active_power - computed[i].re).abs());
            }
            BusConstraint::Slack { .. } => {}
        }
    }
    worst / scale
}

/// Translates a per-unit voltage state into the reported outcome.
pub(crate) fn build_outcome(
    model: &AdmittanceModel,
    voltages: &[Complex64],
    converged: bool,
    inner_solver_converged: bool,
) -> PowerFlowOutcome {
    let injection = computed_injection(model, voltages);
    let node_results = (0..model.user_nodes())
        .map(|i| NodeResult {
            node: model.node_id(i),
            voltage: voltages[i] * model.voltage_base(i),
            power: injection[i] * model.power_base(),
        })
        .collect();
    PowerFlowOutcome {
        converged,
        inner_solver_converged,
        relative_power_error: relative_power_error(model, voltages),
        node_results,
    }
}

/// A network of nothing but sources has no equations to solve; every
/// calculator short-circuits through this.
pub(crate) fn trivial_outcome(
    model: &AdmittanceModel,
    partition: &Partition,
) -> Option<PowerFlowOutcome> {
    if partition.pv.is_empty() && partition.pq.is_empty() {
        let voltages = model.initial_voltages();
        Some(build_outcome(model, &voltages, true, true))
    } else {
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{FeedIn, Generator, Line, Load, Network};
    use approx::assert_relative_eq;

    /// Two nodes at 1000 V joined by a 2000-unit line, ideal feed-in at
    /// node 1 and a small load at node 2.
    pub fn two_node_network() -> Network {
        let mut net = Network::new(50.0);
        net.add_node(1, 1000.0).unwrap();
        net.add_node(2, 1000.0).unwrap();
        net.add_feed_in(FeedIn {
            node: 1,
            voltage: Complex64::new(1050.0, 100.0),
            short_circuit_power: 0.0,
            resistance_to_reactance: 0.0,
            correction_factor: 1.0,
        })
        .unwrap();
        net.add_load(Load {
            node: 2,
            power: Complex64::new(-200.0, -100.0),
        })
        .unwrap();
        net.add_line(Line {
            from: 1,
            to: 2,
            resistance: 0.0002,
            inductance: 0.0009,
            shunt_conductance: 0.0,
            shunt_capacitance: 0.0,
            length: 2000.0,
        })
        .unwrap();
        net
    }

    /// Three-node meshed network, all loads, moderate loading.
    pub fn three_node_network() -> Network {
        let mut net = Network::new(50.0);
        for id in 1..=3 {
            net.add_node(id, 10_000.0).unwrap();
        }
        net.add_feed_in(FeedIn {
            node: 1,
            voltage: Complex64::new(10_200.0, 0.0),
            short_circuit_power: 0.0,
            resistance_to_reactance: 0.0,
            correction_factor: 1.0,
        })
        .unwrap();
        net.add_load(Load {
            node: 2,
            power: Complex64::new(-150e3, -60e3),
        })
        .unwrap();
        net.add_load(Load {
            node: 3,
            power: Complex64::new(-90e3, -30e3),
        })
        .unwrap();
        for (from, to) in [(1, 2), (2, 3), (1, 3)] {
            net.add_line(Line {
                from,
                to,
                resistance: 0.5,
                inductance: 0.01,
                shunt_conductance: 0.0,
                shunt_capacitance: 0.0,
                length: 2.0,
            })
            .unwrap();
        }
        net
    }

    /// Adds a voltage-controlled machine at node 3 of the meshed network.
    pub fn generator_network() -> Network {
        let mut net = three_node_network();
        net.add_generator(Generator {
            node: 3,
            voltage_magnitude: 10_100.0,
            real_power: 120e3,
        })
        .unwrap();
        net
    }

    pub fn assert_outcome_converged(outcome: &PowerFlowOutcome, tolerance: f64) {
        assert!(outcome.converged, "solve did not converge: {outcome:?}");
        assert!(
            outcome.relative_power_error < tolerance,
            "relative power error {} above {tolerance}",
            outcome.relative_power_error
        );
    }

    fn voltages_of(outcome: &PowerFlowOutcome) -> Vec<Complex64> {
        outcome.node_results.iter().map(|r| r.voltage).collect()
    }

    #[test]
    fn partition_groups_rows_by_constraint() {
        let model = generator_network().admittance_model().unwrap();
        let p = Partition::of(&model);
        assert_eq!(p.slack, vec![0]);
        assert_eq!(p.pv, vec![2]);
        assert_eq!(p.pq, vec![1]);
        assert_eq!(p.unknown(), vec![1, 2]);
    }

    #[test]
    fn slack_only_network_is_trivially_converged() {
        let mut net = Network::new(50.0);
        net.add_node(1, 400.0).unwrap();
        net.add_feed_in(FeedIn {
            node: 1,
            voltage: Complex64::new(420.0, 0.0),
            short_circuit_power: 0.0,
            resistance_to_reactance: 0.0,
            correction_factor: 1.0,
        })
        .unwrap();
        let model = net.admittance_model().unwrap();
        let mut calc = NewtonRaphson::new(Settings::default());
        let outcome = calc.calculate(&model).unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.node_results.len(), 1);
        assert_relative_eq!(outcome.node_results[0].voltage.re, 420.0, epsilon = 1e-9);
    }

    #[test]
    fn all_methods_agree_on_the_meshed_load_network() {
        let model = three_node_network().admittance_model().unwrap();
        let settings = Settings {
            target_precision: 1e-9,
            max_iterations: 200,
            solver: SolverStrategy::Direct,
        };
        let reference = NewtonRaphson::new(settings).calculate(&model).unwrap();
        assert_outcome_converged(&reference, 1e-9);

        let mut others: Vec<Box<dyn NodeVoltageCalculator>> = vec![
            Box::new(CurrentIteration::new(settings)),
            Box::new(FastDecoupled::new(settings)),
            Box::new(HolomorphicEmbedding::new(Settings {
                max_iterations: 40,
                ..settings
            })),
        ];
        for calc in others.iter_mut() {
            let outcome = calc.calculate(&model).unwrap();
            assert_outcome_converged(&outcome, 1e-9);
            for (a, b) in voltages_of(&reference).iter().zip(voltages_of(&outcome)) {
                assert_relative_eq!(a.re, b.re, max_relative = 1e-6);
                assert_relative_eq!(a.im, b.im, max_relative = 1e-6);
            }
        }
    }

    #[test]
    fn all_methods_agree_with_a_generator_present() {
        let model = generator_network().admittance_model().unwrap();
        let settings = Settings {
            target_precision: 1e-8,
            max_iterations: 200,
            solver: SolverStrategy::Direct,
        };
        let reference = NewtonRaphson::new(settings).calculate(&model).unwrap();
        assert_outcome_converged(&reference, 1e-8);
        // generator holds its magnitude setpoint
        assert_relative_eq!(
            reference.node_results[2].voltage.norm(),
            10_100.0,
            max_relative = 1e-7
        );

        let mut others: Vec<Box<dyn NodeVoltageCalculator>> = vec![
            Box::new(CurrentIteration::new(settings)),
            Box::new(FastDecoupled::new(settings)),
            Box::new(HolomorphicEmbedding::new(Settings {
                max_iterations: 40,
                ..settings
            })),
        ];
        for calc in others.iter_mut() {
            let outcome = calc.calculate(&model).unwrap();
            assert_outcome_converged(&outcome, 1e-8);
            for (a, b) in voltages_of(&reference).iter().zip(voltages_of(&outcome)) {
                assert_relative_eq!(a.re, b.re, max_relative = 1e-5);
                assert_relative_eq!(a.im, b.im, max_relative = 1e-5);
            }
        }
    }

    #[test]
    fn krylov_backend_matches_direct_backend() {
        let model = three_node_network().admittance_model().unwrap();
        let direct = NewtonRaphson::new(Settings {
            target_precision: 1e-9,
            max_iterations: 100,
            solver: SolverStrategy::Direct,
        })
        .calculate(&model)
        .unwrap();
        let krylov = NewtonRaphson::new(Settings {
            target_precision: 1e-9,
            max_iterations: 100,
            solver: SolverStrategy::bicgstab(),
        })
        .calculate(&model)
        .unwrap();
        assert!(krylov.converged);
        assert!(krylov.inner_solver_converged);
        for (a, b) in direct.node_results.iter().zip(&krylov.node_results) {
            assert_relative_eq!(a.voltage.re, b.voltage.re, max_relative = 1e-8);
            assert_relative_eq!(a.voltage.im, b.voltage.im, max_relative = 1e-8);
        }
    }

    #[test]
    fn reported_power_balances_the_specified_load() {
        let model = three_node_network().admittance_model().unwrap();
        let outcome = NewtonRaphson::new(Settings {
            target_precision: 1e-10,
            max_iterations: 100,
            solver: SolverStrategy::Direct,
        })
        .calculate(&model)
        .unwrap();
        assert_outcome_converged(&outcome, 1e-10);
        // load rows report their specified demand in volt-ampere
        assert_relative_eq!(
            outcome.node_results[1].power.re,
            -150e3,
            max_relative = 1e-6
        );
        assert_relative_eq!(
            outcome.node_results[2].power.im,
            -30e3,
            max_relative = 1e-6
        );
        // the feed-in covers demand plus losses
        assert!(outcome.node_results[0].power.re > 240e3);
    }

    /// The nominal voltage of a node is only a per-unit base; two base
    /// choices for the same physical network must give the same physical
    /// answer.
    #[test]
    fn per_unit_base_choice_does_not_change_the_physical_solution() {
        let solve_with_base = |node2_base: f64| {
            let mut net = Network::new(50.0);
            net.add_node(1, 1000.0).unwrap();
            net.add_node(2, node2_base).unwrap();
            net.add_feed_in(FeedIn {
                node: 1,
                voltage: Complex64::new(1000.0, 0.0),
                short_circuit_power: 0.0,
                resistance_to_reactance: 0.0,
                correction_factor: 1.0,
            })
            .unwrap();
            net.add_load(Load {
                node: 2,
                power: Complex64::new(-50e3, -20e3),
            })
            .unwrap();
            net.add_line(Line {
                from: 1,
                to: 2,
                resistance: 0.5,
                inductance: 0.004,
                shunt_conductance: 0.0,
                shunt_capacitance: 0.0,
                length: 1.0,
            })
            .unwrap();
            let model = net.admittance_model().unwrap();
            NewtonRaphson::new(Settings {
                target_precision: 1e-10,
                max_iterations: 50,
                solver: SolverStrategy::Direct,
            })
            .calculate(&model)
            .unwrap()
        };
        let reference = solve_with_base(1000.0);
        let rebased = solve_with_base(800.0);
        assert!(reference.converged && rebased.converged);
        for (a, b) in reference.node_results.iter().zip(&rebased.node_results) {
            assert_relative_eq!(a.voltage.re, b.voltage.re, max_relative = 1e-9);
            assert_relative_eq!(a.voltage.im, b.voltage.im, max_relative = 1e-9);
            assert_relative_eq!(a.power.re, b.power.re, max_relative = 1e-8);
            assert_relative_eq!(a.power.im, b.power.im, max_relative = 1e-8);
        }
    }

    /// A starved inner Krylov budget must surface as a flag on the outcome,
    /// never as a panic or a hard error.
    #[test]
    fn starved_krylov_budget_surfaces_inner_non_convergence() {
        let model = three_node_network().admittance_model().unwrap();
        let outcome = NewtonRaphson::new(Settings {
            target_precision: 1e-9,
            max_iterations: 5,
            solver: SolverStrategy::BiCgStab {
                tolerance: 1e-12,
                max_iterations: 1,
            },
        })
        .calculate(&model)
        .unwrap();
        assert!(!outcome.inner_solver_converged);
        assert_eq!(outcome.node_results.len(), 3);
        assert!(outcome.relative_power_error >= 0.0);
    }

    #[test]
    fn outcome_serde_round_trip() {
        let model = three_node_network().admittance_model().unwrap();
        let outcome = NewtonRaphson::new(Settings {
            target_precision: 1e-9,
            max_iterations: 50,
            solver: SolverStrategy::Direct,
        })
        .calculate(&model)
        .unwrap();
        let json = serde_json::to_string(&outcome).unwrap();
        let back: PowerFlowOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }
}
