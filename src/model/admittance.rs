//! Per-unit admittance matrix assembly.
//!
//! Every element stamps its contribution into a complex nodal admittance
//! matrix normalized to the node nominal voltages and the network power
//! base. A feed-in with finite short-circuit power expands into an internal
//! source node behind its equivalent grid impedance, so the calculators
//! only ever see slack, generator and load constraints.

use super::{Network, TopologyError, vector_group};
use nalgebra::DMatrix;
use num_complex::Complex64;
use std::f64::consts::PI;

/// Specified constraint at one matrix row, in per-unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BusConstraint {
    /// Fixed complex voltage.
    Slack { voltage: Complex64 },
    /// Fixed real power injection and voltage magnitude, reactive power free.
    Generator {
        active_power: f64,
        voltage_magnitude: f64,
    },
    /// Fixed complex power injection.
    Load { power: Complex64 },
}

/// Assembled nodal equations: admittance matrix, one constraint per row,
/// and the bases needed to translate results back to physical units.
///
/// Rows `0..user_nodes` correspond one-to-one to the registered nodes in
/// registration order; rows beyond that are internal feed-in source nodes
/// and never appear in reported results.
#[derive(Debug, Clone)]
pub struct AdmittanceModel {
    y: DMatrix<Complex64>,
    constraints: Vec<BusConstraint>,
    node_ids: Vec<i32>,
    voltage_bases: Vec<f64>,
    power_base: f64,
}

impl AdmittanceModel {
    pub fn n(&self) -> usize {
        self.constraints.len()
    }

    /// Number of leading rows that map to registered nodes.
    pub fn user_nodes(&self) -> usize {
        self.node_ids.len()
    }

    pub fn node_id(&self, row: usize) -> i32 {
        self.node_ids[row]
    }

    pub fn admittance(&self) -> &DMatrix<Complex64> {
        &self.y
    }

    pub fn constraint(&self, row: usize) -> BusConstraint {
        self.constraints[row]
    }

    pub fn constraints(&self) -> &[BusConstraint] {
        &self.constraints
    }

    pub fn voltage_base(&self, row: usize) -> f64 {
        self.voltage_bases[row]
    }

    pub fn power_base(&self) -> f64 {
        self.power_base
    }

    /// Flat start: slack rows at their specified voltage, generator rows at
    /// their magnitude setpoint, load rows at one per-unit.
    pub fn initial_voltages(&self) -> Vec<Complex64> {
        self.constraints
            .iter()
            .map(|c| match *c {
                BusConstraint::Slack { voltage } => voltage,
                BusConstraint::Generator {
                    voltage_magnitude, ..
                } => Complex64::new(voltage_magnitude, 0.0),
                BusConstraint::Load { .. } => Complex64::new(1.0, 0.0),
            })
            .collect()
    }
}

impl Network {
    /// Assembles the per-unit nodal equations for this network.
    pub fn admittance_model(&self) -> Result<AdmittanceModel, TopologyError> {
        if self.feed_ins().is_empty() {
            return Err(TopologyError::MissingReference);
        }
        let m = self.nodes().len();
        let mut voltage_bases: Vec<f64> =
            self.nodes().iter().map(|n| n.nominal_voltage).collect();
        let mut node_power = vec![Complex64::new(0.0, 0.0); m];
        let s_base = self.power_base();

        // Internal nodes for non-ideal feed-ins come after the user nodes.
        let extra = self
            .feed_ins()
            .iter()
            .filter(|f| f.short_circuit_power > 0.0)
            .count();
        let n = m + extra;
        let mut y = DMatrix::from_element(n, n, Complex64::new(0.0, 0.0));

        let omega = 2.0 * PI * self.frequency();
        for line in self.lines() {
            let i = self.node_index(line.from)?;
            let j = self.node_index(line.to)?;
            let z = Complex64::new(line.resistance, omega * line.inductance) * line.length;
            let y_shunt_half = Complex64::new(
                line.shunt_conductance,
                omega * line.shunt_capacitance,
            ) * (line.length / 2.0);
            // Each stamp carries its own ends' bases so the per-unit answer
            // stays independent of the base choice even when the terminals
            // differ: diagonals on v_i^2 and v_j^2, couplings on v_i * v_j.
            let y_physical = 1.0 / z;
            let base_i = voltage_bases[i] * voltage_bases[i] / s_base;
            let base_j = voltage_bases[j] * voltage_bases[j] / s_base;
            let coupling = y_physical * (voltage_bases[i] * voltage_bases[j] / s_base);
            y[(i, i)] += (y_physical + y_shunt_half) * base_i;
            y[(j, j)] += (y_physical + y_shunt_half) * base_j;
            y[(i, j)] -= coupling;
            y[(j, i)] -= coupling;
        }

        for t in self.transformers() {
            let f = self.node_index(t.upper)?;
            let l = self.node_index(t.lower)?;
            let upper_winding = voltage_bases[f];
            let lower_winding = upper_winding / t.ratio;

            // Short-circuit branch in per-unit on the transformer base,
            // referred to the lower winding.
            let r_k = t.copper_losses / t.nominal_power;
            let u_k = t.relative_short_circuit_voltage;
            let x_k = (u_k * u_k - r_k * r_k).max(0.0).sqrt();
            let z_trafo = Complex64::new(r_k, x_k);
            let base_shift = (s_base / t.nominal_power)
                * (lower_winding / voltage_bases[l]).powi(2);
            let y_series = 1.0 / (z_trafo * base_shift);

            // Magnetizing branch from iron losses and no-load current.
            let g_m = t.iron_losses / t.nominal_power;
            let y_m_mag = t.relative_no_load_current;
            let b_m = -(y_m_mag * y_m_mag - g_m * g_m).max(0.0).sqrt();
            let y_shunt = Complex64::new(g_m, b_m) / base_shift;

            // Complex off-nominal tap on the upper side.
            let shift = vector_group::phase_shift(t.connection_symbol)?;
            let tap = t.ratio * voltage_bases[l] / voltage_bases[f];
            let tap = Complex64::from_polar(tap, shift.radians());

            let half_shunt = y_shunt / 2.0;
            y[(f, f)] += (y_series + half_shunt) / tap.norm_sqr();
            y[(f, l)] -= y_series / tap.conj();
            y[(l, f)] -= y_series / tap;
            y[(l, l)] += y_series + half_shunt;
        }

        for load in self.loads() {
            let i = self.node_index(load.node)?;
            node_power[i] += load.power / s_base;
        }

        let mut constraints = vec![None; n];
        let mut next_internal = m;
        for feed_in in self.feed_ins() {
            let i = self.node_index(feed_in.node)?;
            let v_pu = feed_in.voltage / voltage_bases[i];
            if feed_in.short_circuit_power > 0.0 {
                // Equivalent grid impedance c * U^2 / S_sc, split by the
                // resistance-to-reactance ratio, between the user node and a
                // new internal slack node.
                let z_mag =
                    feed_in.correction_factor * s_base / feed_in.short_circuit_power;
                let rx = feed_in.resistance_to_reactance;
                let x = z_mag / (1.0 + rx * rx).sqrt();
                let y_grid = 1.0 / Complex64::new(rx * x, x);
                let s = next_internal;
                next_internal += 1;
                y[(s, s)] += y_grid;
                y[(i, i)] += y_grid;
                y[(s, i)] -= y_grid;
                y[(i, s)] -= y_grid;
                constraints[s] = Some(BusConstraint::Slack { voltage: v_pu });
                voltage_bases.push(voltage_bases[i]);
            } else {
                constraints[i] = Some(BusConstraint::Slack { voltage: v_pu });
            }
        }

        for generator in self.generators() {
            let i = self.node_index(generator.node)?;
            if constraints[i].is_some() {
                return Err(TopologyError::ConflictingConstraints(generator.node));
            }
            // Local consumption shifts the net real injection; reactive
            // demand folds into the free generator output.
            constraints[i] = Some(BusConstraint::Generator {
                active_power: generator.real_power / s_base + node_power[i].re,
                voltage_magnitude: generator.voltage_magnitude / voltage_bases[i],
            });
        }

        let constraints = constraints
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                c.unwrap_or(BusConstraint::Load {
                    power: node_power.get(i).copied().unwrap_or_default(),
                })
            })
            .collect();

        Ok(AdmittanceModel {
            y,
            constraints,
            node_ids: self.nodes().iter().map(|n| n.id).collect(),
            voltage_bases,
            power_base: s_base,
        })
    }

}
