pub mod admittance;
pub mod angle;
pub mod scaling;
pub mod vector_group;

pub use admittance::{AdmittanceModel, BusConstraint};
pub use angle::Angle;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while assembling a network model. All of them are fatal
/// and local to model construction; a model that assembles never carries
/// them into a solve.
#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    #[error("node {0} is already defined")]
    DuplicateNode(i32),
    #[error("reference to undefined node {0}")]
    UnknownNode(i32),
    #[error("connection symbol code {0} does not name a vector group")]
    InvalidConnectionSymbol(i32),
    #[error("parameter `{0}` is not finite or outside its physical range")]
    InvalidParameter(&'static str),
    #[error("node {0} already has a feed-in")]
    DuplicateFeedIn(i32),
    #[error("node {0} already has a generator")]
    DuplicateGenerator(i32),
    #[error("node {0} carries both a feed-in and a generator")]
    ConflictingConstraints(i32),
    #[error("network has no feed-in to provide a voltage reference")]
    MissingReference,
}

/// Electrical node. The solved voltage is reported through
/// [`crate::flow::NodeResult`], the model itself stays read-only during a
/// solve and can be shared across calculator instances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: i32,
    /// Nominal voltage magnitude in volt; doubles as the per-unit base.
    pub nominal_voltage: f64,
}

/// Pi-model line between two nodes, parameters per unit length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub from: i32,
    pub to: i32,
    /// Series resistance in ohm per unit length.
    pub resistance: f64,
    /// Series inductance in henry per unit length.
    pub inductance: f64,
    /// Shunt conductance in siemens per unit length.
    pub shunt_conductance: f64,
    /// Shunt capacitance in farad per unit length.
    pub shunt_capacitance: f64,
    pub length: f64,
}

/// Two-winding transformer between an upper- and a lower-voltage node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transformer {
    pub upper: i32,
    pub lower: i32,
    /// Nominal apparent power in volt-ampere.
    pub nominal_power: f64,
    /// Relative short-circuit voltage as a fraction (0.04 for 4 %).
    pub relative_short_circuit_voltage: f64,
    /// Copper losses in watt.
    pub copper_losses: f64,
    /// Iron losses in watt.
    pub iron_losses: f64,
    /// Relative no-load current as a fraction.
    pub relative_no_load_current: f64,
    /// Turns ratio, upper winding voltage over lower winding voltage.
    pub ratio: f64,
    /// Winding connection-symbol code, decoded by [`vector_group`].
    pub connection_symbol: i32,
}

/// Voltage-controlled machine, a PV bus constraint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub node: i32,
    /// Voltage magnitude setpoint in volt.
    pub voltage_magnitude: f64,
    /// Specified real power injection in watt.
    pub real_power: f64,
}

/// External grid connection. With zero short-circuit power it is an ideal
/// voltage source; otherwise it acts behind the equivalent short-circuit
/// impedance `c * U^2 / S_sc` split by the R-to-X ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedIn {
    pub node: i32,
    /// Source voltage in volt.
    pub voltage: Complex64,
    /// Short-circuit power in volt-ampere; zero means ideal.
    pub short_circuit_power: f64,
    pub resistance_to_reactance: f64,
    /// Voltage correction factor `c`.
    pub correction_factor: f64,
}

/// Specified complex power at a node, a PQ bus constraint. Consumption is
/// a negative injection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub node: i32,
    /// Complex power injection in volt-ampere.
    pub power: Complex64,
}

fn finite(value: f64, name: &'static str) -> Result<f64, TopologyError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TopologyError::InvalidParameter(name))
    }
}

fn finite_positive(value: f64, name: &'static str) -> Result<f64, TopologyError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(TopologyError::InvalidParameter(name))
    }
}

fn finite_complex(value: Complex64, name: &'static str) -> Result<Complex64, TopologyError> {
    if value.re.is_finite() && value.im.is_finite() {
        Ok(value)
    } else {
        Err(TopologyError::InvalidParameter(name))
    }
}

/// In-memory network description and single-phase registration surface.
/// Element registration fails fast on invalid topology; the assembled
/// [`AdmittanceModel`] is obtained through [`Network::admittance_model`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    frequency: f64,
    power_base: f64,
    nodes: Vec<Node>,
    #[serde(skip)]
    index: BTreeMap<i32, usize>,
    lines: Vec<Line>,
    transformers: Vec<Transformer>,
    generators: Vec<Generator>,
    feed_ins: Vec<FeedIn>,
    loads: Vec<Load>,
}

impl Network {
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            power_base: 1e6,
            nodes: Vec::new(),
            index: BTreeMap::new(),
            lines: Vec::new(),
            transformers: Vec::new(),
            generators: Vec::new(),
            feed_ins: Vec::new(),
            loads: Vec::new(),
        }
    }

    /// Per-unit power base in volt-ampere, 1 MVA unless overridden.
    pub fn with_power_base(mut self, power_base: f64) -> Self {
        self.power_base = power_base;
        self
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn power_base(&self) -> f64 {
        self.power_base
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn node_index(&self, id: i32) -> Result<usize, TopologyError> {
        self.index
            .get(&id)
            .copied()
            .ok_or(TopologyError::UnknownNode(id))
    }

    pub fn add_node(&mut self, id: i32, nominal_voltage: f64) -> Result<(), TopologyError> {
        finite_positive(nominal_voltage, "node.nominal_voltage")?;
        if self.index.contains_key(&id) {
            return Err(TopologyError::DuplicateNode(id));
        }
        self.index.insert(id, self.nodes.len());
        self.nodes.push(Node { id, nominal_voltage });
        Ok(())
    }

    pub fn add_line(&mut self, line: Line) -> Result<(), TopologyError> {
        self.node_index(line.from)?;
        self.node_index(line.to)?;
        finite(line.resistance, "line.resistance")?;
        finite(line.inductance, "line.inductance")?;
        finite(line.shunt_conductance, "line.shunt_conductance")?;
        finite(line.shunt_capacitance, "line.shunt_capacitance")?;
        finite_positive(line.length, "line.length")?;
        if line.resistance == 0.0 && line.inductance == 0.0 {
            return Err(TopologyError::InvalidParameter("line.series_impedance"));
        }
        self.lines.push(line);
        Ok(())
    }

    pub fn add_transformer(&mut self, transformer: Transformer) -> Result<(), TopologyError> {
        self.node_index(transformer.upper)?;
        self.node_index(transformer.lower)?;
        finite_positive(transformer.nominal_power, "transformer.nominal_power")?;
        finite_positive(
            transformer.relative_short_circuit_voltage,
            "transformer.relative_short_circuit_voltage",
        )?;
        finite(transformer.copper_losses, "transformer.copper_losses")?;
        finite(transformer.iron_losses, "transformer.iron_losses")?;
        finite(
            transformer.relative_no_load_current,
            "transformer.relative_no_load_current",
        )?;
        finite_positive(transformer.ratio, "transformer.ratio")?;
        vector_group::phase_shift_clock(transformer.connection_symbol)?;
        self.transformers.push(transformer);
        Ok(())
    }

    pub fn add_generator(&mut self, generator: Generator) -> Result<(), TopologyError> {
        self.node_index(generator.node)?;
        finite_positive(generator.voltage_magnitude, "generator.voltage_magnitude")?;
        finite(generator.real_power, "generator.real_power")?;
        if self.generators.iter().any(|g| g.node == generator.node) {
            return Err(TopologyError::DuplicateGenerator(generator.node));
        }
        if self.feed_ins.iter().any(|f| f.node == generator.node) {
            return Err(TopologyError::ConflictingConstraints(generator.node));
        }
        self.generators.push(generator);
        Ok(())
    }

    pub fn add_feed_in(&mut self, feed_in: FeedIn) -> Result<(), TopologyError> {
        self.node_index(feed_in.node)?;
        finite_complex(feed_in.voltage, "feed_in.voltage")?;
        finite(feed_in.short_circuit_power, "feed_in.short_circuit_power")?;
        finite(feed_in.resistance_to_reactance, "feed_in.resistance_to_reactance")?;
        finite(feed_in.correction_factor, "feed_in.correction_factor")?;
        if feed_in.short_circuit_power < 0.0 {
            return Err(TopologyError::InvalidParameter("feed_in.short_circuit_power"));
        }
        if self.feed_ins.iter().any(|f| f.node == feed_in.node) {
            return Err(TopologyError::DuplicateFeedIn(feed_in.node));
        }
        if self.generators.iter().any(|g| g.node == feed_in.node) {
            return Err(TopologyError::ConflictingConstraints(feed_in.node));
        }
        self.feed_ins.push(feed_in);
        Ok(())
    }

    pub fn add_load(&mut self, load: Load) -> Result<(), TopologyError> {
        self.node_index(load.node)?;
        finite_complex(load.power, "load.power")?;
        self.loads.push(load);
        Ok(())
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn transformers(&self) -> &[Transformer] {
        &self.transformers
    }

    pub fn generators(&self) -> &[Generator] {
        &self.generators
    }

    pub fn feed_ins(&self) -> &[FeedIn] {
        &self.feed_ins
    }

    pub fn loads(&self) -> &[Load] {
        &self.loads
    }

    /// Rebuilds the id lookup; needed after deserializing.
    pub fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id, i))
            .collect();
    }
}
