//! Boundary between three-phase quantities and the single-phase equivalent
//! the calculators work in. Symmetric operation only: voltages divide by
//! the square root of three, powers divide by three, and the inverse pair
//! restores the original values exactly up to floating rounding.

use super::{FeedIn, Generator, Line, Load, Network, TopologyError, Transformer};
use crate::flow::{NodeResult, NodeVoltageCalculator, PowerFlowError, PowerFlowOutcome};
use num_complex::Complex64;

const SQRT_3: f64 = 1.732_050_807_568_877_3;

pub fn single_phase_voltage(three_phase: Complex64) -> Complex64 {
    three_phase / SQRT_3
}

pub fn three_phase_voltage(single_phase: Complex64) -> Complex64 {
    single_phase * SQRT_3
}

pub fn single_phase_power(three_phase: Complex64) -> Complex64 {
    three_phase / 3.0
}

pub fn three_phase_power(single_phase: Complex64) -> Complex64 {
    single_phase * 3.0
}

pub fn single_phase_voltage_magnitude(three_phase: f64) -> f64 {
    three_phase / SQRT_3
}

pub fn three_phase_voltage_magnitude(single_phase: f64) -> f64 {
    single_phase * SQRT_3
}

/// Pass-through registration adapter for networks described in three-phase
/// quantities (line-to-line voltages, total powers). Every value is scaled
/// into the single-phase equivalent on the way in, and solved results are
/// scaled back on the way out, so scale-then-unscale is the identity.
#[derive(Debug, Clone)]
pub struct ThreePhaseNetwork {
    inner: Network,
}

impl ThreePhaseNetwork {
    pub fn new(frequency: f64) -> Self {
        Self {
            inner: Network::new(frequency),
        }
    }

    pub fn with_power_base(mut self, power_base: f64) -> Self {
        self.inner = self.inner.with_power_base(single_phase_power_magnitude(power_base));
        self
    }

    pub fn single_phase(&self) -> &Network {
        &self.inner
    }

    pub fn add_node(&mut self, id: i32, nominal_voltage: f64) -> Result<(), TopologyError> {
        self.inner
            .add_node(id, single_phase_voltage_magnitude(nominal_voltage))
    }

    /// Per-phase line parameters pass through unchanged.
    pub fn add_line(&mut self, line: Line) -> Result<(), TopologyError> {
        self.inner.add_line(line)
    }

    pub fn add_transformer(&mut self, transformer: Transformer) -> Result<(), TopologyError> {
        self.inner.add_transformer(Transformer {
            nominal_power: single_phase_power_magnitude(transformer.nominal_power),
            copper_losses: single_phase_power_magnitude(transformer.copper_losses),
            iron_losses: single_phase_power_magnitude(transformer.iron_losses),
            ..transformer
        })
    }

    pub fn add_generator(&mut self, generator: Generator) -> Result<(), TopologyError> {
        self.inner.add_generator(Generator {
            voltage_magnitude: single_phase_voltage_magnitude(generator.voltage_magnitude),
            real_power: single_phase_power_magnitude(generator.real_power),
            ..generator
        })
    }

    pub fn add_feed_in(&mut self, feed_in: FeedIn) -> Result<(), TopologyError> {
        self.inner.add_feed_in(FeedIn {
            voltage: single_phase_voltage(feed_in.voltage),
            short_circuit_power: single_phase_power_magnitude(feed_in.short_circuit_power),
            ..feed_in
        })
    }

    pub fn add_load(&mut self, load: Load) -> Result<(), TopologyError> {
        self.inner.add_load(Load {
            power: single_phase_power(load.power),
            ..load
        })
    }

    /// Runs a calculator on the single-phase equivalent and scales the
    /// node results back to three-phase quantities.
    pub fn calculate(
        &self,
        calculator: &mut dyn NodeVoltageCalculator,
    ) -> Result<PowerFlowOutcome, CalculationError> {
        let model = self.inner.admittance_model()?;
        let mut outcome = calculator.calculate(&model)?;
        for result in &mut outcome.node_results {
            *result = NodeResult {
                node: result.node,
                voltage: three_phase_voltage(result.voltage),
                power: three_phase_power(result.power),
            };
        }
        Ok(outcome)
    }
}

fn single_phase_power_magnitude(three_phase: f64) -> f64 {
    three_phase / 3.0
}

/// Assembly and solve failures crossing the three-phase boundary.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CalculationError {
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    PowerFlow(#[from] PowerFlowError),
}
