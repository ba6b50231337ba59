pub mod arith;
pub mod flow;
pub mod model;
pub mod series;
pub mod solver;

pub mod prelude {
    pub use crate::arith::{Arithmetic, DoubleArithmetic, PreciseArithmetic};
    pub use crate::flow::{
        CurrentIteration, FastDecoupled, HolomorphicEmbedding, NewtonRaphson,
        NodeResult, NodeVoltageCalculator, PowerFlowError, PowerFlowOutcome, Settings,
    };
    pub use crate::model::{
        AdmittanceModel, Angle, BusConstraint, FeedIn, Generator, Line, Load, Network,
        Node, TopologyError, Transformer,
    };
    pub use crate::series::PowerSeries;
    pub use crate::solver::{SolverError, SolverStrategy};
}
