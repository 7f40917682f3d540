//! Factor-graph core for probabilistic models.
//!
//! Variables are graph edges, factors are nodes. Distributions are factors
//! that can score (`log_pdf`) and sample (`draw_samples`) their output, with
//! the math written once against a [`ComputeBackend`] that runs either
//! eagerly on `ndarray` tensors or symbolically into a deferred graph.

pub mod compute;
pub mod config;
pub mod distribution;
pub mod distributions;
pub mod error;
pub mod factor;
pub mod function;
pub mod model;
pub mod random;
pub mod variable;

pub use compute::{ComputeBackend, ComputeMode, Eager, Symbolic, TensorMap};
pub use config::{DType, Device, Settings};
pub use distribution::{
    Distribution, DistributionKind, DistributionOptions, Param, ShapePolicy, StaticAttributes,
};
pub use distributions::{DiagonalNormal, Normal};
pub use error::{FactorError, Result};
pub use factor::{Factor, FactorCore, ReplicationMap};
pub use function::{FunctionEvaluation, FunctionKind};
pub use model::{FactorGraph, Node};
pub use random::{ChaChaGenerator, RandomGenerator, SharedGenerator};
pub use variable::{Variable, VariableKind};

// Future: categorical and other discrete families slot in as new
// `DistributionKind` variants with their own kernels in `distributions`.
