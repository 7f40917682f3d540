//! Compute-mode dispatch.
//!
//! All distribution and function math is written once against
//! [`ComputeBackend`]. Two backends implement it:
//!
//! - [`Eager`] evaluates on concrete `ndarray` tensors immediately.
//! - [`Symbolic`] records placeholder nodes into a [`SymbolGraph`], which is
//!   evaluated later by [`SymbolGraph::evaluate`] once placeholders are bound.
//!
//! Both share [`broadcast_shapes`], so shape errors are identical across modes.

pub mod eager;
pub mod executor;
pub mod graph;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::{self, DType, Device};
use crate::error::{FactorError, Result};
use crate::random::SharedGenerator;

pub use eager::Eager;
pub use graph::{NodeId, Op, Symbol, SymbolGraph, Symbolic};

/// Which backend evaluates numeric operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeMode {
    #[default]
    Eager,
    Symbolic,
}

impl ComputeMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eager" | "ndarray" => Some(ComputeMode::Eager),
            "symbolic" | "symbol" => Some(ComputeMode::Symbolic),
            _ => None,
        }
    }
}

impl fmt::Display for ComputeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeMode::Eager => write!(f, "eager"),
            ComputeMode::Symbolic => write!(f, "symbolic"),
        }
    }
}

/// Named tensors, ordered as the owning factor declares its inputs.
pub type TensorMap<T> = IndexMap<String, T>;

/// Numeric operator set shared by both compute modes.
///
/// Binary operators broadcast NumPy-style: trailing dimensions align, size-1
/// dimensions stretch, any other mismatch is [`FactorError::Shape`].
pub trait ComputeBackend {
    type Tensor: Clone + fmt::Debug;

    fn mode(&self) -> ComputeMode;

    fn shape(&self, t: &Self::Tensor) -> Vec<usize>;

    /// A 0-dimensional constant.
    fn constant(&mut self, value: f64) -> Self::Tensor;

    fn add(&mut self, a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;
    fn subtract(&mut self, a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;
    fn multiply(&mut self, a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;
    fn divide(&mut self, a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;

    fn log(&mut self, a: &Self::Tensor) -> Result<Self::Tensor>;
    fn sqrt(&mut self, a: &Self::Tensor) -> Result<Self::Tensor>;
    fn square(&mut self, a: &Self::Tensor) -> Result<Self::Tensor>;

    /// Sum over the trailing axis; fails on 0-dimensional input.
    fn sum_last_axis(&mut self, a: &Self::Tensor) -> Result<Self::Tensor>;

    /// Broadcast `a` to exactly `shape`.
    fn broadcast_to(&mut self, a: &Self::Tensor, shape: &[usize]) -> Result<Self::Tensor>;

    /// Round every element of `a` to `dtype` precision.
    fn round_to(&mut self, a: &Self::Tensor, dtype: DType) -> Result<Self::Tensor>;

    /// Standard-normal draws of `shape` from `generator`.
    fn random_normal(
        &mut self,
        generator: &SharedGenerator,
        shape: &[usize],
        dtype: DType,
        device: Device,
    ) -> Result<Self::Tensor>;

    /// `a * factor` for a host-side scalar.
    fn scale(&mut self, a: &Self::Tensor, factor: f64) -> Result<Self::Tensor> {
        let c = self.constant(factor);
        self.multiply(a, &c)
    }
}

/// NumPy broadcasting of two shapes.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return Err(FactorError::shape(a, b)),
        };
    }
    Ok(out)
}

/// True when `from` broadcasts to `target` without growing it.
pub fn broadcasts_to(from: &[usize], target: &[usize]) -> bool {
    matches!(broadcast_shapes(from, target), Ok(s) if s == target)
}

/// The explicit mode if given, else the process-wide default.
pub fn resolve_mode(mode: Option<ComputeMode>) -> ComputeMode {
    mode.unwrap_or_else(|| config::global().compute_mode)
}

/// Look up a named input tensor.
pub fn input<'a, T>(inputs: &'a TensorMap<T>, name: &str) -> Result<&'a T> {
    inputs
        .get(name)
        .ok_or_else(|| FactorError::config(format!("missing input tensor '{}'", name)))
}
