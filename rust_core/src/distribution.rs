//! Distribution nodes.
//!
//! A [`Distribution`] is a [`Factor`] that also carries a sampling family
//! ([`DistributionKind`]), a dtype/device, an injected random generator and a
//! [`StaticAttributes`] block. The family decides the [`ShapePolicy`] and
//! supplies the density and sampling kernels; everything here is written
//! against [`ComputeBackend`] and never inspects which backend it was given.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::compute::{
    self, broadcasts_to, ComputeBackend, ComputeMode, Eager, Symbolic, TensorMap,
};
use crate::config::{self, DType, Device};
use crate::distributions;
use crate::error::{FactorError, Result};
use crate::factor::{Factor, FactorCore, ReplicationMap};
use crate::model::{FactorGraph, Node};
use crate::random::{default_generator, SharedGenerator};
use crate::variable::{Variable, VariableKind};

/// Name of the single output of every distribution node.
pub const RANDOM_VARIABLE: &str = "random_variable";

/// How a family's random variable relates to its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapePolicy {
    /// Every entry is independent; any rank is allowed.
    Univariate,
    /// The trailing axis is one joint vector and must exist and be non-empty.
    Multivariate,
}

impl ShapePolicy {
    /// Rank requirement only.
    pub fn check_rank(self, shape: &[usize]) -> Result<()> {
        match self {
            ShapePolicy::Univariate => Ok(()),
            ShapePolicy::Multivariate => match shape.last() {
                Some(&d) if d > 0 => Ok(()),
                _ => Err(FactorError::config(format!(
                    "multivariate shape {:?} needs a non-empty trailing joint axis",
                    shape
                ))),
            },
        }
    }

    /// Check a requested output shape against the policy and the known
    /// parameter shapes. Each parameter must broadcast to `shape` exactly.
    pub fn validate(self, shape: &[usize], param_shapes: &[&[usize]]) -> Result<()> {
        self.check_rank(shape)?;
        for p in param_shapes {
            if !broadcasts_to(p, shape) {
                return Err(FactorError::config(format!(
                    "parameter shape {:?} does not broadcast to {:?}",
                    p, shape
                )));
            }
        }
        Ok(())
    }
}

/// Supported sampling families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    Normal,
    DiagonalNormal,
}

impl DistributionKind {
    pub fn policy(self) -> ShapePolicy {
        match self {
            DistributionKind::Normal => ShapePolicy::Univariate,
            DistributionKind::DiagonalNormal => ShapePolicy::Multivariate,
        }
    }

    pub fn input_names(self) -> &'static [&'static str] {
        match self {
            DistributionKind::Normal | DistributionKind::DiagonalNormal => &["mean", "variance"],
        }
    }

    fn log_pdf<B: ComputeBackend>(
        self,
        f: &mut B,
        params: &[&B::Tensor],
        x: &B::Tensor,
    ) -> Result<B::Tensor> {
        match self {
            DistributionKind::Normal => distributions::normal_log_pdf(f, params[0], params[1], x),
            DistributionKind::DiagonalNormal => {
                distributions::diagonal_normal_log_pdf(f, params[0], params[1], x)
            }
        }
    }

    fn draw<B: ComputeBackend>(
        self,
        f: &mut B,
        generator: &SharedGenerator,
        params: &[&B::Tensor],
        out_shape: &[usize],
        dtype: DType,
        device: Device,
    ) -> Result<B::Tensor> {
        match self {
            DistributionKind::Normal | DistributionKind::DiagonalNormal => {
                distributions::normal_draw(f, generator, params[0], params[1], out_shape, dtype, device)
            }
        }
    }
}

impl fmt::Display for DistributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionKind::Normal => write!(f, "normal"),
            DistributionKind::DiagonalNormal => write!(f, "diagonal_normal"),
        }
    }
}

/// Per-node configuration that the graph never resolves.
///
/// Copied as a whole on replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticAttributes {
    log_pdf_scaling: f64,
    #[serde(default)]
    named: BTreeMap<String, f64>,
}

impl Default for StaticAttributes {
    fn default() -> Self {
        Self {
            log_pdf_scaling: 1.0,
            named: BTreeMap::new(),
        }
    }
}

impl StaticAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Multiplier applied to every `log_pdf` result (e.g. a minibatch ratio).
    pub fn with_log_pdf_scaling(mut self, scaling: f64) -> Result<Self> {
        if !(scaling.is_finite() && scaling > 0.0) {
            return Err(FactorError::config(format!(
                "log_pdf_scaling must be finite and positive, got {}",
                scaling
            )));
        }
        self.log_pdf_scaling = scaling;
        Ok(self)
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.named.insert(name.into(), value);
        self
    }

    pub fn log_pdf_scaling(&self) -> f64 {
        self.log_pdf_scaling
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.named.get(name).copied()
    }

    pub fn require(&self, name: &str) -> Result<f64> {
        self.get(name)
            .ok_or_else(|| FactorError::config(format!("missing static attribute '{}'", name)))
    }

    pub fn named(&self) -> &BTreeMap<String, f64> {
        &self.named
    }
}

/// Construction options for model authors.
#[derive(Debug, Clone)]
pub struct DistributionOptions {
    /// Falls back to [`default_generator`] when `None`.
    pub rand_gen: Option<SharedGenerator>,
    pub dtype: DType,
    pub device: Device,
    pub attributes: StaticAttributes,
    pub name: Option<String>,
}

impl Default for DistributionOptions {
    fn default() -> Self {
        let settings = config::global();
        Self {
            rand_gen: None,
            dtype: settings.dtype,
            device: settings.device,
            attributes: StaticAttributes::default(),
            name: None,
        }
    }
}

impl DistributionOptions {
    pub fn with_rand_gen(mut self, g: SharedGenerator) -> Self {
        self.rand_gen = Some(g);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attributes(mut self, attributes: StaticAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A parameter argument: a value to wrap as a constant, or an existing Variable.
#[derive(Debug, Clone)]
pub enum Param {
    Scalar(f64),
    Array(ArrayD<f64>),
    Variable(Variable),
}

impl Param {
    pub fn into_variable(self, name: &str) -> Variable {
        match self {
            Param::Scalar(v) => Variable::named_constant(
                name,
                ArrayD::from_elem(ndarray::IxDyn(&[]), v),
            ),
            Param::Array(a) => Variable::named_constant(name, a),
            Param::Variable(v) => v,
        }
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Scalar(v)
    }
}

impl From<ArrayD<f64>> for Param {
    fn from(a: ArrayD<f64>) -> Self {
        Param::Array(a)
    }
}

impl From<Variable> for Param {
    fn from(v: Variable) -> Self {
        Param::Variable(v)
    }
}

impl From<&Variable> for Param {
    fn from(v: &Variable) -> Self {
        Param::Variable(v.clone())
    }
}

/// A distribution node.
#[derive(Debug, Clone)]
pub struct Distribution {
    core: FactorCore,
    kind: DistributionKind,
    dtype: DType,
    device: Device,
    rand_gen: SharedGenerator,
    attributes: StaticAttributes,
}

impl Distribution {
    /// Build an unmaterialized node of `kind` over `inputs`.
    pub fn new(
        kind: DistributionKind,
        inputs: Vec<(String, Variable)>,
        options: DistributionOptions,
    ) -> Result<Self> {
        let input_names = kind.input_names().iter().map(|s| s.to_string()).collect();
        let mut core = FactorCore::new(inputs, None, input_names, vec![RANDOM_VARIABLE.to_string()])?;
        if let Some(name) = options.name {
            core = core.with_name(name);
        }
        Ok(Self {
            core,
            kind,
            dtype: options.dtype,
            device: options.device,
            rand_gen: options.rand_gen.unwrap_or_else(default_generator),
            attributes: options.attributes,
        })
    }

    /// Build a node from parameter values, materialize its output with
    /// `shape`, insert it into `graph`, and return the output Variable.
    pub fn define_variable(
        graph: &mut FactorGraph,
        kind: DistributionKind,
        params: Vec<Param>,
        shape: Vec<usize>,
        options: DistributionOptions,
    ) -> Result<Variable> {
        let names = kind.input_names();
        if params.len() != names.len() {
            return Err(FactorError::config(format!(
                "{} takes {} parameters, got {}",
                kind,
                names.len(),
                params.len()
            )));
        }
        let inputs = names
            .iter()
            .zip(params)
            .map(|(n, p)| (n.to_string(), p.into_variable(n)))
            .collect();
        let mut node = Self::new(kind, inputs, options)?;
        let mut outputs = node.generate_outputs(&[shape])?;
        let rv = outputs
            .pop()
            .ok_or_else(|| FactorError::config("distribution produced no output"))?;
        graph.insert(Node::Distribution(node))?;
        Ok(rv)
    }

    pub fn kind(&self) -> DistributionKind {
        self.kind
    }

    pub fn policy(&self) -> ShapePolicy {
        self.kind.policy()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn rand_gen(&self) -> &SharedGenerator {
        &self.rand_gen
    }

    pub fn attributes(&self) -> &StaticAttributes {
        &self.attributes
    }

    /// Swap the injected generator.
    pub fn with_rand_gen(mut self, rand_gen: SharedGenerator) -> Self {
        self.rand_gen = rand_gen;
        self
    }

    /// The output Variable, once materialized.
    pub fn random_variable(&self) -> Option<&Variable> {
        self.core.output(RANDOM_VARIABLE)
    }

    fn params<'a, T>(&self, inputs: &'a TensorMap<T>) -> Result<Vec<&'a T>> {
        self.core
            .input_names()
            .iter()
            .map(|n| compute::input(inputs, n))
            .collect()
    }

    fn check_params<B: ComputeBackend>(
        f: &B,
        params: &[&B::Tensor],
        target: &[usize],
    ) -> Result<()> {
        for p in params {
            let shape = f.shape(p);
            if !broadcasts_to(&shape, target) {
                return Err(FactorError::shape(&shape, target));
            }
        }
        Ok(())
    }

    /// Log-density of `x` given the parameter tensors in `inputs`.
    ///
    /// The result has the shape of `x` (minus the joint axis for
    /// multivariate families), scaled by `log_pdf_scaling` and rounded to
    /// the node's dtype.
    pub fn log_pdf<B: ComputeBackend>(
        &self,
        f: &mut B,
        inputs: &TensorMap<B::Tensor>,
        x: &B::Tensor,
    ) -> Result<B::Tensor> {
        let params = self.params(inputs)?;
        let rv_shape = f.shape(x);
        self.policy().check_rank(&rv_shape)?;
        Self::check_params(f, &params, &rv_shape)?;
        let out = self.kind.log_pdf(f, &params, x)?;
        let scaling = self.attributes.log_pdf_scaling();
        let out = if scaling != 1.0 { f.scale(&out, scaling)? } else { out };
        self.to_dtype(f, out)
    }

    /// Draw `num_samples` values of shape `rv_shape`; the result has shape
    /// `(num_samples,) + rv_shape`.
    pub fn draw_samples<B: ComputeBackend>(
        &self,
        f: &mut B,
        inputs: &TensorMap<B::Tensor>,
        rv_shape: &[usize],
        num_samples: usize,
    ) -> Result<B::Tensor> {
        if num_samples == 0 {
            return Err(FactorError::config("num_samples must be at least 1"));
        }
        let params = self.params(inputs)?;
        self.policy().check_rank(rv_shape)?;
        Self::check_params(f, &params, rv_shape)?;
        let mut out_shape = Vec::with_capacity(rv_shape.len() + 1);
        out_shape.push(num_samples);
        out_shape.extend_from_slice(rv_shape);
        let out = self
            .kind
            .draw(f, &self.rand_gen, &params, &out_shape, self.dtype, self.device)?;
        self.to_dtype(f, out)
    }

    fn to_dtype<B: ComputeBackend>(&self, f: &mut B, out: B::Tensor) -> Result<B::Tensor> {
        match self.dtype {
            DType::F64 => Ok(out),
            DType::F32 => f.round_to(&out, self.dtype),
        }
    }

    /// `log_pdf` over concrete tensors under `mode` (or the process default).
    pub fn log_pdf_concrete(
        &self,
        inputs: &TensorMap<ArrayD<f64>>,
        x: &ArrayD<f64>,
        mode: Option<ComputeMode>,
    ) -> Result<ArrayD<f64>> {
        match compute::resolve_mode(mode) {
            ComputeMode::Eager => self.log_pdf(&mut Eager, inputs, x),
            ComputeMode::Symbolic => {
                let (mut s, symbols, mut bindings) = self.placeholders(inputs)?;
                let xs = s.placeholder(RANDOM_VARIABLE, x.shape().to_vec())?;
                bindings.insert(RANDOM_VARIABLE.to_string(), x.clone());
                let out = self.log_pdf(&mut s, &symbols, &xs)?;
                single(s.into_graph().evaluate(&bindings, &[out])?)
            }
        }
    }

    /// `draw_samples` over concrete tensors under `mode` (or the process default).
    pub fn draw_samples_concrete(
        &self,
        inputs: &TensorMap<ArrayD<f64>>,
        rv_shape: &[usize],
        num_samples: usize,
        mode: Option<ComputeMode>,
    ) -> Result<ArrayD<f64>> {
        match compute::resolve_mode(mode) {
            ComputeMode::Eager => self.draw_samples(&mut Eager, inputs, rv_shape, num_samples),
            ComputeMode::Symbolic => {
                let (mut s, symbols, bindings) = self.placeholders(inputs)?;
                let out = self.draw_samples(&mut s, &symbols, rv_shape, num_samples)?;
                single(s.into_graph().evaluate(&bindings, &[out])?)
            }
        }
    }

    fn placeholders(
        &self,
        inputs: &TensorMap<ArrayD<f64>>,
    ) -> Result<(Symbolic, TensorMap<compute::Symbol>, TensorMap<ArrayD<f64>>)> {
        let mut s = Symbolic::new();
        let mut symbols = TensorMap::new();
        let mut bindings = TensorMap::new();
        for name in self.core.input_names() {
            let value = compute::input(inputs, name)?;
            symbols.insert(name.clone(), s.placeholder(name, value.shape().to_vec())?);
            bindings.insert(name.clone(), value.clone());
        }
        Ok((s, symbols, bindings))
    }
}

fn single(mut values: Vec<ArrayD<f64>>) -> Result<ArrayD<f64>> {
    values
        .pop()
        .ok_or_else(|| FactorError::config("symbol graph returned no output"))
}

impl Factor for Distribution {
    fn core(&self) -> &FactorCore {
        &self.core
    }

    fn replicate_self(&self, attribute_map: Option<&ReplicationMap>) -> Result<Self> {
        let core = self.core.replicate(attribute_map)?;
        // Every field besides the bindings is copied structurally.
        Ok(Self {
            core,
            ..self.clone()
        })
    }

    fn generate_outputs(&mut self, shapes: &[Vec<usize>]) -> Result<Vec<Variable>> {
        if let [shape] = shapes {
            let known: Vec<&[usize]> = self.core.inputs().values().filter_map(Variable::shape).collect();
            self.policy().validate(shape, &known)?;
        }
        self.core.generate_outputs(shapes, VariableKind::Random)
    }
}
