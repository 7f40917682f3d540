//! Deterministic function nodes.

use std::fmt;

use crate::compute::{self, broadcast_shapes, ComputeBackend, TensorMap};
use crate::distribution::Param;
use crate::error::{FactorError, Result};
use crate::factor::{Factor, FactorCore, ReplicationMap};
use crate::model::{FactorGraph, Node};
use crate::variable::{Variable, VariableKind};

pub const RESULT: &str = "result";

/// Elementwise operator a function node applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Log,
    Sqrt,
    Square,
}

impl FunctionKind {
    pub fn input_names(self) -> &'static [&'static str] {
        match self {
            FunctionKind::Add
            | FunctionKind::Subtract
            | FunctionKind::Multiply
            | FunctionKind::Divide => &["left", "right"],
            FunctionKind::Log | FunctionKind::Sqrt | FunctionKind::Square => &["operand"],
        }
    }

    fn apply<B: ComputeBackend>(self, f: &mut B, args: &[&B::Tensor]) -> Result<B::Tensor> {
        match self {
            FunctionKind::Add => f.add(args[0], args[1]),
            FunctionKind::Subtract => f.subtract(args[0], args[1]),
            FunctionKind::Multiply => f.multiply(args[0], args[1]),
            FunctionKind::Divide => f.divide(args[0], args[1]),
            FunctionKind::Log => f.log(args[0]),
            FunctionKind::Sqrt => f.sqrt(args[0]),
            FunctionKind::Square => f.square(args[0]),
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FunctionKind::Add => "add",
            FunctionKind::Subtract => "subtract",
            FunctionKind::Multiply => "multiply",
            FunctionKind::Divide => "divide",
            FunctionKind::Log => "log",
            FunctionKind::Sqrt => "sqrt",
            FunctionKind::Square => "square",
        };
        write!(f, "{}", s)
    }
}

/// A node computing `kind` over its inputs into a single `result` output.
#[derive(Debug, Clone)]
pub struct FunctionEvaluation {
    core: FactorCore,
    kind: FunctionKind,
}

impl FunctionEvaluation {
    pub fn new(kind: FunctionKind, inputs: Vec<(String, Variable)>) -> Result<Self> {
        let input_names = kind.input_names().iter().map(|s| s.to_string()).collect();
        let core = FactorCore::new(inputs, None, input_names, vec![RESULT.to_string()])?;
        Ok(Self { core, kind })
    }

    /// Build a node over `args`, insert it into `graph`, and return its result.
    ///
    /// Every argument needs a known shape; the result has their broadcast shape.
    pub fn define_variable(
        graph: &mut FactorGraph,
        kind: FunctionKind,
        args: Vec<Param>,
    ) -> Result<Variable> {
        let names = kind.input_names();
        if args.len() != names.len() {
            return Err(FactorError::config(format!(
                "{} takes {} arguments, got {}",
                kind,
                names.len(),
                args.len()
            )));
        }
        let inputs = names
            .iter()
            .zip(args)
            .map(|(n, a)| (n.to_string(), a.into_variable(n)))
            .collect();
        let mut node = Self::new(kind, inputs)?;
        let shape = node.output_shape()?;
        let mut outputs = node.generate_outputs(&[shape])?;
        let result = outputs
            .pop()
            .ok_or_else(|| FactorError::config("function produced no output"))?;
        graph.insert(Node::Function(node))?;
        Ok(result)
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// Broadcast of all input shapes.
    pub fn output_shape(&self) -> Result<Vec<usize>> {
        let mut shape = Vec::new();
        for (name, v) in self.core.inputs() {
            let s = v.shape().ok_or_else(|| {
                FactorError::config(format!("input '{}' of {} has no known shape", name, self.kind))
            })?;
            shape = broadcast_shapes(&shape, s)?;
        }
        Ok(shape)
    }

    pub fn evaluate<B: ComputeBackend>(
        &self,
        f: &mut B,
        inputs: &TensorMap<B::Tensor>,
    ) -> Result<B::Tensor> {
        let args = self
            .core
            .input_names()
            .iter()
            .map(|n| compute::input(inputs, n))
            .collect::<Result<Vec<_>>>()?;
        self.kind.apply(f, &args)
    }
}

impl Factor for FunctionEvaluation {
    fn core(&self) -> &FactorCore {
        &self.core
    }

    fn replicate_self(&self, attribute_map: Option<&ReplicationMap>) -> Result<Self> {
        Ok(Self {
            core: self.core.replicate(attribute_map)?,
            kind: self.kind,
        })
    }

    fn generate_outputs(&mut self, shapes: &[Vec<usize>]) -> Result<Vec<Variable>> {
        if let ([shape], Ok(expected)) = (shapes, self.output_shape()) {
            if *shape != expected {
                return Err(FactorError::config(format!(
                    "{} result must have shape {:?}, got {:?}",
                    self.kind, expected, shape
                )));
            }
        }
        self.core.generate_outputs(shapes, VariableKind::Function)
    }
}
