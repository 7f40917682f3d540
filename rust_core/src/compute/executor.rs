//! Forward execution of a [`SymbolGraph`] once its placeholders are bound.

use ndarray::ArrayD;

use super::graph::{NodeId, Op, Symbol, SymbolGraph};
use super::{ComputeBackend, Eager, TensorMap};
use crate::error::{FactorError, Result};

fn operand(values: &[ArrayD<f64>], id: NodeId) -> Result<&ArrayD<f64>> {
    values.get(id.0).ok_or_else(|| {
        FactorError::config(format!("node {:?} is used before it is defined", id))
    })
}

impl SymbolGraph {
    /// Forward-evaluate every node and return the per-node values.
    ///
    /// Each placeholder must be bound by name to a tensor of its declared
    /// shape. Random nodes draw from their generator here, not when recorded.
    pub fn forward(&self, bindings: &TensorMap<ArrayD<f64>>) -> Result<Vec<ArrayD<f64>>> {
        let mut f = Eager;
        let mut values: Vec<ArrayD<f64>> = Vec::with_capacity(self.len());

        for node in self.nodes() {
            let v = |id: &NodeId| operand(&values, *id);
            let val = match &node.op {
                Op::Placeholder { name } => {
                    let bound = bindings.get(name).ok_or_else(|| {
                        FactorError::config(format!("placeholder '{}' is not bound", name))
                    })?;
                    if bound.shape() != node.shape.as_slice() {
                        return Err(FactorError::shape(bound.shape(), &node.shape));
                    }
                    bound.clone()
                }
                Op::Constant(c) => c.clone(),
                Op::Add(a, b) => f.add(v(a)?, v(b)?)?,
                Op::Sub(a, b) => f.subtract(v(a)?, v(b)?)?,
                Op::Mul(a, b) => f.multiply(v(a)?, v(b)?)?,
                Op::Div(a, b) => f.divide(v(a)?, v(b)?)?,
                Op::Log(a) => f.log(v(a)?)?,
                Op::Sqrt(a) => f.sqrt(v(a)?)?,
                Op::Square(a) => f.square(v(a)?)?,
                Op::SumLastAxis(a) => f.sum_last_axis(v(a)?)?,
                Op::BroadcastTo(a) => f.broadcast_to(v(a)?, &node.shape)?,
                Op::Round { operand: a, dtype } => f.round_to(v(a)?, *dtype)?,
                Op::RandomNormal {
                    generator,
                    dtype,
                    device,
                } => f.random_normal(generator, &node.shape, *dtype, *device)?,
            };
            values.push(val);
        }

        Ok(values)
    }

    /// Bind placeholders, run the graph, and return the requested outputs.
    pub fn evaluate(
        &self,
        bindings: &TensorMap<ArrayD<f64>>,
        outputs: &[Symbol],
    ) -> Result<Vec<ArrayD<f64>>> {
        for s in outputs {
            self.check(s)?;
        }
        log::debug!(
            "executing symbol graph {}: {} nodes, {} bindings, {} outputs",
            self.id(),
            self.len(),
            bindings.len(),
            outputs.len()
        );
        let values = self.forward(bindings)?;
        outputs
            .iter()
            .map(|s| operand(&values, s.id()).cloned())
            .collect()
    }
}
