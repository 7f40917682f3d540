use std::collections::HashMap;

use ndarray::ArrayD;
use uuid::Uuid;

use super::{broadcast_shapes, ComputeBackend, ComputeMode};
use crate::config::{DType, Device};
use crate::error::{FactorError, Result};
use crate::random::SharedGenerator;

/// Unique identifier for a node in a symbol graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// Operations recorded by the symbolic backend.
#[derive(Debug, Clone)]
pub enum Op {
    /// Free input, bound by name at execution time.
    Placeholder { name: String },
    /// A concrete value baked into the graph.
    Constant(ArrayD<f64>),
    Add(NodeId, NodeId),
    Sub(NodeId, NodeId),
    Mul(NodeId, NodeId),
    Div(NodeId, NodeId),
    Log(NodeId),
    Sqrt(NodeId),
    Square(NodeId),
    SumLastAxis(NodeId),
    /// Broadcast the operand to this node's shape.
    BroadcastTo(NodeId),
    /// Round the operand to `dtype` precision.
    Round { operand: NodeId, dtype: DType },
    /// Standard-normal draw of this node's shape, taken when the graph runs.
    RandomNormal {
        generator: SharedGenerator,
        dtype: DType,
        device: Device,
    },
}

/// A single node in the symbol graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub op: Op,
    /// Statically known output shape.
    pub shape: Vec<usize>,
}

/// Handle to a deferred value: the owning graph, the node it refers to, and
/// its static shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    graph: Uuid,
    id: NodeId,
    shape: Vec<usize>,
}

impl Symbol {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Id of the graph this symbol was recorded into.
    pub fn graph(&self) -> Uuid {
        self.graph
    }
}

/// A deferred computation.
///
/// Stores nodes in topological order (each node only references earlier
/// nodes), so the executor can evaluate it in a single forward pass.
#[derive(Debug, Clone)]
pub struct SymbolGraph {
    id: Uuid,
    nodes: Vec<Node>,
    name_to_node: HashMap<String, NodeId>,
}

impl Default for SymbolGraph {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            nodes: Vec::new(),
            name_to_node: HashMap::new(),
        }
    }
}

impl SymbolGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Nodes in topological order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn add_node(&mut self, op: Op, shape: Vec<usize>) -> Symbol {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            op,
            shape: shape.clone(),
        });
        Symbol {
            graph: self.id,
            id,
            shape,
        }
    }

    pub(crate) fn check(&self, s: &Symbol) -> Result<()> {
        if s.graph != self.id {
            return Err(FactorError::config(format!(
                "symbol {:?} was recorded into graph {}, not {}",
                s.id, s.graph, self.id
            )));
        }
        match self.nodes.get(s.id.0) {
            Some(node) if node.shape == s.shape => Ok(()),
            _ => Err(FactorError::config(format!(
                "symbol {:?} does not belong to this graph",
                s.id
            ))),
        }
    }

    pub fn placeholder(&mut self, name: &str, shape: Vec<usize>) -> Result<Symbol> {
        if self.name_to_node.contains_key(name) {
            return Err(FactorError::config(format!(
                "placeholder '{}' is already declared",
                name
            )));
        }
        let sym = self.add_node(
            Op::Placeholder {
                name: name.to_string(),
            },
            shape,
        );
        self.name_to_node.insert(name.to_string(), sym.id);
        Ok(sym)
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.name_to_node.get(name).copied()
    }

    /// Names and declared shapes of all placeholders, in declaration order.
    pub fn placeholders(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.nodes.iter().filter_map(|n| match &n.op {
            Op::Placeholder { name } => Some((name.as_str(), n.shape.as_slice())),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn binary(&mut self, a: &Symbol, b: &Symbol, make: fn(NodeId, NodeId) -> Op) -> Result<Symbol> {
        self.check(a)?;
        self.check(b)?;
        let shape = broadcast_shapes(&a.shape, &b.shape)?;
        Ok(self.add_node(make(a.id, b.id), shape))
    }

    fn unary(&mut self, a: &Symbol, make: fn(NodeId) -> Op) -> Result<Symbol> {
        self.check(a)?;
        Ok(self.add_node(make(a.id), a.shape.clone()))
    }
}

/// Backend that records operations instead of evaluating them.
///
/// Shapes are propagated statically so broadcasting errors surface while the
/// graph is built, exactly where the eager backend would raise them.
#[derive(Debug, Default)]
pub struct Symbolic {
    graph: SymbolGraph,
}

impl Symbolic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a free input bound by `name` when the graph is evaluated.
    pub fn placeholder(&mut self, name: &str, shape: Vec<usize>) -> Result<Symbol> {
        self.graph.placeholder(name, shape)
    }

    /// Embed a concrete value.
    pub fn constant_array(&mut self, value: ArrayD<f64>) -> Symbol {
        let shape = value.shape().to_vec();
        self.graph.add_node(Op::Constant(value), shape)
    }

    pub fn graph(&self) -> &SymbolGraph {
        &self.graph
    }

    pub fn into_graph(self) -> SymbolGraph {
        self.graph
    }
}

impl ComputeBackend for Symbolic {
    type Tensor = Symbol;

    fn mode(&self) -> ComputeMode {
        ComputeMode::Symbolic
    }

    fn shape(&self, t: &Symbol) -> Vec<usize> {
        t.shape.clone()
    }

    fn constant(&mut self, value: f64) -> Symbol {
        self.constant_array(ArrayD::from_elem(ndarray::IxDyn(&[]), value))
    }

    fn add(&mut self, a: &Symbol, b: &Symbol) -> Result<Symbol> {
        self.graph.binary(a, b, Op::Add)
    }

    fn subtract(&mut self, a: &Symbol, b: &Symbol) -> Result<Symbol> {
        self.graph.binary(a, b, Op::Sub)
    }

    fn multiply(&mut self, a: &Symbol, b: &Symbol) -> Result<Symbol> {
        self.graph.binary(a, b, Op::Mul)
    }

    fn divide(&mut self, a: &Symbol, b: &Symbol) -> Result<Symbol> {
        self.graph.binary(a, b, Op::Div)
    }

    fn log(&mut self, a: &Symbol) -> Result<Symbol> {
        self.graph.unary(a, Op::Log)
    }

    fn sqrt(&mut self, a: &Symbol) -> Result<Symbol> {
        self.graph.unary(a, Op::Sqrt)
    }

    fn square(&mut self, a: &Symbol) -> Result<Symbol> {
        self.graph.unary(a, Op::Square)
    }

    fn sum_last_axis(&mut self, a: &Symbol) -> Result<Symbol> {
        self.graph.check(a)?;
        let Some((_, leading)) = a.shape.split_last() else {
            return Err(FactorError::config("cannot sum the last axis of a 0-d tensor"));
        };
        let shape = leading.to_vec();
        Ok(self.graph.add_node(Op::SumLastAxis(a.id), shape))
    }

    fn broadcast_to(&mut self, a: &Symbol, shape: &[usize]) -> Result<Symbol> {
        self.graph.check(a)?;
        let target = broadcast_shapes(&a.shape, shape)?;
        if target != shape {
            return Err(FactorError::shape(&a.shape, shape));
        }
        Ok(self.graph.add_node(Op::BroadcastTo(a.id), target))
    }

    fn round_to(&mut self, a: &Symbol, dtype: DType) -> Result<Symbol> {
        self.graph.check(a)?;
        Ok(self.graph.add_node(
            Op::Round {
                operand: a.id,
                dtype,
            },
            a.shape.clone(),
        ))
    }

    fn random_normal(
        &mut self,
        generator: &SharedGenerator,
        shape: &[usize],
        dtype: DType,
        device: Device,
    ) -> Result<Symbol> {
        if device != Device::Cpu {
            return Err(FactorError::config(format!(
                "symbolic graphs execute on cpu, got {}",
                device
            )));
        }
        Ok(self.graph.add_node(
            Op::RandomNormal {
                generator: generator.clone(),
                dtype,
                device,
            },
            shape.to_vec(),
        ))
    }
}
