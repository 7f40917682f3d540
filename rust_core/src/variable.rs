//! Graph edges: typed, named, uniquely identified placeholders.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ndarray::{ArrayD, IxDyn};
use uuid::Uuid;

/// Role a Variable plays in a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    /// Holds a fixed value.
    Constant,
    /// Free input resolved by the graph (e.g. a learnable parameter).
    Parameter,
    /// Output of a distribution node.
    Random,
    /// Output of a deterministic function node.
    Function,
}

#[derive(Debug)]
struct VariableData {
    id: Uuid,
    name: Option<String>,
    kind: VariableKind,
    value: Option<ArrayD<f64>>,
    shape: Option<Vec<usize>>,
}

/// A graph edge shared by reference between factors.
///
/// Cloning a `Variable` clones the handle, not the edge: both handles have
/// the same id. Equality and hashing are by id, never by value.
#[derive(Clone)]
pub struct Variable {
    inner: Arc<VariableData>,
}

impl Variable {
    fn build(
        name: Option<String>,
        kind: VariableKind,
        value: Option<ArrayD<f64>>,
        shape: Option<Vec<usize>>,
    ) -> Self {
        Self {
            inner: Arc::new(VariableData {
                id: Uuid::new_v4(),
                name,
                kind,
                value,
                shape,
            }),
        }
    }

    /// A constant holding `value`; its shape is the value's shape.
    pub fn constant(value: ArrayD<f64>) -> Self {
        let shape = value.shape().to_vec();
        Self::build(None, VariableKind::Constant, Some(value), Some(shape))
    }

    /// A named constant.
    pub fn named_constant(name: impl Into<String>, value: ArrayD<f64>) -> Self {
        let shape = value.shape().to_vec();
        Self::build(Some(name.into()), VariableKind::Constant, Some(value), Some(shape))
    }

    /// A 0-dimensional constant.
    pub fn scalar(value: f64) -> Self {
        Self::constant(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// A free parameter, resolved later by whoever evaluates the graph.
    pub fn parameter(name: impl Into<String>, shape: Option<Vec<usize>>) -> Self {
        Self::build(Some(name.into()), VariableKind::Parameter, None, shape)
    }

    /// Output slot of a distribution node.
    pub fn random(name: Option<String>, shape: Vec<usize>) -> Self {
        Self::build(name, VariableKind::Random, None, Some(shape))
    }

    /// Output slot of a function node.
    pub fn function_output(name: Option<String>, shape: Vec<usize>) -> Self {
        Self::build(name, VariableKind::Function, None, Some(shape))
    }

    /// A new edge with a fresh id and the same name, kind, value and shape.
    pub fn replicate(&self) -> Self {
        Self::build(
            self.inner.name.clone(),
            self.inner.kind,
            self.inner.value.clone(),
            self.inner.shape.clone(),
        )
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn kind(&self) -> VariableKind {
        self.inner.kind
    }

    pub fn value(&self) -> Option<&ArrayD<f64>> {
        self.inner.value.as_ref()
    }

    pub fn shape(&self) -> Option<&[usize]> {
        self.inner.shape.as_deref()
    }

    pub fn is_constant(&self) -> bool {
        self.inner.value.is_some()
    }

    /// True when both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Variable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("shape", &self.inner.shape)
            .finish()
    }
}
