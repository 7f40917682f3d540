//! The model graph: factor nodes in insertion order.
//!
//! `define_variable` calls append to a [`FactorGraph`]; [`FactorGraph::replicate`]
//! clones the whole model into an independently owned copy, which is how
//! concurrent inference workers get isolated state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use rayon::prelude::*;
use uuid::Uuid;

use crate::distribution::Distribution;
use crate::error::{FactorError, Result};
use crate::factor::{Factor, FactorCore, ReplicationMap};
use crate::function::FunctionEvaluation;
use crate::random::SharedGenerator;
use crate::variable::Variable;

/// Generator identity: the address behind the shared handle.
fn generator_key(g: &SharedGenerator) -> usize {
    Arc::as_ptr(g) as *const () as usize
}

/// Any factor the graph can hold.
#[derive(Debug, Clone)]
pub enum Node {
    Distribution(Distribution),
    Function(FunctionEvaluation),
}

impl Node {
    pub fn as_distribution(&self) -> Option<&Distribution> {
        match self {
            Node::Distribution(d) => Some(d),
            Node::Function(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionEvaluation> {
        match self {
            Node::Function(f) => Some(f),
            Node::Distribution(_) => None,
        }
    }
}

impl Factor for Node {
    fn core(&self) -> &FactorCore {
        match self {
            Node::Distribution(d) => d.core(),
            Node::Function(f) => f.core(),
        }
    }

    fn replicate_self(&self, attribute_map: Option<&ReplicationMap>) -> Result<Self> {
        Ok(match self {
            Node::Distribution(d) => Node::Distribution(d.replicate_self(attribute_map)?),
            Node::Function(f) => Node::Function(f.replicate_self(attribute_map)?),
        })
    }

    fn generate_outputs(&mut self, shapes: &[Vec<usize>]) -> Result<Vec<Variable>> {
        match self {
            Node::Distribution(d) => d.generate_outputs(shapes),
            Node::Function(f) => f.generate_outputs(shapes),
        }
    }
}

impl From<Distribution> for Node {
    fn from(d: Distribution) -> Self {
        Node::Distribution(d)
    }
}

impl From<FunctionEvaluation> for Node {
    fn from(f: FunctionEvaluation) -> Self {
        Node::Function(f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FactorGraph {
    nodes: IndexMap<Uuid, Node>,
    /// Output Variable id -> id of the node producing it.
    producers: HashMap<Uuid, Uuid>,
}

impl FactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `node`. Fails if its id is taken or one of its outputs already
    /// has a producer.
    pub fn insert(&mut self, node: impl Into<Node>) -> Result<Uuid> {
        let node = node.into();
        let id = node.id();
        if self.nodes.contains_key(&id) {
            return Err(FactorError::config(format!("factor {} is already in the graph", id)));
        }
        for v in node.outputs().values() {
            if let Some(other) = self.producers.get(&v.id()) {
                return Err(FactorError::config(format!(
                    "variable {} is already produced by factor {}",
                    v.id(),
                    other
                )));
            }
        }
        for v in node.outputs().values() {
            self.producers.insert(v.id(), id);
        }
        self.nodes.insert(id, node);
        Ok(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node(&self, id: Uuid) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn producer_of(&self, v: &Variable) -> Option<&Node> {
        self.producers.get(&v.id()).and_then(|id| self.nodes.get(id))
    }

    /// Every distinct Variable bound by some node, in first-seen order.
    pub fn variables(&self) -> Vec<Variable> {
        let mut seen = HashSet::new();
        self.nodes
            .values()
            .flat_map(|n| n.core().variables())
            .filter(|v| seen.insert(v.id()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Clone the whole graph.
    ///
    /// Non-constant Variables not mapped by the caller get fresh replicas;
    /// constants are shared. Each node sees only the part of the map it binds.
    /// Every key of `attribute_map` must be bound by some node. Each
    /// distinct generator is forked, so the replica draws its own stream.
    pub fn replicate(&self, attribute_map: Option<&ReplicationMap>) -> Result<FactorGraph> {
        let forks = self.fork_generators()?;
        self.replicate_with(attribute_map, &forks)
    }

    /// `n` independent replicas, built in parallel.
    ///
    /// Generators are forked in replica order before the parallel step, so
    /// equally seeded graphs yield equal replica streams.
    pub fn replicate_many(&self, n: usize) -> Result<Vec<FactorGraph>> {
        let forks = (0..n)
            .map(|_| self.fork_generators())
            .collect::<Result<Vec<_>>>()?;
        forks.par_iter().map(|f| self.replicate_with(None, f)).collect()
    }

    /// One fork per distinct generator, keyed by [`generator_key`].
    fn fork_generators(&self) -> Result<HashMap<usize, SharedGenerator>> {
        let mut forks = HashMap::new();
        for d in self.nodes.values().filter_map(Node::as_distribution) {
            let key = generator_key(d.rand_gen());
            if !forks.contains_key(&key) {
                forks.insert(key, d.rand_gen().fork()?);
            }
        }
        Ok(forks)
    }

    fn replicate_with(
        &self,
        attribute_map: Option<&ReplicationMap>,
        forks: &HashMap<usize, SharedGenerator>,
    ) -> Result<FactorGraph> {
        let vars = self.variables();
        let mut map = attribute_map.cloned().unwrap_or_default();
        if !map.is_empty() {
            let bound: HashSet<Uuid> = vars.iter().map(Variable::id).collect();
            if let Some(stray) = map.originals().find(|id| !bound.contains(id)) {
                return Err(FactorError::replication(format!(
                    "attribute map references variable {} which no factor in the graph binds",
                    stray
                )));
            }
        }
        for v in &vars {
            if !v.is_constant() && !map.contains(v) {
                map.insert(v, v.replicate());
            }
        }

        let mut out = FactorGraph::new();
        for node in self.nodes.values() {
            let local = map.restrict_to(node.core());
            let replica = match node {
                Node::Distribution(d) => {
                    let fork = forks
                        .get(&generator_key(d.rand_gen()))
                        .cloned()
                        .ok_or_else(|| {
                            FactorError::replication(format!(
                                "no forked generator for factor {}",
                                d.id()
                            ))
                        })?;
                    Node::Distribution(d.replicate_self(Some(&local))?.with_rand_gen(fork))
                }
                Node::Function(f) => Node::Function(f.replicate_self(Some(&local))?),
            };
            out.insert(replica)?;
        }
        log::debug!(
            "replicated factor graph: {} nodes, {} variables remapped, {} generators forked",
            out.len(),
            map.len(),
            forks.len()
        );
        Ok(out)
    }
}
