//! Factor nodes: named input/output bindings, identity, and replication.
//!
//! A factor owns no Variables. It references them by handle, so the same
//! Variable may be bound by many factors. Replication builds a new node with a
//! fresh id whose bindings are either the original handles or their images
//! under a [`ReplicationMap`].

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::error::{FactorError, Result};
use crate::variable::{Variable, VariableKind};

/// Ordered name -> Variable bindings.
pub type VariableMap = IndexMap<String, Variable>;

/// Original Variable -> replacement Variable, keyed by the original's id.
#[derive(Debug, Clone, Default)]
pub struct ReplicationMap {
    entries: HashMap<Uuid, Variable>,
}

impl ReplicationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `original` to `replacement`; returns the previous replacement, if any.
    pub fn insert(&mut self, original: &Variable, replacement: Variable) -> Option<Variable> {
        self.entries.insert(original.id(), replacement)
    }

    pub fn get(&self, original: &Variable) -> Option<&Variable> {
        self.entries.get(&original.id())
    }

    pub fn contains(&self, original: &Variable) -> bool {
        self.entries.contains_key(&original.id())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of the mapped originals.
    pub fn originals(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.entries.keys().copied()
    }

    /// The image of `v`, or `v` itself when it is not remapped.
    pub fn resolve(&self, v: &Variable) -> Variable {
        self.get(v).cloned().unwrap_or_else(|| v.clone())
    }

    /// Only the entries whose originals `core` binds.
    pub fn restrict_to(&self, core: &FactorCore) -> ReplicationMap {
        let entries = core
            .variables()
            .filter_map(|v| self.entries.get(&v.id()).map(|r| (v.id(), r.clone())))
            .collect();
        ReplicationMap { entries }
    }
}

fn check_unique(names: &[String], what: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for n in names {
        if !seen.insert(n.as_str()) {
            return Err(FactorError::config(format!("duplicate {} name '{}'", what, n)));
        }
    }
    Ok(())
}

fn bind(supplied: Vec<(String, Variable)>, names: &[String], what: &str) -> Result<VariableMap> {
    let mut by_name: HashMap<String, Variable> = HashMap::with_capacity(supplied.len());
    for (name, var) in supplied {
        if !names.contains(&name) {
            return Err(FactorError::config(format!(
                "unexpected {} '{}' (declared: {:?})",
                what, name, names
            )));
        }
        if by_name.insert(name.clone(), var).is_some() {
            return Err(FactorError::config(format!("{} '{}' supplied twice", what, name)));
        }
    }
    names
        .iter()
        .map(|n| {
            by_name
                .remove(n)
                .map(|v| (n.clone(), v))
                .ok_or_else(|| FactorError::config(format!("missing {} '{}'", what, n)))
        })
        .collect()
}

/// State shared by every factor kind.
///
/// `input_names`/`output_names` are fixed at construction. `inputs` always
/// binds exactly `input_names`; `outputs` is either empty (not yet
/// materialized) or binds exactly `output_names`.
#[derive(Debug, Clone)]
pub struct FactorCore {
    id: Uuid,
    name: Option<String>,
    inputs: VariableMap,
    outputs: VariableMap,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl FactorCore {
    pub fn new(
        inputs: Vec<(String, Variable)>,
        outputs: Option<Vec<(String, Variable)>>,
        input_names: Vec<String>,
        output_names: Vec<String>,
    ) -> Result<Self> {
        check_unique(&input_names, "input")?;
        check_unique(&output_names, "output")?;
        let inputs = bind(inputs, &input_names, "input")?;
        let outputs = match outputs {
            Some(outputs) => bind(outputs, &output_names, "output")?,
            None => VariableMap::new(),
        };
        let core = Self {
            id: Uuid::new_v4(),
            name: None,
            inputs,
            outputs,
            input_names,
            output_names,
        };
        log::debug!(
            "created factor {} (inputs {:?}, outputs {:?})",
            core.id,
            core.input_names,
            core.output_names
        );
        Ok(core)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn inputs(&self) -> &VariableMap {
        &self.inputs
    }

    pub fn outputs(&self) -> &VariableMap {
        &self.outputs
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn input(&self, name: &str) -> Option<&Variable> {
        self.inputs.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&Variable> {
        self.outputs.get(name)
    }

    pub fn is_materialized(&self) -> bool {
        !self.outputs.is_empty()
    }

    /// Inputs followed by outputs.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.inputs.values().chain(self.outputs.values())
    }

    pub fn binds(&self, v: &Variable) -> bool {
        self.variables().any(|b| b == v)
    }

    /// Create one output Variable per output name with the given shapes.
    ///
    /// Fails with [`FactorError::DoubleMaterialization`] if outputs exist.
    pub fn generate_outputs(
        &mut self,
        shapes: &[Vec<usize>],
        kind: VariableKind,
    ) -> Result<Vec<Variable>> {
        if self.is_materialized() {
            return Err(FactorError::DoubleMaterialization { factor: self.id });
        }
        if shapes.len() != self.output_names.len() {
            return Err(FactorError::config(format!(
                "factor {} declares {} outputs but {} shapes were given",
                self.id,
                self.output_names.len(),
                shapes.len()
            )));
        }
        let created: Vec<Variable> = shapes
            .iter()
            .map(|shape| match kind {
                VariableKind::Function => Variable::function_output(self.name.clone(), shape.clone()),
                _ => Variable::random(self.name.clone(), shape.clone()),
            })
            .collect();
        self.outputs = self
            .output_names
            .iter()
            .cloned()
            .zip(created.iter().cloned())
            .collect();
        log::debug!("materialized outputs of factor {}: {:?}", self.id, shapes);
        Ok(created)
    }

    /// Copy of this core with a fresh id and bindings remapped by `attribute_map`.
    ///
    /// A Variable bound both as input and output is replaced at both sites.
    /// Every key of `attribute_map` must be bound by this node.
    pub fn replicate(&self, attribute_map: Option<&ReplicationMap>) -> Result<FactorCore> {
        let empty = ReplicationMap::new();
        let map = attribute_map.unwrap_or(&empty);
        if !map.is_empty() {
            let bound: HashSet<Uuid> = self.variables().map(Variable::id).collect();
            if let Some(stray) = map.entries.keys().find(|id| !bound.contains(id)) {
                return Err(FactorError::replication(format!(
                    "attribute map references variable {} which factor {} does not bind",
                    stray, self.id
                )));
            }
        }
        let remap = |vars: &VariableMap| -> VariableMap {
            vars.iter()
                .map(|(k, v)| (k.clone(), map.resolve(v)))
                .collect()
        };
        let replica = FactorCore {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            inputs: remap(&self.inputs),
            outputs: remap(&self.outputs),
            input_names: self.input_names.clone(),
            output_names: self.output_names.clone(),
        };
        self.check_replica(&replica)?;
        log::debug!(
            "replicated factor {} -> {} ({} remapped)",
            self.id,
            replica.id,
            map.len()
        );
        Ok(replica)
    }

    /// Verify that `replica` carries this node's full binding contract.
    pub fn check_replica(&self, replica: &FactorCore) -> Result<()> {
        if replica.id == self.id {
            return Err(FactorError::replication(format!(
                "replica of {} reuses its id",
                self.id
            )));
        }
        if replica.input_names != self.input_names || replica.output_names != self.output_names {
            return Err(FactorError::replication(format!(
                "replica of {} changed its input/output names",
                self.id
            )));
        }
        let same_keys = |a: &VariableMap, b: &VariableMap| a.keys().eq(b.keys());
        if !same_keys(&replica.inputs, &self.inputs) || !same_keys(&replica.outputs, &self.outputs) {
            return Err(FactorError::replication(format!(
                "replica of {} dropped or added bindings",
                self.id
            )));
        }
        Ok(())
    }
}

/// A node in the model graph.
pub trait Factor: Send + Sync {
    fn core(&self) -> &FactorCore;

    /// Clone this node with a fresh id, remapping bindings through
    /// `attribute_map` and copying all node-specific configuration.
    fn replicate_self(&self, attribute_map: Option<&ReplicationMap>) -> Result<Self>
    where
        Self: Sized;

    /// Materialize output Variables of the given shapes.
    fn generate_outputs(&mut self, shapes: &[Vec<usize>]) -> Result<Vec<Variable>>;

    fn id(&self) -> Uuid {
        self.core().id()
    }

    fn name(&self) -> Option<&str> {
        self.core().name()
    }

    fn inputs(&self) -> &VariableMap {
        self.core().inputs()
    }

    fn outputs(&self) -> &VariableMap {
        self.core().outputs()
    }

    fn input_names(&self) -> &[String] {
        self.core().input_names()
    }

    fn output_names(&self) -> &[String] {
        self.core().output_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(ns: &[&str]) -> Vec<String> {
        ns.iter().map(|s| s.to_string()).collect()
    }

    fn two_input_core() -> (FactorCore, Variable, Variable) {
        let a = Variable::scalar(1.0);
        let b = Variable::parameter("b", Some(vec![]));
        let core = FactorCore::new(
            vec![("a".into(), a.clone()), ("b".into(), b.clone())],
            None,
            names(&["a", "b"]),
            names(&["out"]),
        )
        .unwrap();
        (core, a, b)
    }

    #[test]
    fn test_inputs_follow_declared_order() {
        let a = Variable::scalar(1.0);
        let b = Variable::scalar(2.0);
        let core = FactorCore::new(
            vec![("b".into(), b), ("a".into(), a)],
            None,
            names(&["a", "b"]),
            names(&["out"]),
        )
        .unwrap();
        let keys: Vec<_> = core.inputs().keys().cloned().collect();
        assert_eq!(keys, names(&["a", "b"]));
    }

    #[test]
    fn test_missing_and_unexpected_inputs() {
        let a = Variable::scalar(1.0);
        let missing = FactorCore::new(
            vec![("a".into(), a.clone())],
            None,
            names(&["a", "b"]),
            names(&["out"]),
        );
        assert!(matches!(missing, Err(FactorError::Configuration(_))));

        let extra = FactorCore::new(
            vec![("a".into(), a.clone()), ("z".into(), a)],
            None,
            names(&["a"]),
            names(&["out"]),
        );
        assert!(matches!(extra, Err(FactorError::Configuration(_))));
    }

    #[test]
    fn test_duplicate_declared_names() {
        let a = Variable::scalar(1.0);
        let dup = FactorCore::new(
            vec![("a".into(), a)],
            None,
            names(&["a", "a"]),
            names(&["out"]),
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_outputs_supplied_up_front_are_validated() {
        let a = Variable::scalar(1.0);
        let out = Variable::random(None, vec![]);
        let core = FactorCore::new(
            vec![("a".into(), a.clone())],
            Some(vec![("out".into(), out.clone())]),
            names(&["a"]),
            names(&["out"]),
        )
        .unwrap();
        assert!(core.is_materialized());
        assert_eq!(core.output("out"), Some(&out));

        let wrong = FactorCore::new(
            vec![("a".into(), a)],
            Some(vec![("result".into(), out)]),
            names(&["a"]),
            names(&["out"]),
        );
        assert!(wrong.is_err());
    }

    #[test]
    fn test_generate_outputs_once() {
        let (mut core, _, _) = two_input_core();
        let outs = core.generate_outputs(&[vec![2, 3]], VariableKind::Random).unwrap();
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].shape(), Some(&[2usize, 3][..]));
        assert_eq!(core.output("out"), Some(&outs[0]));

        let again = core.generate_outputs(&[vec![2, 3]], VariableKind::Random);
        assert_eq!(
            again.unwrap_err(),
            FactorError::DoubleMaterialization { factor: core.id() }
        );
        assert_eq!(core.output("out"), Some(&outs[0]));
    }

    #[test]
    fn test_generate_outputs_arity() {
        let (mut core, _, _) = two_input_core();
        assert!(core.generate_outputs(&[], VariableKind::Random).is_err());
        assert!(!core.is_materialized());
    }

    #[test]
    fn test_replicate_shares_unmapped_variables() {
        let (core, a, b) = two_input_core();
        let replica = core.replicate(None).unwrap();
        assert_ne!(replica.id(), core.id());
        assert_eq!(replica.input_names(), core.input_names());
        assert!(replica.input("a").unwrap().ptr_eq(&a));
        assert!(replica.input("b").unwrap().ptr_eq(&b));
    }

    #[test]
    fn test_replicate_uses_replacements() {
        let (core, a, b) = two_input_core();
        let b2 = b.replicate();
        let mut map = ReplicationMap::new();
        map.insert(&b, b2.clone());
        let replica = core.replicate(Some(&map)).unwrap();
        assert!(replica.input("a").unwrap().ptr_eq(&a));
        assert_eq!(replica.input("b"), Some(&b2));
    }

    #[test]
    fn test_replicate_rejects_foreign_keys() {
        let (core, _, _) = two_input_core();
        let stranger = Variable::scalar(0.0);
        let mut map = ReplicationMap::new();
        map.insert(&stranger, Variable::scalar(1.0));
        let err = core.replicate(Some(&map)).unwrap_err();
        assert!(matches!(err, FactorError::Replication(_)));
    }

    #[test]
    fn test_self_referential_binding_replaced_consistently() {
        let shared = Variable::parameter("loop", Some(vec![]));
        let core = FactorCore::new(
            vec![("x".into(), shared.clone())],
            Some(vec![("y".into(), shared.clone())]),
            names(&["x"]),
            names(&["y"]),
        )
        .unwrap();
        let fresh = shared.replicate();
        let mut map = ReplicationMap::new();
        map.insert(&shared, fresh.clone());
        let replica = core.replicate(Some(&map)).unwrap();
        assert_eq!(replica.input("x"), Some(&fresh));
        assert_eq!(replica.output("y"), Some(&fresh));
    }

    #[test]
    fn test_restrict_to_keeps_only_bound_entries() {
        let (core, a, _) = two_input_core();
        let other = Variable::scalar(5.0);
        let mut map = ReplicationMap::new();
        map.insert(&a, Variable::scalar(1.0));
        map.insert(&other, Variable::scalar(5.0));
        let restricted = map.restrict_to(&core);
        assert_eq!(restricted.len(), 1);
        assert!(restricted.contains(&a));
        assert!(core.replicate(Some(&restricted)).is_ok());
    }

    #[test]
    fn test_check_replica_detects_contract_drift() {
        let (core, _, _) = two_input_core();
        let mut replica = core.replicate(None).unwrap();
        replica.output_names.push("extra".into());
        assert!(matches!(
            core.check_replica(&replica),
            Err(FactorError::Replication(_))
        ));
        assert!(core.check_replica(&core).is_err());
    }
}
