//! Dependency graph construction.
//!
//! Edges are not declared by the user — they are *discovered* by inspecting
//! each node's deferred fields. A deferred value knows which resources
//! produce it (its provenance, unioned through `map`/`combine`), so every
//! provenance entry yields one `producer -> dependent` edge, deduplicated.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::EngineError;
use crate::models::{FieldValue, ResourceNode};

/// The discovered dependency graph over a set of resource nodes.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Node names in declaration order.
    names: Vec<String>,
    /// `(producer, dependent)` pairs, deduplicated.
    edges: BTreeSet<(String, String)>,
}

impl DependencyGraph {
    /// Inspect every node's fields and derive the edge set.
    ///
    /// # Errors
    /// [`EngineError::DanglingReference`] if a deferred field traces to a
    /// resource not present in `nodes`; [`EngineError::UnproducedField`] if a
    /// still-pending deferred field has no provenance at all — nothing would
    /// ever settle it, and its node would wait forever.
    pub fn build(nodes: &[ResourceNode]) -> Result<Self, EngineError> {
        let declared: HashSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        let mut edges = BTreeSet::new();

        for node in nodes {
            for (field, value) in &node.fields {
                let FieldValue::Deferred(deferred) = value else {
                    continue;
                };
                if deferred.sources().is_empty() && !deferred.is_settled() {
                    return Err(EngineError::UnproducedField {
                        node: node.name.clone(),
                        field: field.clone(),
                    });
                }
                for producer in deferred.sources() {
                    if !declared.contains(producer.as_str()) {
                        return Err(EngineError::DanglingReference {
                            node: node.name.clone(),
                            field: field.clone(),
                            missing: producer.clone(),
                        });
                    }
                    edges.insert((producer.clone(), node.name.clone()));
                }
            }
        }

        Ok(Self {
            names: nodes.iter().map(|n| n.name.clone()).collect(),
            edges,
        })
    }

    /// Node names in declaration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// All `(producer, dependent)` edges, sorted.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.edges.iter().map(|(from, to)| (from.as_str(), to.as_str()))
    }

    pub fn contains_edge(&self, producer: &str, dependent: &str) -> bool {
        self.edges
            .contains(&(producer.to_string(), dependent.to_string()))
    }

    /// Names of the nodes that directly depend on `name`, sorted.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(from, _)| from == name)
            .map(|(_, to)| to.as_str())
            .collect()
    }

    /// Number of required predecessors per node.
    pub fn in_degrees(&self) -> BTreeMap<String, usize> {
        let mut degrees: BTreeMap<String, usize> =
            self.names.iter().map(|n| (n.clone(), 0)).collect();
        for (_, to) in &self.edges {
            if let Some(degree) = degrees.get_mut(to) {
                *degree += 1;
            }
        }
        degrees
    }
}
