//! The per-run deployment context.
//!
//! A [`Deployment`] owns everything one provisioning run needs: the declared
//! resource nodes, the registry of minted output handles, and the export
//! store. It is an explicit, passed-around object — never a process-wide
//! singleton — so runs can be concurrent, repeated, and tested in isolation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::dag::validate;
use crate::deferred::Deferred;
use crate::error::{EngineError, NodeFailure};
use crate::exports::ExportStore;
use crate::graph::DependencyGraph;
use crate::models::{FieldValue, ResourceNode};

type OutputRegistry = Arc<Mutex<HashMap<(String, String), Deferred>>>;

/// A declaration context for one provisioning run.
#[derive(Debug, Default)]
pub struct Deployment {
    nodes: Vec<ResourceNode>,
    outputs: OutputRegistry,
    exports: ExportStore,
}

/// A handle to a declared (or about-to-be-declared) resource, used to mint
/// deferred references to its output fields.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    name: String,
    outputs: OutputRegistry,
}

impl ResourceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A deferred reference to this resource's named output field.
    ///
    /// Handles are registry-backed: every handle minted for the same
    /// `(resource, field)` pair shares one deferred, so the executor settles
    /// all of them at once.
    pub fn output(&self, field: &str) -> Deferred {
        let mut outputs = self.outputs.lock().unwrap();
        outputs
            .entry((self.name.clone(), field.to_string()))
            .or_insert_with(|| Deferred::produced_by(&self.name))
            .clone()
    }
}

impl Deployment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource and return a handle to its outputs.
    ///
    /// Declaration order is preserved for reporting; it does not constrain
    /// execution order.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        kind: impl Into<String>,
        fields: impl IntoIterator<Item = (String, FieldValue)>,
    ) -> ResourceHandle {
        let node = ResourceNode::new(name, kind, fields);
        let handle = self.handle(node.name.as_str());
        self.nodes.push(node);
        handle
    }

    /// A handle for `name`, whether or not it has been declared yet.
    ///
    /// Useful for forward references; validation catches handles whose
    /// resource is never declared.
    pub fn handle(&self, name: impl Into<String>) -> ResourceHandle {
        ResourceHandle {
            name: name.into(),
            outputs: Arc::clone(&self.outputs),
        }
    }

    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Record a named export.
    pub fn export(&mut self, name: impl Into<String>, value: Deferred) {
        self.exports.export(name, value);
    }

    pub fn exports(&self) -> &ExportStore {
        &self.exports
    }

    /// Collect all exports as literal values (see [`ExportStore::collect`]).
    pub fn collect_exports(&self) -> Result<BTreeMap<String, Value>, EngineError> {
        self.exports.collect()
    }

    /// Validate the declared resources and return the dependency graph.
    pub fn validate(&self) -> Result<DependencyGraph, EngineError> {
        validate(&self.nodes)
    }

    /// Settle every output handle minted for `name` from an apply result.
    ///
    /// On success, each declared output resolves with the matching returned
    /// field, or rejects with `MissingOutput` if the provider did not return
    /// it. On failure, every output rejects with the node's failure.
    pub(crate) fn settle_outputs(&self, name: &str, result: &Result<provider::Outputs, NodeFailure>) {
        // Snapshot under the lock, settle outside it: a continuation may mint
        // further handles through this same registry.
        let minted: Vec<(String, Deferred)> = {
            let outputs = self.outputs.lock().unwrap();
            outputs
                .iter()
                .filter(|((node, _), _)| node == name)
                .map(|((_, field), deferred)| (field.clone(), deferred.clone()))
                .collect()
        };

        for (field, deferred) in minted {
            let _ = match result {
                Ok(values) => match values.get(&field) {
                    Some(value) => deferred.resolve(value.clone()),
                    None => deferred.reject(NodeFailure::MissingOutput {
                        node: name.to_string(),
                        field,
                    }),
                },
                Err(failure) => deferred.reject(failure.clone()),
            };
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_handles_for_the_same_field_share_one_deferred() {
        let mut deployment = Deployment::new();
        let vnet = deployment.declare("vnet", "azure/virtualNetwork", Vec::new());

        let first = vnet.output("id");
        let second = deployment.handle("vnet").output("id");

        first.resolve(json!("vnet-id")).unwrap();
        assert_eq!(second.try_result(), Some(Ok(json!("vnet-id"))));
    }

    #[test]
    fn settle_outputs_resolves_returned_fields_and_rejects_missing_ones() {
        let mut deployment = Deployment::new();
        let ip = deployment.declare("publicIP", "azure/publicIPAddress", Vec::new());
        let address = ip.output("ip_address");
        let missing = ip.output("fqdn");

        let mut outputs = provider::Outputs::new();
        outputs.insert("ip_address".into(), json!("203.0.113.9"));
        deployment.settle_outputs("publicIP", &Ok(outputs));

        assert_eq!(address.try_result(), Some(Ok(json!("203.0.113.9"))));
        assert!(matches!(
            missing.try_result(),
            Some(Err(NodeFailure::MissingOutput { field, .. })) if field == "fqdn"
        ));
    }

    #[test]
    fn settle_outputs_on_failure_rejects_every_handle() {
        let mut deployment = Deployment::new();
        let vm = deployment.declare("vm1", "azure/virtualMachine", Vec::new());
        let id = vm.output("id");

        deployment.settle_outputs("vm1", &Err(NodeFailure::Cancelled));
        assert_eq!(id.try_result(), Some(Err(NodeFailure::Cancelled)));
    }

    #[test]
    fn forward_handles_validate_once_declared() {
        let mut deployment = Deployment::new();
        let subnet = deployment.handle("subnet");
        deployment.declare(
            "nic",
            "azure/networkInterface",
            vec![("subnet_id".to_string(), subnet.output("id").into())],
        );
        deployment.declare("subnet", "azure/subnet", Vec::new());

        let graph = deployment.validate().expect("forward reference is fine");
        assert!(graph.contains_edge("subnet", "nic"));
    }
}
