//! Topology manifests — the declarative JSON surface over the engine.
//!
//! A manifest lists resources and exports. Any string value may embed
//! `${resource.field}` references to other resources' outputs:
//!
//! - a whole-string reference (`"${subnet.id}"`) lowers to that output's
//!   deferred value, preserving its type;
//! - embedded references (`"/subscriptions/${cfg.subscription_id}/..."`)
//!   lower to a `combine` over all referenced outputs that renders the
//!   string once they resolve;
//! - references may sit anywhere inside nested objects and arrays; the
//!   whole field then lowers to one combine that substitutes resolved
//!   values back into the subtree.
//!
//! References to never-declared resources fail at load time.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::deferred::Deferred;
use crate::deployment::{Deployment, ResourceHandle};
use crate::error::EngineError;
use crate::models::FieldValue;

/// A parsed topology manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    /// Display name of the topology.
    #[serde(default)]
    pub name: Option<String>,
    pub resources: Vec<ResourceDecl>,
    /// Export name -> value template (usually a reference string).
    #[serde(default)]
    pub exports: BTreeMap<String, Value>,
}

/// A single resource declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDecl {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Manifest {
    /// Parse a manifest from JSON text.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Lower the manifest into a [`Deployment`], turning `${...}` references
    /// into deferred fields.
    ///
    /// # Errors
    /// [`EngineError::DanglingReference`] for references to undeclared
    /// resources, [`EngineError::MalformedReference`] for placeholders that
    /// do not name a `resource.field` pair. Duplicate names and cycles are
    /// left to plan validation.
    pub fn into_deployment(self) -> Result<Deployment, EngineError> {
        let mut deployment = Deployment::new();

        // Mint handles up front so references may point forward.
        let handles: HashMap<String, ResourceHandle> = self
            .resources
            .iter()
            .map(|decl| (decl.name.clone(), deployment.handle(decl.name.as_str())))
            .collect();

        for decl in &self.resources {
            let mut fields = Vec::with_capacity(decl.fields.len());
            for (field, value) in &decl.fields {
                fields.push((
                    field.clone(),
                    lower_value(value, &handles, &decl.name, field)?,
                ));
            }
            deployment.declare(decl.name.clone(), decl.kind.clone(), fields);
        }

        for (name, template) in &self.exports {
            match lower_value(template, &handles, "exports", name)? {
                FieldValue::Literal(value) => deployment.export(name, Deferred::resolved(value)),
                FieldValue::Deferred(deferred) => deployment.export(name, deferred),
            }
        }

        Ok(deployment)
    }
}

/// Lower one manifest value into a field value.
fn lower_value(
    value: &Value,
    handles: &HashMap<String, ResourceHandle>,
    node: &str,
    field: &str,
) -> Result<FieldValue, EngineError> {
    let mut refs: Vec<String> = Vec::new();
    collect_refs(value, &mut refs, node, field)?;
    if refs.is_empty() {
        return Ok(FieldValue::Literal(value.clone()));
    }

    let mut deferreds = Vec::with_capacity(refs.len());
    for key in &refs {
        // Keys are "resource.field"; both halves are non-empty by construction.
        let (target, output) = key.split_once('.').unwrap_or((key.as_str(), ""));
        let handle = handles
            .get(target)
            .ok_or_else(|| EngineError::DanglingReference {
                node: node.to_string(),
                field: field.to_string(),
                missing: target.to_string(),
            })?;
        deferreds.push(handle.output(output));
    }

    // Whole-string reference: pass the producer's output through unchanged.
    if let Value::String(s) = value {
        if parse_whole_ref(s).is_some() && deferreds.len() == 1 {
            return Ok(FieldValue::Deferred(deferreds.remove(0)));
        }
    }

    let template = value.clone();
    let combined = Deferred::combine(&deferreds, move |values| {
        let resolved: HashMap<String, Value> = refs.into_iter().zip(values).collect();
        substitute(&template, &resolved)
    });
    Ok(FieldValue::Deferred(combined))
}

/// Collect `${resource.field}` targets from a value subtree, deduplicated,
/// in encounter order.
fn collect_refs(
    value: &Value,
    refs: &mut Vec<String>,
    node: &str,
    field: &str,
) -> Result<(), EngineError> {
    match value {
        Value::String(s) => {
            let mut rest = s.as_str();
            while let Some(start) = rest.find("${") {
                let after = &rest[start + 2..];
                let Some(end) = after.find('}') else { break };
                let target = after[..end].trim();
                let key = match target.split_once('.') {
                    Some((resource, output)) if !resource.is_empty() && !output.is_empty() => {
                        format!("{}.{}", resource.trim(), output.trim())
                    }
                    _ => {
                        return Err(EngineError::MalformedReference {
                            node: node.to_string(),
                            field: field.to_string(),
                            reference: target.to_string(),
                        })
                    }
                };
                if !refs.contains(&key) {
                    refs.push(key);
                }
                rest = &after[end + 1..];
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_refs(item, refs, node, field)?;
            }
        }
        Value::Object(fields) => {
            for item in fields.values() {
                collect_refs(item, refs, node, field)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// `"${resource.field}"` and nothing else.
fn parse_whole_ref(s: &str) -> Option<String> {
    let target = s.strip_prefix("${")?.strip_suffix('}')?;
    if target.contains('}') || target.contains("${") {
        return None;
    }
    let (resource, output) = target.split_once('.')?;
    Some(format!("{}.{}", resource.trim(), output.trim()))
}

/// Rebuild a subtree with every reference replaced by its resolved value.
fn substitute(value: &Value, resolved: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(key) = parse_whole_ref(s) {
                if let Some(v) = resolved.get(&key) {
                    return v.clone();
                }
            }
            Value::String(render(s, resolved))
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute(v, resolved)).collect())
        }
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v, resolved)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Interpolate references inside a string.
fn render(s: &str, resolved: &HashMap<String, Value>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let target = after[..end].trim();
        let key = target
            .split_once('.')
            .map(|(r, o)| format!("{}.{}", r.trim(), o.trim()))
            .unwrap_or_else(|| target.to_string());
        match resolved.get(&key) {
            Some(Value::String(v)) => out.push_str(v),
            Some(other) => out.push_str(&other.to_string()),
            None => {
                // Unknown at render time; leave the placeholder visible.
                out.push_str(&rest[start..start + 2 + end + 1]);
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}
