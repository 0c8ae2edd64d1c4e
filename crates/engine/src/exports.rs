//! Named exports — final resolved values recorded for external consumption.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::deferred::Deferred;
use crate::error::EngineError;

/// Records named deferred values and collects them once the plan has run.
#[derive(Debug, Default)]
pub struct ExportStore {
    entries: BTreeMap<String, Deferred>,
}

impl ExportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a named output. Re-exporting a name replaces the previous value.
    pub fn export(&mut self, name: impl Into<String>, value: Deferred) {
        self.entries.insert(name.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collect every export as a literal value.
    ///
    /// # Errors
    /// [`EngineError::ExportUnresolved`] naming every export whose value
    /// failed or never resolved (its producing resource failed, was skipped,
    /// or the plan never ran).
    pub fn collect(&self) -> Result<BTreeMap<String, Value>, EngineError> {
        let mut resolved = BTreeMap::new();
        let mut unresolved = Vec::new();

        for (name, deferred) in &self.entries {
            match deferred.try_result() {
                Some(Ok(value)) => {
                    resolved.insert(name.clone(), value);
                }
                _ => unresolved.push(name.clone()),
            }
        }

        if unresolved.is_empty() {
            Ok(resolved)
        } else {
            Err(EngineError::ExportUnresolved { names: unresolved })
        }
    }
}
