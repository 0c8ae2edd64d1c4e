//! The `Provider` trait — the contract every provider must fulfil.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::ProviderError;

/// Resolved output fields returned by a successful apply call.
pub type Outputs = Map<String, Value>;

/// A single create/update request, fully resolved.
///
/// By the time a request reaches a provider, every input field is a literal
/// JSON value — the engine has already awaited all deferred references.
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    /// Logical name of the resource being applied (stable across runs).
    pub name: String,
    /// Opaque kind tag, e.g. `"azure/virtualNetwork"`. The engine never
    /// interprets this; only providers do.
    pub kind: String,
    /// Fully-literal input fields.
    pub inputs: Map<String, Value>,
}

/// The core provider trait.
///
/// Implementations perform the actual remote create/update call and return
/// the resolved output fields of the created resource.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Apply the requested resource and return its resolved outputs.
    async fn apply(&self, request: ApplyRequest) -> Result<Outputs, ProviderError>;
}
