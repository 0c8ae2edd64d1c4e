//! Engine-level error types.

use thiserror::Error;

use provider::ProviderError;

/// Errors produced by plan validation and the engine's own contracts.
///
/// Every validation variant is detected before execution starts; a plan that
/// fails validation never reaches the provider.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more resources share the same logical name.
    #[error("duplicate resource name: '{0}'")]
    DuplicateResourceName(String),

    /// A deferred field traces to a resource that was never declared.
    #[error("resource '{node}' field '{field}' references unknown resource '{missing}'")]
    DanglingReference {
        node: String,
        field: String,
        missing: String,
    },

    /// A `${...}` placeholder does not name a `resource.field` pair.
    #[error("resource '{node}' field '{field}' has malformed reference '${{{reference}}}'")]
    MalformedReference {
        node: String,
        field: String,
        reference: String,
    },

    /// A pending deferred field traces to no producing resource, so nothing
    /// would ever settle it and its node could never be dispatched.
    #[error("resource '{node}' field '{field}' awaits a value no resource produces")]
    UnproducedField { node: String, field: String },

    /// The dependency graph contains a cycle; no execution order exists.
    #[error("dependency cycle: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    // ------ Contract violations & outcomes ------

    /// `resolve` or `reject` was called on an already-settled deferred value.
    #[error("deferred value already settled")]
    AlreadyResolved,

    /// One or more exports reference values that failed or never resolved.
    #[error("unresolved exports: {}", names.join(", "))]
    ExportUnresolved { names: Vec<String> },
}

/// A per-resource failure, propagated along dependency edges.
///
/// Clonable so a single failure can reject every deferred value that
/// transitively depends on the failed resource.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeFailure {
    /// The provider's apply call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// An ancestor failed; this resource was never dispatched.
    ///
    /// Named `failed_node` rather than `source`: thiserror reserves a field
    /// called `source` for the error-source chain.
    #[error("dependency '{failed_node}' failed: {message}")]
    DependencyFailed {
        failed_node: String,
        message: String,
    },

    /// The provider succeeded but did not return a declared output field.
    #[error("resource '{node}' returned no output field '{field}'")]
    MissingOutput { node: String, field: String },

    /// The plan was cancelled before this resource was dispatched.
    #[error("cancelled before dispatch")]
    Cancelled,

    /// An engine-internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}
