//! `provider` crate — the `Provider` trait and provider implementations.
//!
//! The engine never inspects kind-specific semantics: it hands a provider a
//! fully-literal set of inputs and takes back a set of literal outputs.
//! Every provider — real, simulated, or mocked — implements [`Provider`].

pub mod error;
pub mod mock;
pub mod retry;
pub mod sim;
pub mod traits;

pub use error::ProviderError;
pub use retry::RetryProvider;
pub use sim::SimProvider;
pub use traits::{ApplyRequest, Outputs, Provider};
