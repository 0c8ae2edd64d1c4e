//! `MockProvider` — a test double for `Provider`.
//!
//! Scripted per resource name: tests declare what happens when a given
//! resource is applied, and afterwards assert on the recorded call order,
//! call count, and the maximum number of calls observed in flight at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::{ApplyRequest, Outputs, Provider, ProviderError};

/// Behaviour injected into `MockProvider` for a specific resource name.
pub enum MockBehaviour {
    /// Succeed with the given outputs.
    Succeed(Outputs),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `n` calls, then succeed.
    FlakyUntil(usize, Outputs),
}

/// A mock provider that records every apply call it receives.
///
/// Resources without a scripted behaviour succeed with their inputs echoed
/// back plus a fabricated `id` output.
#[derive(Default)]
pub struct MockProvider {
    behaviours: Mutex<HashMap<String, MockBehaviour>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<ApplyRequest>>,
    attempts: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `name` to succeed with the given outputs.
    pub fn succeed_with(self, name: impl Into<String>, outputs: Outputs) -> Self {
        self.behaviours
            .lock()
            .unwrap()
            .insert(name.into(), MockBehaviour::Succeed(outputs));
        self
    }

    /// Script `name` to fail fatally.
    pub fn fail_fatal(self, name: impl Into<String>, msg: impl Into<String>) -> Self {
        self.behaviours
            .lock()
            .unwrap()
            .insert(name.into(), MockBehaviour::FailFatal(msg.into()));
        self
    }

    /// Script `name` to fail with a retryable error.
    pub fn fail_retryable(self, name: impl Into<String>, msg: impl Into<String>) -> Self {
        self.behaviours
            .lock()
            .unwrap()
            .insert(name.into(), MockBehaviour::FailRetryable(msg.into()));
        self
    }

    /// Script `name` to fail retryably `n` times before succeeding.
    pub fn flaky(self, name: impl Into<String>, n: usize, outputs: Outputs) -> Self {
        self.behaviours
            .lock()
            .unwrap()
            .insert(name.into(), MockBehaviour::FlakyUntil(n, outputs));
        self
    }

    /// Make applies of `name` sleep for `delay` before completing.
    pub fn delay(self, name: impl Into<String>, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(name.into(), delay);
        self
    }

    /// Total number of apply calls received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Resource names in the order their apply calls arrived.
    pub fn applied_names(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.name.clone()).collect()
    }

    /// The inputs seen for a given resource, if it was applied.
    pub fn inputs_for(&self, name: &str) -> Option<Map<String, Value>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.inputs.clone())
    }

    /// The largest number of apply calls observed in flight simultaneously.
    pub fn max_observed_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn apply(&self, request: ApplyRequest) -> Result<Outputs, ProviderError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.calls.lock().unwrap().push(request.clone());

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(request.name.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        let delay = self.delays.lock().unwrap().get(&request.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = match self.behaviours.lock().unwrap().get(&request.name) {
            Some(MockBehaviour::Succeed(outputs)) => Ok(outputs.clone()),
            Some(MockBehaviour::FailRetryable(msg)) => Err(ProviderError::Retryable(msg.clone())),
            Some(MockBehaviour::FailFatal(msg)) => Err(ProviderError::Fatal(msg.clone())),
            Some(MockBehaviour::FlakyUntil(n, outputs)) => {
                if attempt <= *n {
                    Err(ProviderError::Retryable(format!(
                        "transient failure (attempt {attempt})"
                    )))
                } else {
                    Ok(outputs.clone())
                }
            }
            None => {
                // Default: echo inputs and fabricate an id.
                let mut outputs = request.inputs.clone();
                outputs.insert(
                    "id".into(),
                    json!(format!("mock://{}/{}", request.kind, request.name)),
                );
                Ok(outputs)
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_resource_echoes_inputs_and_fabricates_id() {
        let mock = MockProvider::new();
        let mut inputs = Map::new();
        inputs.insert("cidr".into(), json!("10.0.0.0/16"));

        let outputs = mock
            .apply(ApplyRequest {
                name: "vnet".into(),
                kind: "azure/virtualNetwork".into(),
                inputs,
            })
            .await
            .expect("default behaviour succeeds");

        assert_eq!(outputs["cidr"], json!("10.0.0.0/16"));
        assert_eq!(outputs["id"], json!("mock://azure/virtualNetwork/vnet"));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn scripted_fatal_failure_is_returned() {
        let mock = MockProvider::new().fail_fatal("boom", "quota exceeded");
        let result = mock
            .apply(ApplyRequest {
                name: "boom".into(),
                kind: "azure/virtualMachine".into(),
                inputs: Map::new(),
            })
            .await;

        assert_eq!(result, Err(ProviderError::Fatal("quota exceeded".into())));
    }

    #[tokio::test]
    async fn flaky_resource_recovers_after_scripted_attempts() {
        let mut outputs = Map::new();
        outputs.insert("id".into(), json!("ok"));
        let mock = MockProvider::new().flaky("flaky", 2, outputs);

        let request = ApplyRequest {
            name: "flaky".into(),
            kind: "test".into(),
            inputs: Map::new(),
        };
        assert!(mock.apply(request.clone()).await.is_err());
        assert!(mock.apply(request.clone()).await.is_err());
        assert!(mock.apply(request).await.is_ok());
        assert_eq!(mock.call_count(), 3);
    }
}
