//! `SimProvider` — deterministic local simulation of a remote provider.
//!
//! Lets `topoform apply` exercise a full topology without any cloud
//! credentials: every apply succeeds, inputs are echoed back as outputs,
//! and an `id`/`name` pair is fabricated from the kind and logical name.
//!
//! A few kind-specific outputs are synthesized because downstream resources
//! consume them (subscription IDs from client-config lookups, addresses
//! from public IPs). Kind semantics belong to providers, never the engine.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::{ApplyRequest, Outputs, Provider, ProviderError};

/// A provider that simulates every apply call locally.
#[derive(Debug, Default, Clone)]
pub struct SimProvider;

impl SimProvider {
    pub fn new() -> Self {
        Self
    }
}

/// Deterministic host octet derived from the resource name.
fn fake_address(name: &str) -> String {
    let octet = name.bytes().fold(0u32, |acc, b| acc.wrapping_add(b as u32)) % 200 + 10;
    format!("203.0.113.{octet}")
}

#[async_trait]
impl Provider for SimProvider {
    async fn apply(&self, request: ApplyRequest) -> Result<Outputs, ProviderError> {
        info!("simulating apply of '{}' ({})", request.name, request.kind);

        let mut outputs = request.inputs.clone();
        outputs.insert(
            "id".into(),
            json!(format!("sim://{}/{}", request.kind, request.name)),
        );
        outputs.entry("name".to_string()).or_insert_with(|| json!(request.name));

        let kind = request.kind.to_ascii_lowercase();
        if kind.ends_with("clientconfig") {
            outputs.insert(
                "subscription_id".into(),
                json!("00000000-0000-0000-0000-00000000s1m0"),
            );
        }
        if kind.ends_with("publicipaddress") {
            outputs.insert("ip_address".into(), json!(fake_address(&request.name)));
        }

        Ok(outputs)
    }
}
