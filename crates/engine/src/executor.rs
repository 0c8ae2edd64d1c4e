//! Plan execution engine.
//!
//! `PlanExecutor` is the central orchestrator:
//! 1. Validates the plan (names, references, acyclicity) before any
//!    provider call.
//! 2. Tracks per-node in-degrees and dispatches every ready node's apply
//!    call concurrently, bounded by `ExecutorConfig::max_in_flight`.
//! 3. Settles each node's output deferreds as its apply call completes,
//!    unblocking dependents.
//! 4. On failure, marks every transitive dependent `Skipped` with a
//!    `DependencyFailed` referencing the originally-failed resource;
//!    independent branches run to completion.
//! 5. Produces an [`ApplyReport`] enumerating every node's terminal state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use provider::{ApplyRequest, Outputs, Provider};

use crate::deployment::Deployment;
use crate::error::{EngineError, NodeFailure};
use crate::models::FieldValue;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of apply calls in flight at once. Bounded by default
    /// to protect the remote provider; raise it for wide graphs.
    pub max_in_flight: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_in_flight: 16 }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// A clonable cancellation handle.
///
/// Cancelling lets in-flight apply calls finish (half-created remote
/// resources stay tracked) but prevents any further dispatch; undispatched
/// nodes end `Skipped` with a `Cancelled` reason.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Outcome of a completed run
// ---------------------------------------------------------------------------

/// Terminal state of a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeStatus {
    /// Applied successfully.
    Succeeded,
    /// Dispatched and failed.
    Failed,
    /// Never dispatched (failed ancestor or cancellation).
    Skipped,
}

/// Overall outcome of a run that got past validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanStatus {
    Succeeded,
    PartiallyFailed,
}

/// Per-resource entry in the final report.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub kind: String,
    pub status: NodeStatus,
    /// Failure or skip reason, if any.
    pub error: Option<String>,
    /// When the apply call was dispatched; `None` for skipped nodes, so the
    /// report distinguishes "never attempted" from "attempted and failed".
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// The result of running a full plan.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub run_id: Uuid,
    pub status: PlanStatus,
    /// One entry per declared resource, in declaration order.
    pub nodes: Vec<NodeReport>,
}

impl ApplyReport {
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

// ---------------------------------------------------------------------------
// Internal bookkeeping
// ---------------------------------------------------------------------------

enum Outcome {
    Succeeded,
    Failed(NodeFailure),
    Skipped(NodeFailure),
}

struct Record {
    outcome: Outcome,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Record {
    fn skipped(reason: NodeFailure) -> Self {
        Self {
            outcome: Outcome::Skipped(reason),
            started_at: None,
            finished_at: None,
        }
    }
}

/// The failure a dependent inherits from a terminal, non-succeeded
/// predecessor. Always references the *originally* failed resource.
fn inherited_failure(predecessor: &str, failure: &NodeFailure) -> NodeFailure {
    match failure {
        NodeFailure::DependencyFailed {
            failed_node,
            message,
        } => NodeFailure::DependencyFailed {
            failed_node: failed_node.clone(),
            message: message.clone(),
        },
        NodeFailure::Cancelled => NodeFailure::Cancelled,
        other => NodeFailure::DependencyFailed {
            failed_node: predecessor.to_string(),
            message: other.to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// PlanExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator that runs a single plan.
pub struct PlanExecutor {
    provider: Arc<dyn Provider>,
    config: ExecutorConfig,
}

impl PlanExecutor {
    pub fn new(provider: Arc<dyn Provider>, config: ExecutorConfig) -> Self {
        Self { provider, config }
    }

    /// Run the plan to completion and return the per-node report.
    ///
    /// Validation failures (`DuplicateResourceName`, `DanglingReference`,
    /// `CyclicDependency`) abort before any provider call and surface as
    /// `Err`; execution-time failures are recorded per node and never abort
    /// independent branches.
    #[instrument(skip_all, fields(resources = plan.nodes().len()))]
    pub async fn run(
        &self,
        plan: &Deployment,
        cancel: CancelToken,
    ) -> Result<ApplyReport, EngineError> {
        let graph = plan.validate()?;
        let run_id = Uuid::new_v4();
        info!(
            "plan validated — {} resources, {} edges (run {})",
            graph.names().len(),
            graph.edge_count(),
            run_id
        );

        let nodes: HashMap<&str, &crate::models::ResourceNode> =
            plan.nodes().iter().map(|n| (n.name.as_str(), n)).collect();

        let mut remaining = graph.in_degrees();
        // First inherited failure per not-yet-ready node.
        let mut blocked_by: HashMap<String, NodeFailure> = HashMap::new();
        let mut records: HashMap<String, Record> = HashMap::new();

        // Nodes whose terminal state still has to be cascaded to dependents.
        let mut settled: VecDeque<String> = VecDeque::new();
        let mut ready: VecDeque<String> = graph
            .names()
            .iter()
            .filter(|n| remaining.get(n.as_str()) == Some(&0))
            .cloned()
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut in_flight: JoinSet<(String, Option<DateTime<Utc>>, Result<Outputs, NodeFailure>)> =
            JoinSet::new();

        loop {
            // Cascade settled nodes and dispatch ready ones until both
            // queues drain; skipping a node can settle further nodes.
            while let Some(name) = settled.pop_front() {
                let failure = match &records[&name].outcome {
                    Outcome::Succeeded => None,
                    Outcome::Failed(f) | Outcome::Skipped(f) => Some(f.clone()),
                };

                for dependent in graph.dependents(&name) {
                    if let Some(f) = &failure {
                        blocked_by
                            .entry(dependent.to_string())
                            .or_insert_with(|| inherited_failure(&name, f));
                    }
                    let Some(degree) = remaining.get_mut(dependent) else {
                        continue;
                    };
                    *degree -= 1;
                    if *degree > 0 {
                        continue;
                    }
                    match blocked_by.remove(dependent) {
                        Some(reason) => {
                            warn!("skipping '{}': {}", dependent, reason);
                            plan.settle_outputs(dependent, &Err(reason.clone()));
                            records.insert(dependent.to_string(), Record::skipped(reason));
                            settled.push_back(dependent.to_string());
                        }
                        None => ready.push_back(dependent.to_string()),
                    }
                }
            }

            self.dispatch_ready(
                &mut ready,
                &mut settled,
                &mut records,
                &nodes,
                plan,
                &cancel,
                &semaphore,
                &mut in_flight,
            );
            if !settled.is_empty() {
                continue;
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            let (name, started_at, result) = match joined {
                Ok(done) => done,
                Err(join_err) => {
                    // A panicked apply task; the node is recovered below by
                    // the missing-record sweep.
                    error!("apply task aborted: {join_err}");
                    continue;
                }
            };

            let finished_at = Some(Utc::now());
            let outcome = match &result {
                Ok(_) => {
                    info!("resource '{}' applied", name);
                    Outcome::Succeeded
                }
                Err(failure) => {
                    error!("resource '{}' failed: {}", name, failure);
                    Outcome::Failed(failure.clone())
                }
            };
            plan.settle_outputs(&name, &result);
            records.insert(
                name.clone(),
                Record {
                    outcome,
                    started_at,
                    finished_at,
                },
            );
            settled.push_back(name);
        }

        // Any node without a record had its apply task abort; fail it so its
        // outputs and exports settle.
        for name in graph.names() {
            if !records.contains_key(name) {
                let failure = NodeFailure::Internal("apply task aborted".into());
                plan.settle_outputs(name, &Err(failure.clone()));
                records.insert(
                    name.clone(),
                    Record {
                        outcome: Outcome::Failed(failure),
                        started_at: None,
                        finished_at: None,
                    },
                );
            }
        }

        let mut report_nodes = Vec::with_capacity(graph.names().len());
        let mut all_succeeded = true;
        for name in graph.names() {
            let record = &records[name];
            let (status, error) = match &record.outcome {
                Outcome::Succeeded => (NodeStatus::Succeeded, None),
                Outcome::Failed(f) => (NodeStatus::Failed, Some(f.to_string())),
                Outcome::Skipped(f) => (NodeStatus::Skipped, Some(f.to_string())),
            };
            if status != NodeStatus::Succeeded {
                all_succeeded = false;
            }
            report_nodes.push(NodeReport {
                name: name.clone(),
                kind: nodes
                    .get(name.as_str())
                    .map(|n| n.kind.clone())
                    .unwrap_or_default(),
                status,
                error,
                started_at: record.started_at,
                finished_at: record.finished_at,
            });
        }

        let status = if all_succeeded {
            PlanStatus::Succeeded
        } else {
            PlanStatus::PartiallyFailed
        };
        info!("run {} finished: {:?}", run_id, status);

        Ok(ApplyReport {
            run_id,
            status,
            nodes: report_nodes,
        })
    }

    /// Dispatch every ready node, or skip it if cancellation was requested.
    #[allow(clippy::too_many_arguments)]
    fn dispatch_ready(
        &self,
        ready: &mut VecDeque<String>,
        settled: &mut VecDeque<String>,
        records: &mut HashMap<String, Record>,
        nodes: &HashMap<&str, &crate::models::ResourceNode>,
        plan: &Deployment,
        cancel: &CancelToken,
        semaphore: &Arc<Semaphore>,
        in_flight: &mut JoinSet<(String, Option<DateTime<Utc>>, Result<Outputs, NodeFailure>)>,
    ) {
        while let Some(name) = ready.pop_front() {
            if cancel.is_cancelled() {
                warn!("cancelled — skipping '{}'", name);
                plan.settle_outputs(&name, &Err(NodeFailure::Cancelled));
                records.insert(name.clone(), Record::skipped(NodeFailure::Cancelled));
                settled.push_back(name);
                continue;
            }

            let Some(node) = nodes.get(name.as_str()) else {
                continue;
            };
            let kind = node.kind.clone();
            let fields: Vec<(String, FieldValue)> = node
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(semaphore);

            in_flight.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            name,
                            None,
                            Err(NodeFailure::Internal("executor semaphore closed".into())),
                        )
                    }
                };
                let started_at = Utc::now();
                let result = apply_node(provider, &name, kind, fields).await;
                (name, Some(started_at), result)
            });
        }
    }
}

/// Resolve a node's deferred inputs to literals, then call the provider.
///
/// By the time a node is dispatched every predecessor has completed, so the
/// awaits here are instantaneous in the steady state; the mechanism still
/// supports genuinely pending combinator inputs.
async fn apply_node(
    provider: Arc<dyn Provider>,
    name: &str,
    kind: String,
    fields: Vec<(String, FieldValue)>,
) -> Result<Outputs, NodeFailure> {
    let mut inputs = serde_json::Map::new();
    for (field, value) in fields {
        let literal = match value {
            FieldValue::Literal(v) => v,
            FieldValue::Deferred(d) => d.wait().await.map_err(|failure| match failure {
                f @ NodeFailure::DependencyFailed { .. } => f,
                other => NodeFailure::DependencyFailed {
                    failed_node: d.sources().iter().next().cloned().unwrap_or_default(),
                    message: other.to_string(),
                },
            })?,
        };
        inputs.insert(field, literal);
    }

    provider
        .apply(ApplyRequest {
            name: name.to_string(),
            kind,
            inputs,
        })
        .await
        .map_err(NodeFailure::from)
}
