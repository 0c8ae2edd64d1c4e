//! Integration tests for the plan executor.
//!
//! These tests drive full plans against `MockProvider` — no remote provider
//! is required. Each scenario builds a `Deployment`, runs it through
//! `PlanExecutor`, and asserts on the report, the recorded provider calls,
//! and the settled exports.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use provider::mock::MockProvider;
use provider::Outputs;

use crate::{
    CancelToken, Deferred, Deployment, EngineError, ExecutorConfig, FieldValue, NodeStatus,
    PlanExecutor, PlanStatus,
};

fn executor(mock: Arc<MockProvider>) -> PlanExecutor {
    PlanExecutor::new(mock, ExecutorConfig::default())
}

fn outputs(pairs: &[(&str, serde_json::Value)]) -> Outputs {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// a <- b <- c, each consuming its predecessor's `id` output.
fn linear_plan(deployment: &mut Deployment) {
    let a = deployment.declare("a", "test/thing", Vec::new());
    let b = deployment.declare(
        "b",
        "test/thing",
        vec![("parent_id".to_string(), a.output("id").into())],
    );
    deployment.declare(
        "c",
        "test/thing",
        vec![("parent_id".to_string(), b.output("id").into())],
    );
}

#[tokio::test]
async fn linear_plan_succeeds_in_dependency_order() {
    let mut deployment = Deployment::new();
    linear_plan(&mut deployment);

    let mock = Arc::new(MockProvider::new());
    let report = executor(mock.clone())
        .run(&deployment, CancelToken::new())
        .await
        .expect("plan is valid");

    assert_eq!(report.status, PlanStatus::Succeeded);
    assert_eq!(mock.applied_names(), vec!["a", "b", "c"]);
    for node in &report.nodes {
        assert_eq!(node.status, NodeStatus::Succeeded);
        assert!(node.started_at.is_some());
    }

    // b received a's fabricated id as a literal input.
    assert_eq!(
        mock.inputs_for("b").unwrap()["parent_id"],
        json!("mock://test/thing/a")
    );
}

#[tokio::test]
async fn failed_node_skips_transitive_dependents_and_spares_independent_branches() {
    let mut deployment = Deployment::new();
    linear_plan(&mut deployment);
    deployment.declare("solo", "test/thing", Vec::new());

    let mock = Arc::new(MockProvider::new().fail_fatal("a", "quota exceeded"));
    let report = executor(mock.clone())
        .run(&deployment, CancelToken::new())
        .await
        .expect("plan is valid");

    assert_eq!(report.status, PlanStatus::PartiallyFailed);
    assert_eq!(report.node("a").unwrap().status, NodeStatus::Failed);
    assert_eq!(report.node("b").unwrap().status, NodeStatus::Skipped);
    assert_eq!(report.node("c").unwrap().status, NodeStatus::Skipped);
    assert_eq!(report.node("solo").unwrap().status, NodeStatus::Succeeded);

    // Skipped nodes were never dispatched and carry no timestamps.
    assert_eq!(mock.call_count(), 2);
    assert!(report.node("b").unwrap().started_at.is_none());

    // Both skip reasons reference the originally-failed resource.
    for name in ["b", "c"] {
        let error = report.node(name).unwrap().error.as_deref().unwrap();
        assert!(error.contains("'a'"), "{name}: {error}");
    }
}

#[tokio::test]
async fn diamond_with_one_failing_branch_completes_the_other() {
    let mut deployment = Deployment::new();
    let root = deployment.declare("root", "test/thing", Vec::new());
    let left = deployment.declare(
        "left",
        "test/thing",
        vec![("r".to_string(), root.output("id").into())],
    );
    let right = deployment.declare(
        "right",
        "test/thing",
        vec![("r".to_string(), root.output("id").into())],
    );
    deployment.declare(
        "join",
        "test/thing",
        vec![(
            "ids".to_string(),
            Deferred::combine(&[left.output("id"), right.output("id")], |values| {
                json!(values)
            })
            .into(),
        )],
    );

    let mock = Arc::new(MockProvider::new().fail_fatal("left", "boom"));
    let report = executor(mock.clone())
        .run(&deployment, CancelToken::new())
        .await
        .expect("plan is valid");

    assert_eq!(report.node("root").unwrap().status, NodeStatus::Succeeded);
    assert_eq!(report.node("left").unwrap().status, NodeStatus::Failed);
    assert_eq!(report.node("right").unwrap().status, NodeStatus::Succeeded);
    assert_eq!(report.node("join").unwrap().status, NodeStatus::Skipped);
    assert_eq!(report.status, PlanStatus::PartiallyFailed);
}

#[tokio::test]
async fn independent_nodes_feed_a_combined_export() {
    let mut deployment = Deployment::new();
    let a = deployment.declare("a", "test/thing", Vec::new());
    let b = deployment.declare("b", "test/thing", Vec::new());
    deployment.export(
        "both",
        Deferred::combine(&[a.output("id"), b.output("id")], |values| {
            json!(format!(
                "{}+{}",
                values[0].as_str().unwrap(),
                values[1].as_str().unwrap()
            ))
        }),
    );

    let mock = Arc::new(MockProvider::new());
    let report = executor(mock)
        .run(&deployment, CancelToken::new())
        .await
        .expect("plan is valid");
    assert_eq!(report.status, PlanStatus::Succeeded);

    let exports = deployment.collect_exports().expect("all resolved");
    assert_eq!(
        exports["both"],
        json!("mock://test/thing/a+mock://test/thing/b")
    );
}

#[tokio::test]
async fn export_of_a_failed_producer_is_reported_unresolved() {
    let mut deployment = Deployment::new();
    let a = deployment.declare("a", "test/thing", Vec::new());
    let ok = deployment.declare("ok", "test/thing", Vec::new());
    deployment.export("broken", a.output("id"));
    deployment.export("fine", ok.output("id"));

    let mock = Arc::new(MockProvider::new().fail_fatal("a", "denied"));
    executor(mock)
        .run(&deployment, CancelToken::new())
        .await
        .expect("plan is valid");

    match deployment.collect_exports() {
        Err(EngineError::ExportUnresolved { names }) => {
            assert_eq!(names, vec!["broken".to_string()]);
        }
        other => panic!("expected ExportUnresolved, got {other:?}"),
    }
}

#[tokio::test]
async fn cyclic_plan_is_rejected_before_any_provider_call() {
    let mut deployment = Deployment::new();
    // a and b reference each other's outputs.
    let a_out = deployment.handle("a").output("id");
    let b_out = deployment.handle("b").output("id");
    deployment.declare("a", "test/thing", vec![("x".to_string(), b_out.into())]);
    deployment.declare("b", "test/thing", vec![("x".to_string(), a_out.into())]);

    let mock = Arc::new(MockProvider::new());
    let result = executor(mock.clone())
        .run(&deployment, CancelToken::new())
        .await;

    assert!(matches!(result, Err(EngineError::CyclicDependency { .. })));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn self_referencing_field_is_rejected_as_a_cycle() {
    let mut deployment = Deployment::new();
    let me = deployment.handle("a").output("id");
    deployment.declare("a", "test/thing", vec![("x".to_string(), me.into())]);

    let mock = Arc::new(MockProvider::new());
    let result = executor(mock.clone())
        .run(&deployment, CancelToken::new())
        .await;

    assert!(
        matches!(result, Err(EngineError::CyclicDependency { path }) if path == vec!["a", "a"])
    );
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn sourceless_pending_field_is_rejected_instead_of_waited_on() {
    // A bare pending deferred has no producer; validation must abort the
    // plan rather than let the node wait forever.
    let mut deployment = Deployment::new();
    deployment.declare(
        "a",
        "test/thing",
        vec![("orphan".to_string(), Deferred::pending().into())],
    );

    let mock = Arc::new(MockProvider::new());
    let result = executor(mock.clone())
        .run(&deployment, CancelToken::new())
        .await;

    assert!(matches!(
        result,
        Err(EngineError::UnproducedField { node, field }) if node == "a" && field == "orphan"
    ));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn duplicate_names_abort_before_execution() {
    let mut deployment = Deployment::new();
    deployment.declare("a", "test/thing", Vec::new());
    deployment.declare("a", "test/other", Vec::new());

    let mock = Arc::new(MockProvider::new());
    let result = executor(mock.clone())
        .run(&deployment, CancelToken::new())
        .await;

    assert!(matches!(result, Err(EngineError::DuplicateResourceName(n)) if n == "a"));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn literal_only_fields_are_passed_through_to_the_provider() {
    let mut deployment = Deployment::new();
    deployment.declare(
        "vnet",
        "azure/virtualNetwork",
        vec![(
            "address_space".to_string(),
            FieldValue::Literal(json!(["10.0.0.0/16"])),
        )],
    );

    let mock = Arc::new(MockProvider::new());
    executor(mock.clone())
        .run(&deployment, CancelToken::new())
        .await
        .expect("plan is valid");

    assert_eq!(
        mock.inputs_for("vnet").unwrap()["address_space"],
        json!(["10.0.0.0/16"])
    );
}

#[tokio::test]
async fn concurrency_limit_of_one_serializes_provider_calls() {
    let mut deployment = Deployment::new();
    for name in ["p", "q", "r"] {
        deployment.declare(name, "test/thing", Vec::new());
    }

    let mock = Arc::new(
        MockProvider::new()
            .delay("p", Duration::from_millis(20))
            .delay("q", Duration::from_millis(20))
            .delay("r", Duration::from_millis(20)),
    );
    let report = PlanExecutor::new(mock.clone(), ExecutorConfig { max_in_flight: 1 })
        .run(&deployment, CancelToken::new())
        .await
        .expect("plan is valid");

    assert_eq!(report.status, PlanStatus::Succeeded);
    assert_eq!(mock.max_observed_in_flight(), 1);
}

#[tokio::test]
async fn independent_nodes_overlap_when_the_limit_allows() {
    let mut deployment = Deployment::new();
    deployment.declare("p", "test/thing", Vec::new());
    deployment.declare("q", "test/thing", Vec::new());

    let mock = Arc::new(
        MockProvider::new()
            .delay("p", Duration::from_millis(50))
            .delay("q", Duration::from_millis(50)),
    );
    executor(mock.clone())
        .run(&deployment, CancelToken::new())
        .await
        .expect("plan is valid");

    assert_eq!(mock.max_observed_in_flight(), 2);
}

#[tokio::test]
async fn pre_cancelled_plan_skips_everything_without_provider_calls() {
    let mut deployment = Deployment::new();
    linear_plan(&mut deployment);

    let cancel = CancelToken::new();
    cancel.cancel();

    let mock = Arc::new(MockProvider::new());
    let report = executor(mock.clone())
        .run(&deployment, cancel)
        .await
        .expect("plan is valid");

    assert_eq!(mock.call_count(), 0);
    assert_eq!(report.status, PlanStatus::PartiallyFailed);
    for node in &report.nodes {
        assert_eq!(node.status, NodeStatus::Skipped);
        assert!(node.error.as_deref().unwrap().contains("cancelled"));
    }
}

#[tokio::test]
async fn cancellation_lets_in_flight_calls_finish_and_skips_the_rest() {
    let mut deployment = Deployment::new();
    let slow = deployment.declare("slow", "test/thing", Vec::new());
    deployment.declare(
        "after",
        "test/thing",
        vec![("p".to_string(), slow.output("id").into())],
    );

    let cancel = CancelToken::new();
    let mock = Arc::new(MockProvider::new().delay("slow", Duration::from_millis(100)));

    let run = {
        let cancel = cancel.clone();
        let mock = mock.clone();
        let runner = executor(mock);
        tokio::spawn(async move {
            let deployment = deployment;
            let report = runner.run(&deployment, cancel).await.expect("plan is valid");
            report
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    let report = run.await.expect("executor task completes");

    // The in-flight call finished; its dependent was never dispatched.
    assert_eq!(report.node("slow").unwrap().status, NodeStatus::Succeeded);
    assert_eq!(report.node("after").unwrap().status, NodeStatus::Skipped);
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn manifest_plan_runs_end_to_end() {
    let manifest = crate::Manifest::parse(
        &json!({
            "name": "mini",
            "resources": [
                { "name": "rg", "kind": "test/group" },
                { "name": "net", "kind": "test/network",
                  "fields": { "group": "${rg.id}", "cidr": "10.0.0.0/16" } }
            ],
            "exports": { "net_id": "${net.id}" }
        })
        .to_string(),
    )
    .expect("manifest parses");
    let deployment = manifest.into_deployment().expect("manifest lowers");

    let mock = Arc::new(MockProvider::new());
    let report = executor(mock.clone())
        .run(&deployment, CancelToken::new())
        .await
        .expect("plan is valid");

    assert_eq!(report.status, PlanStatus::Succeeded);
    assert_eq!(mock.applied_names(), vec!["rg", "net"]);
    assert_eq!(
        deployment.collect_exports().expect("resolved")["net_id"],
        json!("mock://test/network/net")
    );
}

#[tokio::test]
async fn missing_declared_output_fails_only_the_consumers() {
    let mut deployment = Deployment::new();
    let ip = deployment.declare("ip", "test/address", Vec::new());
    deployment.declare(
        "dns",
        "test/record",
        vec![("target".to_string(), ip.output("fqdn").into())],
    );

    // Scripted outputs without `fqdn`: the ip node itself succeeds.
    let mock = Arc::new(
        MockProvider::new().succeed_with("ip", outputs(&[("id", json!("addr-1"))])),
    );
    let report = executor(mock)
        .run(&deployment, CancelToken::new())
        .await
        .expect("plan is valid");

    assert_eq!(report.node("ip").unwrap().status, NodeStatus::Succeeded);
    // The consumer was dispatched (its predecessor succeeded) and failed
    // resolving its input.
    assert_eq!(report.node("dns").unwrap().status, NodeStatus::Failed);
    assert!(report
        .node("dns")
        .unwrap()
        .error
        .as_deref()
        .unwrap()
        .contains("fqdn"));
}
