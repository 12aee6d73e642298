//! End-to-end runs of the form-sink demo project against the local cloud

use infraflow_cloud::{
    ActionType, ApplyExecutor, ApplyOptions, ApplyResult, CloudProvider, ControlPlaneErrorKind,
    GlobalState, Plan, PlanEvaluator, RetryConfig, StateManager,
};
use infraflow_cloud_local::{Fault, LocalCloudProvider};
use infraflow_core::{LocalOverrides, NodeAddress, ResourceGraph, parse_kdl_string_with_overrides};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;

const DEMO: &str = include_str!("../../../demos/form-sink/infra.kdl");

struct Harness {
    _dir: TempDir,
    provider: Arc<LocalCloudProvider>,
    manager: StateManager,
    state: GlobalState,
}

impl Harness {
    fn new(provider: LocalCloudProvider) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path());
        Self {
            _dir: dir,
            provider: Arc::new(provider),
            manager,
            state: GlobalState::new(),
        }
    }

    fn graph(&self, function_enabled: i64) -> ResourceGraph {
        let mut overrides = LocalOverrides::new();
        overrides.insert("function_enabled".to_string(), json!(function_enabled));
        let document =
            parse_kdl_string_with_overrides(DEMO, "form-sink".to_string(), &overrides).unwrap();
        ResourceGraph::build(&document, self.provider.schema()).unwrap()
    }

    fn plan(&self, graph: &ResourceGraph) -> Plan {
        PlanEvaluator::new(graph, self.provider.schema())
            .plan(&self.state)
            .unwrap()
    }

    async fn apply(&mut self, graph: &ResourceGraph, plan: &Plan) -> ApplyResult {
        let executor = ApplyExecutor::new(
            self.provider.clone(),
            self.manager.clone(),
            ApplyOptions {
                parallelism: 4,
                retry: RetryConfig::immediate(3),
            },
        );
        let (_tx, rx) = watch::channel(false);
        executor
            .apply(graph, plan, &mut self.state, rx)
            .await
            .unwrap()
    }
}

fn managed(kind: &str, name: &str) -> NodeAddress {
    NodeAddress::managed(kind, name)
}

fn count(plan: &Plan, action_type: ActionType) -> usize {
    plan.actions_by_type(action_type).len()
}

#[tokio::test]
async fn test_topological_order_respects_every_edge() {
    let harness = Harness::new(LocalCloudProvider::new(Default::default()));
    let graph = harness.graph(1);
    let order = graph.topological_order();
    let position = |a: &NodeAddress| order.iter().position(|o| o == a).unwrap();

    assert_eq!(order.len(), 16);
    for edge in graph.edges() {
        assert!(
            position(&edge.to) < position(&edge.from),
            "{} must come before {}",
            edge.to,
            edge.from
        );
    }

    let plan = harness.plan(&graph);
    for edge in graph.edges() {
        assert!(plan.position(&edge.to).unwrap() < plan.position(&edge.from).unwrap());
    }
}

#[tokio::test]
async fn test_initial_apply_and_replan_is_noop() {
    let mut harness = Harness::new(LocalCloudProvider::new(Default::default()));
    let graph = harness.graph(0);

    let plan = harness.plan(&graph);
    assert_eq!(count(&plan, ActionType::Create), 14);
    assert_eq!(count(&plan, ActionType::Update), 0);
    assert!(plan.action_for(&managed("function", "form-handler")).is_none());
    assert!(
        plan.action_for(&managed("function_iam_binding", "public-invoke"))
            .is_none()
    );

    let result = harness.apply(&graph, &plan).await;
    assert!(result.is_success(), "{:?}", result.failed);
    assert_eq!(result.succeeded.len(), 14);
    // The data source never touches the control plane
    assert_eq!(harness.provider.object_count().await, 13);

    let replan = harness.plan(&graph);
    assert!(!replan.has_changes);
    assert_eq!(count(&replan, ActionType::NoOp), 14);

    let persisted = harness.manager.load().await.unwrap();
    assert_eq!(persisted.resources.len(), 14);
}

#[tokio::test]
async fn test_enabling_function_adds_two_creates() {
    let mut harness = Harness::new(LocalCloudProvider::new(Default::default()));
    let graph = harness.graph(0);
    let plan = harness.plan(&graph);
    harness.apply(&graph, &plan).await;

    let graph = harness.graph(1);
    let plan = harness.plan(&graph);
    assert_eq!(count(&plan, ActionType::Create), 2);
    assert_eq!(count(&plan, ActionType::NoOp), 14);
    assert_eq!(count(&plan, ActionType::Update), 0);

    let result = harness.apply(&graph, &plan).await;
    assert!(result.is_success(), "{:?}", result.failed);

    let function = harness
        .state
        .get_resource(&managed("function", "form-handler"))
        .unwrap();
    assert!(function.field("version_id").is_some());
    assert_eq!(
        function.inputs["secret"][0]["version_id"],
        harness
            .state
            .get_resource(&NodeAddress::data("secret_version", "form-keys"))
            .unwrap()
            .field("version_id")
            .unwrap()
    );

    // Switching it off again removes exactly those two
    let graph = harness.graph(0);
    let plan = harness.plan(&graph);
    assert_eq!(count(&plan, ActionType::Delete), 2);
    assert!(
        plan.position(&managed("function_iam_binding", "public-invoke"))
            < plan.position(&managed("function", "form-handler"))
    );
}

#[tokio::test]
async fn test_destroy_removes_bucket_before_admin_binding() {
    let mut harness = Harness::new(LocalCloudProvider::new(Default::default()));
    let graph = harness.graph(1);
    let plan = harness.plan(&graph);
    let result = harness.apply(&graph, &plan).await;
    assert!(result.is_success(), "{:?}", result.failed);

    let destroy = PlanEvaluator::new(&graph, harness.provider.schema())
        .plan_destroy(&harness.state)
        .unwrap();
    assert_eq!(count(&destroy, ActionType::Delete), 16);
    assert!(
        destroy.position(&managed("bucket", "forms"))
            < destroy.position(&managed("role_binding", "storage-admin"))
    );

    let result = harness.apply(&graph, &destroy).await;
    assert!(result.is_success(), "{:?}", result.failed);
    assert!(harness.state.resources.is_empty());
    assert_eq!(harness.provider.object_count().await, 0);

    let calls = harness.provider.calls().await;
    let deleted = |kind: &str| {
        calls
            .iter()
            .position(|c| c.operation == "delete" && c.kind == kind)
            .unwrap()
    };
    assert!(deleted("bucket") < deleted("service_account"));
}

#[tokio::test]
async fn test_bucket_failure_skips_function_only() {
    let provider = LocalCloudProvider::new(Default::default())
        .with_fault("bucket", Fault::Permanent(ControlPlaneErrorKind::QuotaExceeded));
    let mut harness = Harness::new(provider);
    let graph = harness.graph(1);
    let plan = harness.plan(&graph);

    let result = harness.apply(&graph, &plan).await;
    assert!(!result.is_success());

    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].address, managed("bucket", "forms"));

    let skipped: Vec<&NodeAddress> = result.skipped.iter().map(|r| &r.address).collect();
    assert_eq!(skipped.len(), 2);
    assert!(skipped.contains(&&managed("function", "form-handler")));
    assert!(skipped.contains(&&managed("function_iam_binding", "public-invoke")));

    for binding in [
        "storage-admin",
        "storage-uploader",
        "functions-invoker",
        "logging-writer",
        "kms-user",
        "secret-reader",
    ] {
        let address = managed("role_binding", binding);
        assert!(
            result.outcome_of(&address).is_some_and(|r| r.success),
            "{} should have been created",
            address
        );
        assert!(harness.state.contains(&address));
    }
    assert!(!harness.state.contains(&managed("bucket", "forms")));

    let err = result.into_result().unwrap_err();
    assert_eq!(err.failed.len(), 1);
    assert_eq!(err.skipped.len(), 2);

    // Once the fault is gone the remaining three nodes converge
    harness.provider.clear_faults().await;
    let plan = harness.plan(&graph);
    assert_eq!(count(&plan, ActionType::Create), 3);
    let result = harness.apply(&graph, &plan).await;
    assert!(result.is_success(), "{:?}", result.failed);
}

#[tokio::test]
async fn test_transient_faults_are_retried() {
    let provider = LocalCloudProvider::new(Default::default()).with_fault(
        "subnet",
        Fault::Transient {
            kind: infraflow_cloud::TransientErrorKind::RateLimited,
            times: 2,
        },
    );
    let mut harness = Harness::new(provider);
    let graph = harness.graph(0);
    let plan = harness.plan(&graph);

    let result = harness.apply(&graph, &plan).await;
    assert!(result.is_success(), "{:?}", result.failed);
    assert!(harness.state.contains(&managed("subnet", "form-subnet")));
}

#[tokio::test]
async fn test_demo_passes_provider_validation() {
    let harness = Harness::new(LocalCloudProvider::new(Default::default()));
    let graph = harness.graph(1);
    harness.provider.validate(&graph).await.unwrap();
}
