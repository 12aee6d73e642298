//! Plan evaluation
//!
//! Diffs a [`ResourceGraph`] against the observed [`GlobalState`] and
//! produces an ordered [`Plan`]. Planning is read-only: it never talks to the
//! control plane.

use crate::action::{Action, ActionType, AttributeChange, Plan};
use crate::error::{CloudError, Result};
use crate::state::GlobalState;
use infraflow_core::schema::ID_FIELD;
use infraflow_core::{
    Lookup, NodeAddress, NodeRef, ProviderSchema, Resolved, ResolvedAttributes, ResourceGraph,
    ResourceSchema, resolve_attributes,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Per-node decision before actions are linked and ordered
struct Planned {
    action_type: ActionType,
    changes: Vec<AttributeChange>,
    desired: Option<ResolvedAttributes>,
}

impl Planned {
    fn delete() -> Self {
        Self {
            action_type: ActionType::Delete,
            changes: Vec::new(),
            desired: None,
        }
    }

    fn is_change(&self) -> bool {
        self.action_type != ActionType::NoOp
    }
}

/// Computes plans for one graph
pub struct PlanEvaluator<'a> {
    graph: &'a ResourceGraph,
    schema: &'a ProviderSchema,
}

impl<'a> PlanEvaluator<'a> {
    pub fn new(graph: &'a ResourceGraph, schema: &'a ProviderSchema) -> Self {
        Self { graph, schema }
    }

    /// Plan the changes needed to reconcile `state` with the graph
    pub fn plan(&self, state: &GlobalState) -> Result<Plan> {
        let mut planned: BTreeMap<NodeAddress, Planned> = BTreeMap::new();

        for node in self.graph.nodes() {
            let address = node.address();
            let prior = state.get_resource(address);

            if !node.is_present() {
                if prior.is_some() {
                    planned.insert(address.clone(), Planned::delete());
                }
                continue;
            }

            let resolver = |reference: &NodeRef| self.lookup(&planned, state, reference);
            let desired = resolve_attributes(address, &node.decl.attributes, &resolver)?;
            let kind_schema = self.schema.get(address.mode, &address.kind);

            let entry = match prior {
                None => Planned {
                    action_type: ActionType::Create,
                    changes: creation_changes(&desired),
                    desired: Some(desired),
                },
                Some(prior) => {
                    let changes = diff_inputs(kind_schema, address, &desired, &prior.inputs);
                    // Data sources are re-read whenever something upstream changes
                    let upstream_changed = address.is_data()
                        && self
                            .graph
                            .dependencies(address)
                            .into_iter()
                            .any(|d| planned.get(d).is_some_and(Planned::is_change));

                    let action_type = if changes.is_empty() && !upstream_changed {
                        ActionType::NoOp
                    } else if changes.iter().any(|c| c.forces_replacement) {
                        ActionType::Replace
                    } else {
                        ActionType::Update
                    };
                    Planned {
                        action_type,
                        changes,
                        desired: Some(desired),
                    }
                }
            };

            tracing::debug!(address = %address, action = %entry.action_type, "Planned node");
            planned.insert(address.clone(), entry);
        }

        // Entries whose declaration was removed from the project
        for address in state.addresses() {
            if self.graph.node(&address).is_none() {
                tracing::debug!(address = %address, "Planned orphan delete");
                planned.insert(address, Planned::delete());
            }
        }

        self.link(planned, state)
    }

    /// Plan the removal of everything recorded in `state`
    pub fn plan_destroy(&self, state: &GlobalState) -> Result<Plan> {
        let planned = state
            .addresses()
            .into_iter()
            .map(|address| (address, Planned::delete()))
            .collect();
        self.link(planned, state)
    }

    /// Value of `reference` as far as it is known before apply
    fn lookup(
        &self,
        planned: &BTreeMap<NodeAddress, Planned>,
        state: &GlobalState,
        reference: &NodeRef,
    ) -> Lookup {
        let target = &reference.address;
        let Some(entry) = planned.get(target) else {
            return state.lookup(target, &reference.field);
        };

        match entry.action_type {
            ActionType::Create | ActionType::Replace => Lookup::Unknown,
            ActionType::Update if target.is_data() => Lookup::Unknown,
            ActionType::Update => {
                if reference.field == ID_FIELD {
                    return state.lookup(target, &reference.field);
                }
                let computed = self
                    .schema
                    .get(target.mode, &target.kind)
                    .is_some_and(|s| s.is_computed(&reference.field));
                match entry.desired.as_ref().and_then(|d| d.get(&reference.field)) {
                    Some(value) if !computed => Lookup::Known(value.clone()),
                    _ => Lookup::Unknown,
                }
            }
            ActionType::NoOp | ActionType::Delete => state.lookup(target, &reference.field),
        }
    }

    /// Link per-node decisions into actions with dependencies, in execution order
    fn link(&self, planned: BTreeMap<NodeAddress, Planned>, state: &GlobalState) -> Result<Plan> {
        let action_type_of = |a: &NodeAddress| planned.get(a).map(|p| p.action_type);

        // action -> actions it waits for
        let mut waits: BTreeMap<NodeAddress, BTreeSet<NodeAddress>> = BTreeMap::new();

        for (address, entry) in &planned {
            if matches!(
                entry.action_type,
                ActionType::Create | ActionType::Update | ActionType::Replace
            ) {
                for dependency in self.graph.dependencies(address) {
                    if planned.get(dependency).is_some_and(Planned::is_change) {
                        waits
                            .entry(address.clone())
                            .or_default()
                            .insert(dependency.clone());
                    }
                }
            }
        }

        for (address, entry) in &planned {
            if !entry.is_change() {
                continue;
            }
            let mut dependencies: BTreeSet<NodeAddress> = self
                .graph
                .dependencies(address)
                .into_iter()
                .cloned()
                .collect();
            if let Some(recorded) = state.get_resource(address) {
                dependencies.extend(recorded.dependencies.iter().cloned());
            }

            for dependency in dependencies {
                let waiter = match action_type_of(&dependency) {
                    // A delete waits for every change of the nodes that use it
                    Some(ActionType::Delete) => true,
                    // and so does the destroy half of a replace
                    Some(ActionType::Replace) => entry.action_type == ActionType::Delete,
                    _ => false,
                };
                if waiter && dependency != *address {
                    waits.entry(dependency).or_default().insert(address.clone());
                }
            }
        }

        let order = self.order(&planned, &waits)?;

        let actions = order
            .into_iter()
            .filter_map(|address| {
                let entry = planned.get(&address)?;
                let mut action = Action::new(entry.action_type, address.clone());
                action.changes = entry.changes.clone();
                if let Some(deps) = waits.get(&address) {
                    action.depends_on = deps
                        .iter()
                        .filter_map(|d| action_type_of(d).map(|t| Action::id_for(t, d)))
                        .collect();
                }
                Some(action)
            })
            .collect();

        let plan = Plan::new(actions);
        tracing::info!(summary = %plan.summary(), "Plan computed");
        Ok(plan)
    }

    /// Kahn's algorithm over action dependencies. Deletes go first in reverse
    /// graph order, then everything else in forward graph order.
    fn order(
        &self,
        planned: &BTreeMap<NodeAddress, Planned>,
        waits: &BTreeMap<NodeAddress, BTreeSet<NodeAddress>>,
    ) -> Result<Vec<NodeAddress>> {
        let topo = self.graph.topological_order();
        let rank = |address: &NodeAddress| -> (u8, usize) {
            let position = topo.iter().position(|a| a == address);
            match planned.get(address).map(|p| p.action_type) {
                Some(ActionType::Delete) => (0, usize::MAX - position.map_or(0, |p| p + 1)),
                _ => (1, position.unwrap_or(usize::MAX)),
            }
        };

        let mut remaining: BTreeMap<&NodeAddress, usize> = planned
            .keys()
            .map(|a| (a, waits.get(a).map_or(0, BTreeSet::len)))
            .collect();
        let mut ready: BTreeSet<((u8, usize), NodeAddress)> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(a, _)| (rank(a), (*a).clone()))
            .collect();

        let mut ordered = Vec::with_capacity(planned.len());
        while let Some((_, address)) = ready.pop_first() {
            for (waiter, deps) in waits {
                if deps.contains(&address)
                    && let Some(count) = remaining.get_mut(waiter)
                {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert((rank(waiter), waiter.clone()));
                    }
                }
            }
            ordered.push(address);
        }

        if ordered.len() != planned.len() {
            let stuck: Vec<String> = remaining
                .iter()
                .filter(|(_, n)| **n > 0)
                .map(|(a, _)| a.to_string())
                .collect();
            return Err(CloudError::InvalidConfig(format!(
                "action dependencies form a cycle: {}",
                stuck.join(", ")
            )));
        }
        Ok(ordered)
    }
}

/// Every attribute of a new node is a change from nothing
fn creation_changes(desired: &ResolvedAttributes) -> Vec<AttributeChange> {
    let known = desired.values.iter().map(|(name, value)| AttributeChange {
        name: name.clone(),
        before: None,
        after: Some(value.clone()),
        unknown: false,
        forces_replacement: false,
    });
    let unknown = desired.unknown.iter().map(|name| AttributeChange {
        name: name.clone(),
        before: None,
        after: None,
        unknown: true,
        forces_replacement: false,
    });
    known.chain(unknown).collect()
}

/// Compare resolved inputs with the inputs recorded at last apply
fn diff_inputs(
    schema: Option<&ResourceSchema>,
    address: &NodeAddress,
    desired: &ResolvedAttributes,
    prior: &BTreeMap<String, Value>,
) -> Vec<AttributeChange> {
    let forces = |name: &str| !address.is_data() && schema.is_some_and(|s| s.requires_replace(name));
    let mut changes = Vec::new();

    for (name, value) in &desired.values {
        if prior.get(name) != Some(value) {
            changes.push(AttributeChange {
                name: name.clone(),
                before: prior.get(name).cloned(),
                after: Some(value.clone()),
                unknown: false,
                forces_replacement: forces(name),
            });
        }
    }
    for name in &desired.unknown {
        changes.push(AttributeChange {
            name: name.clone(),
            before: prior.get(name).cloned(),
            after: None,
            unknown: true,
            forces_replacement: forces(name),
        });
    }
    for (name, value) in prior {
        if !desired.values.contains_key(name) && !desired.unknown.contains(name) {
            changes.push(AttributeChange {
                name: name.clone(),
                before: Some(value.clone()),
                after: None,
                unknown: false,
                forces_replacement: forces(name),
            });
        }
    }

    changes.sort_by(|a, b| a.name.cmp(&b.name));
    changes
}

/// An `output` evaluated against observed state
#[derive(Debug, Clone, Serialize)]
pub struct OutputValue {
    pub name: String,
    /// `None` when the referenced node is not materialized
    pub value: Option<Value>,
    pub sensitive: bool,
}

/// Evaluate every output of the graph against `state`
pub fn evaluate_outputs(graph: &ResourceGraph, state: &GlobalState) -> Vec<OutputValue> {
    let resolver = |reference: &NodeRef| state.lookup(&reference.address, &reference.field);
    graph
        .outputs()
        .iter()
        .map(|output| OutputValue {
            name: output.name.clone(),
            value: match output.value.resolve(&resolver) {
                Ok(Resolved::Known(value)) => Some(value),
                _ => None,
            },
            sensitive: output.sensitive,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ObjectState;
    use crate::state::ResourceState;
    use infraflow_core::{LocalOverrides, parse_kdl_string_with_overrides};
    use serde_json::json;

    const PROJECT: &str = r#"
        locals {
            enabled 1
            cidr "10.2.0.0/16"
        }

        resource "network" "net" {
            name "net"
        }

        resource "subnet" "sub" {
            network_id "${network.net.id}"
            v4_cidr_blocks "${local.cidr}"
        }

        resource "service_account" "sa" {
            name "sa"
        }

        resource "role_binding" "admin" {
            role "storage.admin"
            member "serviceAccount:${service_account.sa.id}"
        }

        resource "bucket" "forms" {
            bucket "forms"
            depends_on "role_binding.admin"
        }

        resource "function" "handler" {
            count "${local.enabled}"
            bucket "${bucket.forms.bucket}"
            service_account_id "${service_account.sa.id}"
        }

        data "secret_version" "current" {
            secret_id "${network.net.id}"
        }

        output "function_id" {
            value "${function.handler.id}"
        }
    "#;

    fn schema() -> ProviderSchema {
        ProviderSchema::new()
            .with_resource("network", ResourceSchema::new().required(["name"]))
            .with_resource(
                "subnet",
                ResourceSchema::new()
                    .required(["network_id"])
                    .force_new(["network_id", "v4_cidr_blocks"]),
            )
            .with_resource("service_account", ResourceSchema::new())
            .with_resource("role_binding", ResourceSchema::new().force_new(["role", "member"]))
            .with_resource("bucket", ResourceSchema::new().force_new(["bucket"]))
            .with_resource("function", ResourceSchema::new().computed(["version_id"]))
            .with_data_source("secret_version", ResourceSchema::new().computed(["version_id"]))
    }

    fn graph_with(overrides: &[(&str, Value)]) -> ResourceGraph {
        let overrides: LocalOverrides = overrides
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let doc = parse_kdl_string_with_overrides(PROJECT, "test".to_string(), &overrides).unwrap();
        ResourceGraph::build(&doc, &schema()).unwrap()
    }

    /// Apply a plan to state the way a provider that echoes inputs would
    fn settle(graph: &ResourceGraph, plan: &Plan, state: &mut GlobalState) {
        for action in &plan.actions {
            match action.action_type {
                ActionType::NoOp => {}
                ActionType::Delete => {
                    state.remove_resource(&action.address);
                }
                _ => {
                    let node = graph.node(&action.address).unwrap();
                    let resolver = |r: &NodeRef| state.lookup(&r.address, &r.field);
                    let inputs =
                        resolve_attributes(&action.address, &node.decl.attributes, &resolver)
                            .unwrap();
                    let object = ObjectState::new(format!("id-{}", action.address))
                        .with_attribute("version_id", json!("v1"));
                    let entry = ResourceState::new(&action.address, object, inputs.values)
                        .with_dependencies(
                            graph
                                .dependencies(&action.address)
                                .into_iter()
                                .cloned()
                                .collect(),
                        );
                    state.set_resource(&action.address, entry);
                }
            }
        }
    }

    fn address(s: &str) -> NodeAddress {
        NodeAddress::parse(s).unwrap()
    }

    #[test]
    fn test_empty_state_creates_everything_in_order() {
        let graph = graph_with(&[]);
        let plan = PlanEvaluator::new(&graph, &schema()).plan(&GlobalState::new()).unwrap();

        assert_eq!(plan.summary().create, 7);
        for action in &plan.actions {
            let position = plan.position(&action.address).unwrap();
            for dependency in graph.dependencies(&action.address) {
                assert!(plan.position(dependency).unwrap() < position);
            }
        }

        let subnet = plan.action_for(&address("subnet.sub")).unwrap();
        assert_eq!(subnet.depends_on, vec!["create-network.net".to_string()]);
        assert!(
            subnet
                .changes
                .iter()
                .any(|c| c.name == "network_id" && c.unknown)
        );
    }

    #[test]
    fn test_replan_after_apply_is_noop() {
        let graph = graph_with(&[]);
        let schema = schema();
        let evaluator = PlanEvaluator::new(&graph, &schema);
        let mut state = GlobalState::new();

        let plan = evaluator.plan(&state).unwrap();
        settle(&graph, &plan, &mut state);

        let again = evaluator.plan(&state).unwrap();
        assert!(!again.has_changes);
        assert_eq!(again.summary().no_change, 7);
        assert!(again.actions.iter().all(|a| a.depends_on.is_empty()));
    }

    #[test]
    fn test_absent_node_is_not_created() {
        let graph = graph_with(&[("enabled", json!(0))]);
        let plan = PlanEvaluator::new(&graph, &schema()).plan(&GlobalState::new()).unwrap();

        assert_eq!(plan.summary().create, 6);
        assert!(plan.action_for(&address("function.handler")).is_none());
    }

    #[test]
    fn test_disabling_node_deletes_it() {
        let schema = schema();
        let mut state = GlobalState::new();
        let enabled = graph_with(&[]);
        let plan = PlanEvaluator::new(&enabled, &schema).plan(&state).unwrap();
        settle(&enabled, &plan, &mut state);

        let disabled = graph_with(&[("enabled", json!(0))]);
        let plan = PlanEvaluator::new(&disabled, &schema).plan(&state).unwrap();
        let summary = plan.summary();
        assert_eq!(summary.delete, 1);
        assert_eq!(summary.no_change, 6);
        assert_eq!(plan.actions[0].id, "delete-function.handler");
    }

    #[test]
    fn test_force_new_change_replaces_and_propagates() {
        let schema = schema();
        let mut state = GlobalState::new();
        let graph = graph_with(&[]);
        let plan = PlanEvaluator::new(&graph, &schema).plan(&state).unwrap();
        settle(&graph, &plan, &mut state);

        let changed = graph_with(&[("cidr", json!("10.3.0.0/16"))]);
        let plan = PlanEvaluator::new(&changed, &schema).plan(&state).unwrap();

        let subnet = plan.action_for(&address("subnet.sub")).unwrap();
        assert_eq!(subnet.action_type, ActionType::Replace);
        assert_eq!(subnet.replacement_reasons(), vec!["v4_cidr_blocks"]);
        assert_eq!(plan.summary().replace, 1);
        assert_eq!(plan.summary().no_change, 6);
    }

    #[test]
    fn test_orphan_deleted_before_its_dependencies() {
        let schema = schema();
        let graph = graph_with(&[]);
        let mut state = GlobalState::new();
        let plan = PlanEvaluator::new(&graph, &schema).plan(&state).unwrap();
        settle(&graph, &plan, &mut state);

        // Declaration removed; it used to depend on the subnet
        let orphan = NodeAddress::managed("function", "legacy");
        state.set_resource(
            &orphan,
            ResourceState::new(&orphan, ObjectState::new("fn-old"), BTreeMap::new())
                .with_dependencies(vec![address("subnet.sub")]),
        );

        let plan = PlanEvaluator::new(&graph, &schema).plan(&state).unwrap();
        assert_eq!(plan.summary().delete, 1);
        assert_eq!(plan.actions[0].address, orphan);
    }

    #[test]
    fn test_destroy_respects_explicit_edge() {
        let schema = schema();
        let graph = graph_with(&[]);
        let mut state = GlobalState::new();
        let plan = PlanEvaluator::new(&graph, &schema).plan(&state).unwrap();
        settle(&graph, &plan, &mut state);

        let destroy = PlanEvaluator::new(&graph, &schema)
            .plan_destroy(&state)
            .unwrap();
        assert_eq!(destroy.summary().delete, 7);

        let bucket = destroy.position(&address("bucket.forms")).unwrap();
        let binding = destroy.position(&address("role_binding.admin")).unwrap();
        let function = destroy.position(&address("function.handler")).unwrap();
        assert!(function < bucket);
        assert!(bucket < binding);

        let binding_action = destroy.action_for(&address("role_binding.admin")).unwrap();
        assert!(
            binding_action
                .depends_on
                .contains(&"delete-bucket.forms".to_string())
        );
    }

    #[test]
    fn test_unresolved_reference_error() {
        let schema = schema();
        let doc = infraflow_core::parse_kdl_string(
            r#"
            resource "service_account" "sa" {}
            resource "function" "handler" {
                service_account_id "${service_account.sa.id}"
            }
            resource "function" "mirror" {
                source_version "${function.handler.version_id}"
            }
            "#,
            "test".to_string(),
        )
        .unwrap();
        let graph = ResourceGraph::build(&doc, &schema).unwrap();

        // handler is unchanged but its state never recorded version_id
        let sa = address("service_account.sa");
        let handler = address("function.handler");
        let mut inputs = BTreeMap::new();
        inputs.insert("service_account_id".to_string(), json!("sa-1"));
        let mut state = GlobalState::new();
        state.set_resource(
            &sa,
            ResourceState::new(&sa, ObjectState::new("sa-1"), BTreeMap::new()),
        );
        state.set_resource(
            &handler,
            ResourceState::new(&handler, ObjectState::new("fn-1"), inputs),
        );

        let err = PlanEvaluator::new(&graph, &schema).plan(&state).unwrap_err();
        match err {
            CloudError::Flow(flow) => {
                assert!(!flow.is_static());
                assert!(flow.to_string().contains("function.handler.version_id"));
            }
            other => panic!("expected unresolved reference, got {:?}", other),
        }
    }

    #[test]
    fn test_data_source_rereads_when_upstream_changes() {
        let schema = schema();
        let graph = graph_with(&[]);
        let mut state = GlobalState::new();
        let plan = PlanEvaluator::new(&graph, &schema).plan(&state).unwrap();
        assert_eq!(
            plan.action_for(&address("data.secret_version.current"))
                .unwrap()
                .description,
            "read data.secret_version.current"
        );
        settle(&graph, &plan, &mut state);

        // Renaming the network updates it in place and forces a re-read
        let net = address("network.net");
        let mut entry = state.get_resource(&net).unwrap().clone();
        entry.inputs.insert("name".to_string(), json!("old"));
        state.set_resource(&net, entry);

        let plan = PlanEvaluator::new(&graph, &schema).plan(&state).unwrap();
        let data = plan
            .action_for(&address("data.secret_version.current"))
            .unwrap();
        assert_eq!(data.action_type, ActionType::Update);
        assert_eq!(data.depends_on, vec!["update-network.net".to_string()]);
        // subnet only reads the network id, which is stable
        assert_eq!(
            plan.action_for(&address("subnet.sub")).unwrap().action_type,
            ActionType::NoOp
        );
    }

    #[test]
    fn test_evaluate_outputs() {
        let schema = schema();
        let graph = graph_with(&[]);
        let mut state = GlobalState::new();
        assert_eq!(evaluate_outputs(&graph, &state)[0].value, None);

        let plan = PlanEvaluator::new(&graph, &schema).plan(&state).unwrap();
        settle(&graph, &plan, &mut state);

        let outputs = evaluate_outputs(&graph, &state);
        assert_eq!(outputs[0].name, "function_id");
        assert_eq!(outputs[0].value, Some(json!("id-function.handler")));
    }
}
