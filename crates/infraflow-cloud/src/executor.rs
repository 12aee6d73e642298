//! Apply execution
//!
//! Runs a [`Plan`] against a [`CloudProvider`]. Independent actions run
//! concurrently up to `parallelism`; an action starts only after every action
//! it depends on has succeeded. Observed state is saved after each node.

use crate::action::{Action, ActionType, ApplyResult, Plan};
use crate::error::{CloudError, ProviderResult, Result};
use crate::provider::{CloudProvider, ObjectState, RetryConfig};
use crate::retry::with_retry;
use crate::state::{GlobalState, ResourceState, StateManager};
use infraflow_core::{NodeAddress, NodeRef, ResourceGraph, resolve_attributes};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Apply tuning
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Maximum number of node operations in flight
    pub parallelism: usize,

    /// Backoff for transient provider errors
    pub retry: RetryConfig,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            parallelism: 10,
            retry: RetryConfig::default(),
        }
    }
}

/// Control-plane calls needed for one action
enum Operation {
    Create { inputs: Value },
    Update { id: String, inputs: Value },
    Replace { id: String, inputs: Value },
    Delete { id: String },
    ReadData { inputs: Value },
    /// Drop the state entry without calling the provider
    Forget,
}

/// How an operation changes recorded state
enum Change {
    Put(ObjectState),
    Merge(ObjectState),
    Remove,
}

struct TaskOutcome {
    change: ProviderResult<Change>,
    /// The old object of a replace is already gone
    removed_old: bool,
}

impl From<ProviderResult<Change>> for TaskOutcome {
    fn from(change: ProviderResult<Change>) -> Self {
        Self {
            change,
            removed_old: false,
        }
    }
}

pub struct ApplyExecutor {
    provider: Arc<dyn CloudProvider>,
    state_manager: StateManager,
    options: ApplyOptions,
}

impl ApplyExecutor {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        state_manager: StateManager,
        options: ApplyOptions,
    ) -> Self {
        Self {
            provider,
            state_manager,
            options,
        }
    }

    /// Execute `plan`, updating and persisting `state` as nodes complete.
    ///
    /// Node failures do not make this return `Err`; they are reported in the
    /// [`ApplyResult`]. Use [`ApplyResult::into_result`] to turn a partial
    /// apply into an error. Setting `cancel` to `true` stops scheduling new
    /// operations while letting in-flight ones finish.
    ///
    /// A state save or task failure returns `Err` once in-flight operations
    /// have finished and been recorded.
    pub async fn apply(
        &self,
        graph: &ResourceGraph,
        plan: &Plan,
        state: &mut GlobalState,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ApplyResult> {
        let started = Instant::now();
        let mut result = ApplyResult::new();

        let actions: HashMap<&str, &Action> = plan
            .actions
            .iter()
            .filter(|a| a.action_type != ActionType::NoOp)
            .map(|a| (a.id.as_str(), a))
            .collect();

        let mut waiting: HashMap<&str, HashSet<&str>> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut ready: VecDeque<&str> = VecDeque::new();
        for action in plan.actions.iter().filter(|a| actions.contains_key(a.id.as_str())) {
            let deps: HashSet<&str> = action
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|d| actions.contains_key(d))
                .collect();
            for dep in &deps {
                dependents.entry(*dep).or_default().push(action.id.as_str());
            }
            if deps.is_empty() {
                ready.push_back(action.id.as_str());
            }
            waiting.insert(action.id.as_str(), deps);
        }

        let parallelism = self.options.parallelism.max(1);
        let mut finished: HashSet<&str> = HashSet::new();
        let mut inflight: HashMap<String, BTreeMap<String, Value>> = HashMap::new();
        let mut join_set: JoinSet<(String, TaskOutcome)> = JoinSet::new();
        let mut cancelled = *cancel.borrow_and_update();
        let mut cancel_open = true;
        let mut fatal: Option<CloudError> = None;

        tracing::info!(
            actions = actions.len(),
            parallelism,
            provider = self.provider.name(),
            "Starting apply"
        );

        loop {
            while !cancelled && fatal.is_none() && join_set.len() < parallelism {
                let Some(id) = ready.pop_front() else {
                    break;
                };
                let action = actions[id];
                match prepare(graph, action, state) {
                    Ok((operation, inputs)) => {
                        tracing::info!(address = %action.address, action = %action.action_type, "Starting");
                        inflight.insert(id.to_string(), inputs);

                        let provider = Arc::clone(&self.provider);
                        let retry = self.options.retry.clone();
                        let kind = action.address.kind.clone();
                        let label = id.to_string();
                        join_set.spawn(async move {
                            let outcome =
                                run_operation(provider.as_ref(), &retry, &label, &kind, operation)
                                    .await;
                            (label, outcome)
                        });
                    }
                    Err(message) => {
                        tracing::error!(address = %action.address, "{}", message);
                        result.add_failure(action, message);
                        finished.insert(id);
                        skip_dependents(id, &actions, &dependents, &mut finished, &mut result);
                    }
                }
            }

            if join_set.is_empty() {
                break;
            }

            tokio::select! {
                joined = join_set.join_next() => {
                    let Some(joined) = joined else {
                        continue;
                    };
                    let (id, outcome) = match joined {
                        Ok(joined) => joined,
                        Err(e) => {
                            tracing::error!("Apply task failed: {}", e);
                            fatal.get_or_insert(e.into());
                            continue;
                        }
                    };
                    let Some((&key, &action)) = actions.get_key_value(id.as_str()) else {
                        continue;
                    };
                    let inputs = inflight.remove(&id).unwrap_or_default();
                    finished.insert(key);

                    match outcome.change {
                        Ok(change) => {
                            record(graph, action, change, inputs, state);
                            self.persist(state, &mut fatal).await;
                            tracing::info!(address = %action.address, action = %action.action_type, "Complete");
                            result.add_success(action, action.description.clone());

                            for dependent in dependents.get(key).into_iter().flatten() {
                                if let Some(deps) = waiting.get_mut(dependent) {
                                    deps.remove(key);
                                    if deps.is_empty() && !finished.contains(dependent) {
                                        ready.push_back(*dependent);
                                    }
                                }
                            }
                        }
                        Err(error) => {
                            if outcome.removed_old {
                                state.remove_resource(&action.address);
                                self.persist(state, &mut fatal).await;
                            }
                            tracing::error!(
                                address = %action.address,
                                action = %action.action_type,
                                "Failed: {}",
                                error
                            );
                            result.add_failure(action, error.to_string());
                            skip_dependents(key, &actions, &dependents, &mut finished, &mut result);
                        }
                    }
                }
                changed = cancel.changed(), if cancel_open && !cancelled && fatal.is_none() => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            tracing::warn!(
                                in_flight = join_set.len(),
                                "Cancellation requested, waiting for in-flight operations"
                            );
                            cancelled = true;
                        }
                        Ok(()) => {}
                        Err(_) => cancel_open = false,
                    }
                }
            }
        }

        for action in plan.actions.iter() {
            if actions.contains_key(action.id.as_str()) && !finished.contains(action.id.as_str()) {
                let reason = if cancelled { "cancelled" } else { "not scheduled" };
                result.add_skipped(action, reason.to_string());
            }
        }

        if let Some(error) = fatal {
            return Err(error);
        }

        if refresh_dependencies(graph, state) {
            self.state_manager.save(state).await?;
        }

        result.cancelled = cancelled;
        result.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            duration_ms = result.duration_ms,
            "Apply finished"
        );
        Ok(result)
    }

    /// Save state, keeping the first save failure
    async fn persist(&self, state: &mut GlobalState, fatal: &mut Option<CloudError>) {
        if let Err(e) = self.state_manager.save(state).await {
            tracing::error!("Failed to save state: {}", e);
            fatal.get_or_insert(e);
        }
    }
}

/// Resolve inputs against live state and decide which calls to make
fn prepare(
    graph: &ResourceGraph,
    action: &Action,
    state: &GlobalState,
) -> std::result::Result<(Operation, BTreeMap<String, Value>), String> {
    let address = &action.address;
    let prior_id = state.get_resource(address).map(|r| r.id.clone());

    if action.action_type == ActionType::Delete {
        let operation = match prior_id {
            Some(id) if !address.is_data() => Operation::Delete { id },
            _ => Operation::Forget,
        };
        return Ok((operation, BTreeMap::new()));
    }

    let node = graph
        .node(address)
        .ok_or_else(|| format!("{} is not declared in the project", address))?;
    let resolver = |reference: &NodeRef| state.lookup(&reference.address, &reference.field);
    let resolved = resolve_attributes(address, &node.decl.attributes, &resolver)
        .map_err(|e| e.to_string())?;
    let inputs = resolved.to_json();

    let operation = match (action.action_type, prior_id) {
        _ if address.is_data() => Operation::ReadData { inputs },
        (ActionType::Update, Some(id)) => Operation::Update { id, inputs },
        (ActionType::Replace, Some(id)) => Operation::Replace { id, inputs },
        _ => Operation::Create { inputs },
    };
    Ok((operation, resolved.values))
}

async fn run_operation(
    provider: &dyn CloudProvider,
    retry: &RetryConfig,
    label: &str,
    kind: &str,
    operation: Operation,
) -> TaskOutcome {
    match operation {
        Operation::Create { inputs } => with_retry(retry, label, || provider.create(kind, &inputs))
            .await
            .map(Change::Put)
            .into(),
        Operation::Update { id, inputs } => {
            with_retry(retry, label, || provider.update(kind, &id, &inputs))
                .await
                .map(Change::Merge)
                .into()
        }
        Operation::Replace { id, inputs } => {
            let deleted = with_retry(retry, label, || provider.delete(kind, &id)).await;
            if let Err(error) = ignore_not_found(deleted) {
                return TaskOutcome::from(Err(error));
            }
            let created = with_retry(retry, label, || provider.create(kind, &inputs)).await;
            TaskOutcome {
                change: created.map(Change::Put),
                removed_old: true,
            }
        }
        Operation::Delete { id } => {
            let deleted = with_retry(retry, label, || provider.delete(kind, &id)).await;
            ignore_not_found(deleted).map(|_| Change::Remove).into()
        }
        Operation::ReadData { inputs } => {
            with_retry(retry, label, || provider.read_data(kind, &inputs))
                .await
                .map(Change::Put)
                .into()
        }
        Operation::Forget => TaskOutcome::from(Ok(Change::Remove)),
    }
}

/// Deleting something that is already gone is a success
fn ignore_not_found(result: ProviderResult<()>) -> ProviderResult<()> {
    match result {
        Err(error) if error.is_not_found() => {
            tracing::debug!("Object already deleted: {}", error);
            Ok(())
        }
        other => other,
    }
}

fn record(
    graph: &ResourceGraph,
    action: &Action,
    change: Change,
    inputs: BTreeMap<String, Value>,
    state: &mut GlobalState,
) {
    let address = &action.address;
    let dependencies = current_dependencies(graph, address);
    match change {
        Change::Put(object) => {
            state.set_resource(
                address,
                ResourceState::new(address, object, inputs).with_dependencies(dependencies),
            );
        }
        Change::Merge(object) => {
            let entry = match state.get_resource(address).cloned() {
                Some(mut entry) => {
                    entry.apply_update(object, inputs);
                    entry.with_dependencies(dependencies)
                }
                None => ResourceState::new(address, object, inputs).with_dependencies(dependencies),
            };
            state.set_resource(address, entry);
        }
        Change::Remove => {
            state.remove_resource(address);
        }
    }
}

fn current_dependencies(graph: &ResourceGraph, address: &NodeAddress) -> Vec<NodeAddress> {
    graph.dependencies(address).into_iter().cloned().collect()
}

/// Bring recorded dependencies of untouched nodes in line with the graph
fn refresh_dependencies(graph: &ResourceGraph, state: &mut GlobalState) -> bool {
    let mut changed = false;
    for node in graph.nodes().filter(|n| n.is_present()) {
        let dependencies = current_dependencies(graph, node.address());
        if let Some(entry) = state.resources.get_mut(&node.address().to_string())
            && entry.dependencies != dependencies
        {
            entry.dependencies = dependencies;
            changed = true;
        }
    }
    changed
}

/// Mark every action that transitively waits on `failed` as skipped
fn skip_dependents<'p>(
    failed: &'p str,
    actions: &HashMap<&'p str, &'p Action>,
    dependents: &HashMap<&'p str, Vec<&'p str>>,
    finished: &mut HashSet<&'p str>,
    result: &mut ApplyResult,
) {
    let failed_address = actions
        .get(failed)
        .map(|a| a.address.to_string())
        .unwrap_or_else(|| failed.to_string());
    let mut stack: Vec<&str> = dependents.get(failed).cloned().unwrap_or_default();
    while let Some(id) = stack.pop() {
        if !finished.insert(id) {
            continue;
        }
        if let Some(action) = actions.get(id) {
            tracing::warn!(address = %action.address, "Skipped: dependency {} failed", failed_address);
            result.add_skipped(action, format!("dependency {} failed", failed_address));
        }
        stack.extend(dependents.get(id).into_iter().flatten().copied());
    }
}
