//! State refresh
//!
//! Reconciles recorded state with what the control plane reports before a
//! plan, so drift (objects deleted out of band, changed computed attributes)
//! shows up in the next plan instead of failing the apply.

use crate::error::{CloudError, Result};
use crate::provider::{CloudProvider, RetryConfig};
use crate::retry::with_retry;
use crate::state::GlobalState;
use infraflow_core::NodeAddress;

/// What a refresh changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Entries whose object no longer exists
    pub removed: Vec<NodeAddress>,

    /// Entries whose computed attributes changed
    pub updated: Vec<NodeAddress>,
}

impl RefreshReport {
    pub fn has_drift(&self) -> bool {
        !self.removed.is_empty() || !self.updated.is_empty()
    }
}

/// Read every managed entry back from the provider and update `state` in memory.
///
/// Data sources are left alone; they are re-read by the plan when needed.
pub async fn refresh_state(
    provider: &dyn CloudProvider,
    retry: &RetryConfig,
    state: &mut GlobalState,
) -> Result<RefreshReport> {
    let mut report = RefreshReport::default();

    for address in state.addresses() {
        if address.is_data() {
            continue;
        }
        let Some(entry) = state.get_resource(&address) else {
            continue;
        };
        let id = entry.id.clone();
        let label = format!("read-{}", address);

        let observed = with_retry(retry, &label, || provider.read(&address.kind, &id))
            .await
            .map_err(|e| CloudError::StateError(format!("failed to refresh {}: {}", address, e)))?;

        match observed {
            None => {
                tracing::warn!(address = %address, id = %id, "Object disappeared, removing from state");
                state.remove_resource(&address);
                report.removed.push(address);
            }
            Some(object) => {
                let Some(mut entry) = state.get_resource(&address).cloned() else {
                    continue;
                };
                let changed = object
                    .attributes
                    .iter()
                    .any(|(k, v)| entry.attributes.get(k) != Some(v));
                if changed {
                    tracing::info!(address = %address, "Computed attributes drifted");
                    entry.attributes.extend(object.attributes);
                    state.set_resource(&address, entry);
                    report.updated.push(address);
                }
            }
        }
    }

    tracing::debug!(
        removed = report.removed.len(),
        updated = report.updated.len(),
        "Refreshed state"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderResult;
    use crate::provider::{AuthStatus, ObjectState};
    use crate::state::ResourceState;
    use async_trait::async_trait;
    use infraflow_core::ProviderSchema;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;

    /// Knows a single bucket whose size has grown
    struct DriftProvider {
        schema: ProviderSchema,
    }

    #[async_trait]
    impl CloudProvider for DriftProvider {
        fn name(&self) -> &str {
            "drift"
        }

        fn display_name(&self) -> &str {
            "Drift"
        }

        fn schema(&self) -> &ProviderSchema {
            &self.schema
        }

        async fn check_auth(&self) -> Result<AuthStatus> {
            Ok(AuthStatus::ok("drift"))
        }

        async fn create(&self, _kind: &str, _inputs: &Value) -> ProviderResult<ObjectState> {
            unreachable!()
        }

        async fn read(&self, _kind: &str, id: &str) -> ProviderResult<Option<ObjectState>> {
            Ok((id == "bkt-1").then(|| ObjectState::new(id).with_attribute("size", json!(20))))
        }

        async fn update(&self, _kind: &str, _id: &str, _inputs: &Value) -> ProviderResult<ObjectState> {
            unreachable!()
        }

        async fn delete(&self, _kind: &str, _id: &str) -> ProviderResult<()> {
            unreachable!()
        }

        async fn read_data(&self, _kind: &str, _inputs: &Value) -> ProviderResult<ObjectState> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_refresh_detects_drift() {
        let provider = DriftProvider {
            schema: ProviderSchema::new(),
        };

        let bucket = NodeAddress::managed("bucket", "forms");
        let network = NodeAddress::managed("network", "net");
        let data = NodeAddress::data("secret_version", "keys");

        let mut state = GlobalState::new();
        state.set_resource(
            &bucket,
            ResourceState::new(
                &bucket,
                ObjectState::new("bkt-1").with_attribute("size", json!(10)),
                BTreeMap::new(),
            ),
        );
        state.set_resource(
            &network,
            ResourceState::new(&network, ObjectState::new("net-1"), BTreeMap::new()),
        );
        state.set_resource(
            &data,
            ResourceState::new(&data, ObjectState::new("ver-1"), BTreeMap::new()),
        );

        let report = refresh_state(&provider, &RetryConfig::immediate(1), &mut state)
            .await
            .unwrap();

        assert!(report.has_drift());
        assert_eq!(report.removed, vec![network.clone()]);
        assert_eq!(report.updated, vec![bucket.clone()]);
        assert!(!state.contains(&network));
        assert!(state.contains(&data));
        assert_eq!(
            state.get_resource(&bucket).unwrap().field("size"),
            Some(json!(20))
        );
    }
}
