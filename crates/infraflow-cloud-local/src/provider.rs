//! Local control plane provider

use crate::error::LocalCloudError;
use crate::schema::{STATIC_ACCESS_KEY, local_schema};
use crate::services::{self, folder_id};
use crate::store::CloudStore;
use async_trait::async_trait;
use infraflow_cloud::{
    AuthStatus, CloudError, CloudProvider, ControlPlaneErrorKind, ObjectState, ProviderContext,
    ProviderError, ProviderResult, ProviderSchema, TransientErrorKind,
};
use infraflow_core::{Expr, NodeAddress, ResourceGraph};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// File the CLI keeps the simulated cloud in, relative to the project root
pub const LOCAL_CLOUD_FILE: &str = ".infraflow/local-cloud.json";

/// A failure to inject into every mutating call on one kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail every call with a control-plane error
    Permanent(ControlPlaneErrorKind),
    /// Fail the next `times` calls with a transient error
    Transient { kind: TransientErrorKind, times: u32 },
}

/// One successful mutating call, in the order the control plane saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: &'static str,
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Default)]
struct Inner {
    store: CloudStore,
    faults: BTreeMap<String, Fault>,
    calls: Vec<Call>,
}

impl Inner {
    fn check_fault(&mut self, kind: &str, operation: &str) -> Result<(), LocalCloudError> {
        let Some(fault) = self.faults.get_mut(kind) else {
            return Ok(());
        };
        let message = format!("injected failure: {} {}", operation, kind);
        match fault {
            Fault::Permanent(error_kind) => Err(LocalCloudError::Injected(
                ProviderError::control_plane(*error_kind, message),
            )),
            Fault::Transient { kind: error_kind, times } => {
                let error_kind = *error_kind;
                *times = times.saturating_sub(1);
                if *times == 0 {
                    self.faults.remove(kind);
                }
                Err(LocalCloudError::Injected(ProviderError::transient(
                    error_kind, message,
                )))
            }
        }
    }

    fn record(&mut self, operation: &'static str, kind: &str, id: &str) {
        tracing::debug!(operation, kind, id, "Local control plane call");
        self.calls.push(Call {
            operation,
            kind: kind.to_string(),
            id: id.to_string(),
        });
    }
}

/// Simulated cloud that keeps every object in process
pub struct LocalCloudProvider {
    context: ProviderContext,
    schema: ProviderSchema,
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl LocalCloudProvider {
    /// Create an in-memory control plane
    pub fn new(context: ProviderContext) -> Self {
        Self {
            context,
            schema: local_schema(),
            path: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Open a control plane persisted at `path`, creating it on first write
    pub async fn open(
        context: ProviderContext,
        path: impl AsRef<Path>,
    ) -> crate::error::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = CloudStore::load(&path).await?;
        tracing::debug!(path = %path.display(), objects = store.len(), "Opened local cloud");
        Ok(Self {
            context,
            schema: local_schema(),
            path: Some(path),
            inner: Mutex::new(Inner {
                store,
                ..Inner::default()
            }),
        })
    }

    pub fn context(&self) -> &ProviderContext {
        &self.context
    }

    pub fn with_fault(mut self, kind: impl Into<String>, fault: Fault) -> Self {
        self.inner.get_mut().faults.insert(kind.into(), fault);
        self
    }

    pub async fn inject_fault(&self, kind: impl Into<String>, fault: Fault) {
        self.inner.lock().await.faults.insert(kind.into(), fault);
    }

    pub async fn clear_faults(&self) {
        self.inner.lock().await.faults.clear();
    }

    /// Successful mutating calls so far
    pub async fn calls(&self) -> Vec<Call> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn object_count(&self) -> usize {
        self.inner.lock().await.store.len()
    }

    pub async fn snapshot(&self) -> CloudStore {
        self.inner.lock().await.store.clone()
    }

    async fn persist(&self, store: &CloudStore) -> Result<(), LocalCloudError> {
        match &self.path {
            Some(path) => store.save(path).await,
            None => Ok(()),
        }
    }

    /// Run `mutation` on a copy of the store and keep the copy once it is persisted
    async fn commit<T>(
        &self,
        inner: &mut Inner,
        mutation: impl FnOnce(&mut CloudStore) -> Result<T, LocalCloudError>,
    ) -> Result<T, LocalCloudError> {
        let mut store = inner.store.clone();
        let value = mutation(&mut store)?;
        self.persist(&store).await?;
        inner.store = store;
        Ok(value)
    }
}

/// The secret each present static key writes into
fn output_secret(expr: &Expr) -> Option<&Expr> {
    match expr {
        Expr::List(items) => items.first().and_then(output_secret),
        Expr::Block(fields) => fields.get("secret_id"),
        _ => None,
    }
}

#[async_trait]
impl CloudProvider for LocalCloudProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn display_name(&self) -> &str {
        "Local Cloud (simulated)"
    }

    fn schema(&self) -> &ProviderSchema {
        &self.schema
    }

    async fn check_auth(&self) -> infraflow_cloud::Result<AuthStatus> {
        Ok(AuthStatus::ok(format!("folder {}", folder_id(&self.context))))
    }

    async fn validate(&self, graph: &ResourceGraph) -> infraflow_cloud::Result<()> {
        let mut writers: BTreeMap<String, Vec<&NodeAddress>> = BTreeMap::new();
        for node in graph.nodes() {
            if !node.is_present() || node.address().kind != STATIC_ACCESS_KEY {
                continue;
            }
            if let Some(secret) = node
                .decl
                .attributes
                .get("output_to_secret")
                .and_then(output_secret)
            {
                writers
                    .entry(serde_json::to_string(secret)?)
                    .or_default()
                    .push(node.address());
            }
        }

        if let Some(keys) = writers.values().find(|keys| keys.len() > 1) {
            let names: Vec<String> = keys.iter().map(|a| a.to_string()).collect();
            return Err(CloudError::InvalidConfig(format!(
                "static access keys {} write into the same secret",
                names.join(", ")
            )));
        }
        Ok(())
    }

    async fn create(&self, kind: &str, inputs: &Value) -> ProviderResult<ObjectState> {
        let mut inner = self.inner.lock().await;
        inner.check_fault(kind, "create")?;
        let object = self
            .commit(&mut inner, |store| {
                services::create(store, &self.context, kind, inputs)
            })
            .await?;
        inner.record("create", kind, &object.id);
        Ok(object)
    }

    async fn read(&self, kind: &str, id: &str) -> ProviderResult<Option<ObjectState>> {
        let inner = self.inner.lock().await;
        Ok(inner.store.get(kind, id).map(|o| o.to_object_state()))
    }

    async fn update(&self, kind: &str, id: &str, inputs: &Value) -> ProviderResult<ObjectState> {
        let mut inner = self.inner.lock().await;
        inner.check_fault(kind, "update")?;
        let object = self
            .commit(&mut inner, |store| services::update(store, kind, id, inputs))
            .await?;
        inner.record("update", kind, id);
        Ok(object)
    }

    async fn delete(&self, kind: &str, id: &str) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.check_fault(kind, "delete")?;
        self.commit(&mut inner, |store| services::delete(store, kind, id))
            .await?;
        inner.record("delete", kind, id);
        Ok(())
    }

    async fn read_data(&self, kind: &str, inputs: &Value) -> ProviderResult<ObjectState> {
        let mut inner = self.inner.lock().await;
        inner.check_fault(kind, "read")?;
        Ok(services::read_data(&inner.store, kind, inputs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infraflow_core::parse_kdl_string;
    use serde_json::json;
    use tempfile::tempdir;

    fn provider() -> LocalCloudProvider {
        LocalCloudProvider::new(ProviderContext::new().with_folder_id("b1g-test"))
    }

    #[tokio::test]
    async fn test_create_read_delete() {
        let cloud = provider();

        let net = cloud
            .create("network", &json!({"name": "form-net"}))
            .await
            .unwrap();
        assert_eq!(net.attributes["folder_id"], json!("b1g-test"));

        let read = cloud.read("network", &net.id).await.unwrap();
        assert_eq!(read, Some(net.clone()));
        assert_eq!(cloud.read("subnet", &net.id).await.unwrap(), None);

        cloud.delete("network", &net.id).await.unwrap();
        assert!(cloud.read("network", &net.id).await.unwrap().is_none());
        assert!(cloud.delete("network", &net.id).await.unwrap_err().is_not_found());

        let calls = cloud.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].operation, "delete");
    }

    #[tokio::test]
    async fn test_permanent_fault() {
        let cloud = provider().with_fault("bucket", Fault::Permanent(ControlPlaneErrorKind::QuotaExceeded));

        let err = cloud
            .create("bucket", &json!({"bucket": "forms"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::ControlPlane {
                kind: ControlPlaneErrorKind::QuotaExceeded,
                ..
            }
        ));
        assert_eq!(cloud.object_count().await, 0);

        cloud.clear_faults().await;
        cloud
            .create("bucket", &json!({"bucket": "forms"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transient_fault_clears_after_n_calls() {
        let cloud = provider();
        cloud
            .inject_fault(
                "network",
                Fault::Transient {
                    kind: TransientErrorKind::RateLimited,
                    times: 2,
                },
            )
            .await;

        for _ in 0..2 {
            let err = cloud.create("network", &json!({"name": "net"})).await.unwrap_err();
            assert!(err.is_transient());
        }
        cloud.create("network", &json!({"name": "net"})).await.unwrap();
    }

    #[tokio::test]
    async fn test_persisted_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCAL_CLOUD_FILE);

        let cloud = LocalCloudProvider::open(ProviderContext::new(), &path)
            .await
            .unwrap();
        let sa = cloud
            .create("service_account", &json!({"name": "form-sa"}))
            .await
            .unwrap();
        drop(cloud);

        let reopened = LocalCloudProvider::open(ProviderContext::new(), &path)
            .await
            .unwrap();
        assert!(reopened.read("service_account", &sa.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_validate_rejects_two_keys_in_one_secret() {
        let kdl = r#"
            resource "service_account" "sa" { name "sa" }
            resource "secret" "keys" { name "keys" }
            resource "static_access_key" "a" {
                service_account_id "${service_account.sa.id}"
                output_to_secret {
                    secret_id "${secret.keys.id}"
                    entry_for_access_key "A"
                    entry_for_secret_key "B"
                }
            }
            resource "static_access_key" "b" {
                service_account_id "${service_account.sa.id}"
                output_to_secret {
                    secret_id "${secret.keys.id}"
                    entry_for_access_key "C"
                    entry_for_secret_key "D"
                }
            }
        "#;
        let cloud = provider();
        let document = parse_kdl_string(kdl, "test".to_string()).unwrap();
        let graph = ResourceGraph::build(&document, cloud.schema()).unwrap();

        let err = cloud.validate(&graph).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_store_unchanged() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("cloud").join("local-cloud.json");
        let cloud = LocalCloudProvider::open(ProviderContext::new().with_folder_id("b1g-test"), &path)
            .await
            .unwrap();
        let net = cloud
            .create("network", &json!({"name": "form-net"}))
            .await
            .unwrap();

        // The directory is replaced by a file, so the next write fails
        std::fs::remove_dir_all(temp_dir.path().join("cloud")).unwrap();
        std::fs::write(temp_dir.path().join("cloud"), "").unwrap();

        assert!(cloud.create("network", &json!({"name": "other"})).await.is_err());
        assert!(cloud.delete("network", &net.id).await.is_err());
        assert_eq!(cloud.object_count().await, 1);
        assert!(cloud.read("network", &net.id).await.unwrap().is_some());
        assert_eq!(cloud.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_check_auth_reports_folder() {
        let status = provider().check_auth().await.unwrap();
        assert!(status.authenticated);
        assert_eq!(status.account_info.as_deref(), Some("folder b1g-test"));
    }
}
