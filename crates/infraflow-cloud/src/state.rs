//! State management for cloud resources
//!
//! Manages the `.infraflow/state.json` file which records, per graph node,
//! the inputs last applied and the attributes the control plane returned.

use crate::error::{CloudError, Result};
use crate::provider::ObjectState;
use chrono::{DateTime, Utc};
use infraflow_core::{Lookup, NodeAddress, NodeMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".infraflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const STATE_TMP: &str = "state.json.tmp";
const LOCK_FILE: &str = "lock.json";

/// Global state containing every materialized node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    /// State file version
    pub version: u32,

    /// Incremented on every save
    pub serial: u64,

    /// Identifies one state history across saves
    pub lineage: String,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by node address
    pub resources: BTreeMap<String, ResourceState>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a resource
    pub fn set_resource(&mut self, address: &NodeAddress, state: ResourceState) {
        self.resources.insert(address.to_string(), state);
        self.updated_at = Utc::now();
    }

    /// Remove a resource
    pub fn remove_resource(&mut self, address: &NodeAddress) -> Option<ResourceState> {
        let result = self.resources.remove(&address.to_string());
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    /// Get a resource by address
    pub fn get_resource(&self, address: &NodeAddress) -> Option<&ResourceState> {
        self.resources.get(&address.to_string())
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.resources.contains_key(&address.to_string())
    }

    /// All recorded addresses
    pub fn addresses(&self) -> Vec<NodeAddress> {
        self.resources
            .keys()
            .filter_map(|k| NodeAddress::parse(k))
            .collect()
    }

    /// Look up `address.field` in recorded state
    pub fn lookup(&self, address: &NodeAddress, field: &str) -> Lookup {
        match self.get_resource(address).and_then(|r| r.field(field)) {
            Some(value) => Lookup::Known(value),
            None => Lookup::Missing,
        }
    }
}

/// State of a single node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Provider-specific resource ID
    pub id: String,

    /// Resource kind
    pub kind: String,

    pub mode: NodeMode,

    /// Current status
    pub status: ResourceStatus,

    /// Resolved inputs at last apply
    pub inputs: BTreeMap<String, Value>,

    /// Computed attributes returned by the provider
    pub attributes: BTreeMap<String, Value>,

    /// Nodes this one depended on at last apply, used to order orphan deletes
    #[serde(default)]
    pub dependencies: Vec<NodeAddress>,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(address: &NodeAddress, object: ObjectState, inputs: BTreeMap<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: object.id,
            kind: address.kind.clone(),
            mode: address.mode,
            status: if address.is_data() {
                ResourceStatus::Read
            } else {
                ResourceStatus::Created
            },
            inputs,
            attributes: object.attributes,
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<NodeAddress>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Record an in-place update. Computed attributes the provider did not
    /// return again are kept.
    pub fn apply_update(&mut self, object: ObjectState, inputs: BTreeMap<String, Value>) {
        self.id = object.id;
        self.inputs = inputs;
        self.attributes.extend(object.attributes);
        self.status = if self.mode == NodeMode::Data {
            ResourceStatus::Read
        } else {
            ResourceStatus::Updated
        };
        self.updated_at = Utc::now();
    }

    /// Value of a field: `id`, then computed attributes, then inputs
    pub fn field(&self, name: &str) -> Option<Value> {
        if name == infraflow_core::schema::ID_FIELD {
            return Some(Value::String(self.id.clone()));
        }
        self.attributes
            .get(name)
            .or_else(|| self.inputs.get(name))
            .cloned()
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.field(key).and_then(|v| serde_json::from_value(v).ok())
    }
}

/// Status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Resource was created by the last apply that touched it
    Created,
    /// Resource was updated in place
    Updated,
    /// Data source was read
    Read,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Created => write!(f, "created"),
            ResourceStatus::Updated => write!(f, "updated"),
            ResourceStatus::Read => write!(f, "read"),
        }
    }
}

/// State manager for reading/writing state files
#[derive(Debug, Clone)]
pub struct StateManager {
    /// Project root directory
    project_root: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }

    /// Get the state directory path
    pub fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    /// Get the state file path
    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn tmp_path(&self) -> PathBuf {
        self.state_dir().join(STATE_TMP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    /// Ensure the state directory exists
    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the current state
    pub async fn load(&self) -> Result<GlobalState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(GlobalState::new());
        }

        let content = fs::read_to_string(&path).await?;
        let state: GlobalState = serde_json::from_str(&content)?;

        // Version check
        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!("Loaded state with {} resources", state.resources.len());
        Ok(state)
    }

    /// Save the state, bumping its serial
    ///
    /// The new snapshot is written to a temporary file and renamed over
    /// `state.json`, so the file on disk is always a complete snapshot.
    pub async fn save(&self, state: &mut GlobalState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let tmp = self.tmp_path();

        state.serial += 1;
        state.updated_at = Utc::now();
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, content).await?;

        if path.exists() {
            fs::copy(&path, self.backup_path()).await?;
        }
        fs::rename(&tmp, &path).await?;

        tracing::debug!(
            serial = state.serial,
            "Saved state with {} resources",
            state.resources.len()
        );
        Ok(())
    }

    /// Acquire a lock for exclusive access
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();
        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&lock_info)?;

        // One retry after removing a stale lock
        for _ in 0..2 {
            let created = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await;

            match created {
                Ok(mut file) => {
                    file.write_all(content.as_bytes()).await?;
                    file.flush().await?;
                    tracing::debug!("Acquired state lock");
                    return Ok(StateLock {
                        lock_path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    self.check_stale_lock(&lock_path).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CloudError::LockError(
            "State lock was taken while removing a stale lock".to_string(),
        ))
    }

    /// Remove the lock at `lock_path` if it is older than one hour,
    /// otherwise report who holds it
    async fn check_stale_lock(&self, lock_path: &Path) -> Result<()> {
        let content = match fs::read_to_string(lock_path).await {
            Ok(content) => content,
            // Released between our create attempt and this read
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        // A holder that has created the file but not written it yet
        let Ok(lock_info) = serde_json::from_str::<LockInfo>(&content) else {
            return Err(CloudError::LockError(
                "State is being locked by another process".to_string(),
            ));
        };

        let age = Utc::now().signed_duration_since(lock_info.acquired_at);
        if age.num_hours() < 1 {
            return Err(CloudError::LockError(format!(
                "State is locked by {} since {}",
                lock_info.holder, lock_info.acquired_at
            )));
        }

        tracing::warn!("Removing stale lock from {}", lock_info.holder);
        match fs::remove_file(lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for state lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
