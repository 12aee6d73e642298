//! Object store of the simulated control plane
//!
//! Every object lives in one id-keyed map together with the inputs it was
//! created from. Secret payloads are versioned separately.

use crate::error::{LocalCloudError, Result};
use chrono::{DateTime, Utc};
use infraflow_cloud::ObjectState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: String,
    pub kind: String,
    pub inputs: Value,
    /// Attributes computed by the control plane
    pub attributes: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn input_str(&self, name: &str) -> Option<&str> {
        self.inputs.get(name).and_then(Value::as_str)
    }

    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    pub fn to_object_state(&self) -> ObjectState {
        ObjectState {
            id: self.id.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretVersion {
    pub id: String,
    pub entries: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudStore {
    pub version: u32,
    objects: BTreeMap<String, StoredObject>,
    #[serde(default)]
    secret_versions: BTreeMap<String, Vec<SecretVersion>>,
}

impl Default for CloudStore {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            objects: BTreeMap::new(),
            secret_versions: BTreeMap::new(),
        }
    }
}

/// Id in the style of the real control plane: a kind prefix plus random characters
pub fn generate_id(kind: &str) -> String {
    let prefix = match kind {
        "network" => "enp",
        "subnet" => "e9b",
        "service_account" => "aje",
        "role_binding" => "rb1",
        "secret" => "e6q",
        "secret_version" => "e6v",
        "static_access_key" => "ajk",
        "function" => "d4e",
        "function_version" => "d4v",
        "function_iam_binding" => "fib",
        _ => "obj",
    };
    let random = Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &random[..17])
}

impl CloudStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a persisted store; a missing file is an empty store
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let store: CloudStore = serde_json::from_str(&content)?;
                if store.version > STORE_VERSION {
                    return Err(LocalCloudError::Rejected(format!(
                        "local cloud file {} was written by a newer version (v{})",
                        path.display(),
                        store.version
                    )));
                }
                Ok(store)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn insert(
        &mut self,
        kind: &str,
        id: String,
        inputs: &Value,
        attributes: BTreeMap<String, Value>,
    ) -> &StoredObject {
        let now = Utc::now();
        tracing::debug!(kind, id = %id, "Stored object");
        self.objects.entry(id.clone()).or_insert(StoredObject {
            id,
            kind: kind.to_string(),
            inputs: inputs.clone(),
            attributes,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    pub fn get(&self, kind: &str, id: &str) -> Option<&StoredObject> {
        self.objects.get(id).filter(|o| o.kind == kind)
    }

    pub fn require(&self, kind: &str, id: &str) -> Result<&StoredObject> {
        self.get(kind, id)
            .ok_or_else(|| LocalCloudError::not_found(kind, id))
    }

    /// Replace the inputs of an object and merge new computed attributes
    pub fn update(
        &mut self,
        kind: &str,
        id: &str,
        inputs: &Value,
        attributes: BTreeMap<String, Value>,
    ) -> Result<&StoredObject> {
        let object = self
            .objects
            .get_mut(id)
            .filter(|o| o.kind == kind)
            .ok_or_else(|| LocalCloudError::not_found(kind, id))?;
        object.inputs = inputs.clone();
        object.attributes.extend(attributes);
        object.updated_at = Utc::now();
        Ok(object)
    }

    pub fn remove(&mut self, kind: &str, id: &str) -> Result<StoredObject> {
        if self.get(kind, id).is_none() {
            return Err(LocalCloudError::not_found(kind, id));
        }
        self.objects
            .remove(id)
            .ok_or_else(|| LocalCloudError::not_found(kind, id))
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a StoredObject> + 'a {
        self.objects.values().filter(move |o| o.kind == kind)
    }

    pub fn add_secret_version(
        &mut self,
        secret_id: &str,
        entries: BTreeMap<String, String>,
    ) -> &SecretVersion {
        let versions = self.secret_versions.entry(secret_id.to_string()).or_default();
        versions.push(SecretVersion {
            id: generate_id("secret_version"),
            entries,
            created_at: Utc::now(),
        });
        &versions[versions.len() - 1]
    }

    pub fn current_version(&self, secret_id: &str) -> Option<&SecretVersion> {
        self.secret_versions.get(secret_id).and_then(|v| v.last())
    }

    pub fn secret_version(&self, secret_id: &str, version_id: &str) -> Option<&SecretVersion> {
        self.secret_versions
            .get(secret_id)
            .and_then(|versions| versions.iter().find(|v| v.id == version_id))
    }

    pub fn remove_secret_versions(&mut self, secret_id: &str) {
        self.secret_versions.remove(secret_id);
    }
}
