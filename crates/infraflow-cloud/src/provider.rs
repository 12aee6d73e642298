//! Cloud provider trait definition

use crate::error::{ProviderResult, Result};
use async_trait::async_trait;
use infraflow_core::{ProviderSchema, ResourceGraph};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Cloud provider abstraction trait
///
/// A provider is a thin per-kind CRUD surface over a control plane. Diffing,
/// ordering and state bookkeeping live in the engine; a provider only has to
/// know how to create, read, update and delete one object of a given kind.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "local-cloud")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Kinds this provider understands, with their required/computed attributes
    fn schema(&self) -> &ProviderSchema;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Provider-specific checks on the whole graph, run before planning
    async fn validate(&self, _graph: &ResourceGraph) -> Result<()> {
        Ok(())
    }

    /// Create an object and return its computed attributes
    async fn create(&self, kind: &str, inputs: &Value) -> ProviderResult<ObjectState>;

    /// Read an object; `None` if it no longer exists
    async fn read(&self, kind: &str, id: &str) -> ProviderResult<Option<ObjectState>>;

    /// Update an object in place
    async fn update(&self, kind: &str, id: &str, inputs: &Value) -> ProviderResult<ObjectState>;

    /// Delete an object
    async fn delete(&self, kind: &str, id: &str) -> ProviderResult<()>;

    /// Evaluate a data source
    async fn read_data(&self, kind: &str, inputs: &Value) -> ProviderResult<ObjectState>;
}

/// Observed state of a single control-plane object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectState {
    /// Provider-assigned identifier
    pub id: String,

    /// Computed attributes
    pub attributes: BTreeMap<String, Value>,
}

impl ObjectState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Where a provider talks to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderContext {
    /// Folder (project) that owns every created object
    pub folder_id: Option<String>,

    /// Default availability zone
    pub zone: Option<String>,

    /// Control-plane endpoint override
    pub endpoint: Option<String>,

    /// Credential profile name
    pub profile: Option<String>,
}

impl ProviderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folder_id(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
