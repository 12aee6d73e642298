//! InfraFlow Local Cloud Provider
//!
//! A simulated control plane that implements
//! [`CloudProvider`](infraflow_cloud::CloudProvider) without touching a real
//! cloud. It keeps the same referential rules a real folder enforces, so
//! plans that work here fail for the same reasons they would fail remotely.
//!
//! # Features
//!
//! - Identity: service accounts, role bindings and static access keys
//! - Secrets: versioned secrets, read through the `secret_version` data source
//! - Network: networks and subnets with CIDR validation
//! - Storage: buckets with quotas, credentials and grants
//! - Serverless: functions and invocation bindings
//! - Fault injection for tests (permanent or transient failures per kind)
//!
//! # Storage
//!
//! The CLI persists the simulated cloud to `.infraflow/local-cloud.json`.
//! Tests use the in-memory variant.
//!
//! # Example
//!
//! ```no_run
//! use infraflow_cloud::{CloudProvider, ProviderContext};
//! use infraflow_cloud_local::LocalCloudProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let context = ProviderContext::new().with_folder_id("b1g-form-sink");
//! let provider = LocalCloudProvider::open(context, ".infraflow/local-cloud.json").await?;
//!
//! let status = provider.check_auth().await?;
//! println!("{:?}", status.account_info);
//! # Ok(())
//! # }
//! ```

pub mod error;
mod inputs;
pub mod provider;
pub mod schema;
pub mod services;
pub mod store;

pub use error::{LocalCloudError, Result};
pub use provider::{Call, Fault, LOCAL_CLOUD_FILE, LocalCloudProvider};
pub use schema::local_schema;
pub use store::{CloudStore, SecretVersion, StoredObject};
