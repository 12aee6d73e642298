//! Per-service request handlers
//!
//! Every handler works on a locked [`CloudStore`] and enforces the
//! referential checks of the service it simulates.

pub mod identity;
pub mod network;
pub mod secrets;
pub mod serverless;
pub mod storage;

use crate::error::{LocalCloudError, Result};
use crate::schema::*;
use crate::store::CloudStore;
use infraflow_cloud::{ObjectState, ProviderContext};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Folder used when the context does not name one
pub const DEFAULT_FOLDER: &str = "local-folder";

pub(crate) fn folder_id(context: &ProviderContext) -> &str {
    context.folder_id.as_deref().unwrap_or(DEFAULT_FOLDER)
}

pub(crate) fn folder_attributes(context: &ProviderContext) -> BTreeMap<String, Value> {
    BTreeMap::from([("folder_id".to_string(), json!(folder_id(context)))])
}

/// Lowercase letters, digits and hyphens, starting with a letter
pub(crate) fn validate_name(field: &str, name: &str) -> Result<()> {
    let valid = name.len() <= 63
        && name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-');
    if !valid {
        return Err(LocalCloudError::invalid(
            field,
            format!("'{}' is not a valid name", name),
        ));
    }
    Ok(())
}

pub fn create(
    store: &mut CloudStore,
    context: &ProviderContext,
    kind: &str,
    inputs: &Value,
) -> Result<ObjectState> {
    match kind {
        NETWORK => network::create_network(store, context, inputs),
        SUBNET => network::create_subnet(store, context, inputs),
        SERVICE_ACCOUNT => identity::create_service_account(store, context, inputs),
        ROLE_BINDING => identity::create_role_binding(store, inputs),
        SECRET => secrets::create_secret(store, context, inputs),
        STATIC_ACCESS_KEY => identity::create_static_access_key(store, inputs),
        BUCKET => storage::create_bucket(store, inputs),
        FUNCTION => serverless::create_function(store, inputs),
        FUNCTION_IAM_BINDING => serverless::create_function_iam_binding(store, inputs),
        other => Err(LocalCloudError::UnsupportedKind(other.to_string())),
    }
}

pub fn update(store: &mut CloudStore, kind: &str, id: &str, inputs: &Value) -> Result<ObjectState> {
    match kind {
        NETWORK => network::update_network(store, id, inputs),
        SUBNET => network::update_subnet(store, id, inputs),
        SERVICE_ACCOUNT => identity::update_service_account(store, id, inputs),
        ROLE_BINDING => identity::update_role_binding(store, id, inputs),
        SECRET => secrets::update_secret(store, id, inputs),
        STATIC_ACCESS_KEY => identity::update_static_access_key(store, id, inputs),
        BUCKET => storage::update_bucket(store, id, inputs),
        FUNCTION => serverless::update_function(store, id, inputs),
        FUNCTION_IAM_BINDING => serverless::update_function_iam_binding(store, id, inputs),
        other => Err(LocalCloudError::UnsupportedKind(other.to_string())),
    }
}

pub fn delete(store: &mut CloudStore, kind: &str, id: &str) -> Result<()> {
    match kind {
        NETWORK => network::delete_network(store, id),
        SUBNET => network::delete_subnet(store, id),
        SERVICE_ACCOUNT => identity::delete_service_account(store, id),
        ROLE_BINDING => identity::delete_role_binding(store, id),
        SECRET => secrets::delete_secret(store, id),
        STATIC_ACCESS_KEY => identity::delete_static_access_key(store, id),
        BUCKET => storage::delete_bucket(store, id),
        FUNCTION => serverless::delete_function(store, id),
        FUNCTION_IAM_BINDING => serverless::delete_function_iam_binding(store, id),
        other => Err(LocalCloudError::UnsupportedKind(other.to_string())),
    }
}

pub fn read_data(store: &CloudStore, kind: &str, inputs: &Value) -> Result<ObjectState> {
    match kind {
        SECRET_VERSION => secrets::read_secret_version(store, inputs),
        other => Err(LocalCloudError::UnsupportedKind(other.to_string())),
    }
}
