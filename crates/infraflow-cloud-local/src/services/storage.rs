//! Object storage buckets
//!
//! A bucket created with static credentials is owned by the key's service
//! account. Creating it needs a storage role on that account, and deleting
//! it needs `storage.admin` to still be granted.

use super::identity::{find_key, has_folder_role};
use crate::error::{LocalCloudError, Result};
use crate::inputs::Inputs;
use crate::schema::{BUCKET, SERVICE_ACCOUNT};
use crate::store::{CloudStore, StoredObject};
use infraflow_cloud::ObjectState;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Largest `max_size` a single bucket may reserve (1 TiB)
pub const MAX_BUCKET_SIZE: i64 = 1 << 40;

const ADMIN_ROLE: &str = "storage.admin";
const WRITE_ROLES: &[&str] = &[ADMIN_ROLE, "storage.editor"];
const PERMISSIONS: &[&str] = &["READ", "WRITE", "FULL_CONTROL"];

pub fn create_bucket(store: &mut CloudStore, inputs: &Value) -> Result<ObjectState> {
    let name = Inputs::new(inputs).str("bucket")?;
    validate_bucket_name(name)?;
    if store.contains_id(name) {
        return Err(LocalCloudError::Conflict(format!(
            "bucket '{}' already exists",
            name
        )));
    }
    check_bucket(store, inputs, WRITE_ROLES)?;

    let attributes = BTreeMap::from([(
        "bucket_domain_name".to_string(),
        json!(format!("{}.storage.local", name)),
    )]);
    Ok(store
        .insert(BUCKET, name.to_string(), inputs, attributes)
        .to_object_state())
}

pub fn update_bucket(store: &mut CloudStore, id: &str, inputs: &Value) -> Result<ObjectState> {
    store.require(BUCKET, id)?;
    check_bucket(store, inputs, WRITE_ROLES)?;
    Ok(store
        .update(BUCKET, id, inputs, BTreeMap::new())?
        .to_object_state())
}

pub fn delete_bucket(store: &mut CloudStore, id: &str) -> Result<()> {
    let bucket = store.require(BUCKET, id)?;
    if let Some(access_key) = bucket.input_str("access_key") {
        let owner = key_owner(store, access_key).ok_or_else(|| {
            LocalCloudError::PermissionDenied(format!(
                "credentials of bucket '{}' no longer exist",
                id
            ))
        })?;
        if !has_folder_role(store, &owner, &[ADMIN_ROLE]) {
            return Err(LocalCloudError::PermissionDenied(format!(
                "deleting bucket '{}' requires {} on service account {}",
                id, ADMIN_ROLE, owner
            )));
        }
    }
    store.remove(BUCKET, id)?;
    Ok(())
}

fn key_owner(store: &CloudStore, access_key: &str) -> Option<String> {
    find_key(store, access_key)
        .and_then(|k: &StoredObject| k.input_str("service_account_id"))
        .map(str::to_string)
}

/// Credentials, size quota and grants
fn check_bucket(store: &CloudStore, inputs: &Value, roles: &[&str]) -> Result<()> {
    let args = Inputs::new(inputs);

    if let Some(max_size) = args.opt_i64("max_size")? {
        if max_size < 0 {
            return Err(LocalCloudError::invalid("max_size", "must not be negative"));
        }
        if max_size > MAX_BUCKET_SIZE {
            return Err(LocalCloudError::QuotaExceeded(format!(
                "max_size {} exceeds the bucket quota of {} bytes",
                max_size, MAX_BUCKET_SIZE
            )));
        }
    }

    match (args.opt_str("access_key")?, args.opt_str("secret_key")?) {
        (None, None) => {}
        (Some(access_key), Some(secret_key)) => {
            let key = find_key(store, access_key)
                .filter(|k| k.attribute_str("secret_key") == Some(secret_key))
                .ok_or_else(|| {
                    LocalCloudError::PermissionDenied("invalid access key or secret key".into())
                })?;
            let owner = key.input_str("service_account_id").unwrap_or_default();
            if !has_folder_role(store, owner, roles) {
                return Err(LocalCloudError::PermissionDenied(format!(
                    "service account {} has none of the roles {}",
                    owner,
                    roles.join(", ")
                )));
            }
        }
        _ => {
            return Err(LocalCloudError::invalid(
                "access_key",
                "access_key and secret_key must be given together",
            ));
        }
    }

    for grant in args.blocks("grant")? {
        let grantee = grant.str("id")?;
        match grant.opt_str("type")?.unwrap_or("CanonicalUser") {
            "CanonicalUser" => {
                if store.get(SERVICE_ACCOUNT, grantee).is_none() {
                    return Err(LocalCloudError::Rejected(format!(
                        "grantee {} does not exist",
                        grantee
                    )));
                }
            }
            "Group" => {}
            other => {
                return Err(LocalCloudError::invalid(
                    "grant",
                    format!("unknown grantee type '{}'", other),
                ));
            }
        }
        for permission in grant.strings("permissions")? {
            if !PERMISSIONS.contains(&permission) {
                return Err(LocalCloudError::invalid(
                    "grant",
                    format!("unknown permission '{}'", permission),
                ));
            }
        }
    }

    Ok(())
}

fn validate_bucket_name(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let valid_edges = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
    if !(3..=63).contains(&name.len()) || !valid_chars || !valid_edges {
        return Err(LocalCloudError::invalid(
            "bucket",
            format!("'{}' is not a valid bucket name", name),
        ));
    }
    Ok(())
}
