//! Service accounts, role bindings and static access keys

use super::{folder_attributes, validate_name};
use crate::error::{LocalCloudError, Result};
use crate::inputs::Inputs;
use crate::schema::{ROLE_BINDING, SECRET, SERVICE_ACCOUNT, STATIC_ACCESS_KEY};
use crate::store::{CloudStore, StoredObject, generate_id};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use infraflow_cloud::{ObjectState, ProviderContext};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use uuid::Uuid;

const SERVICE_ACCOUNT_MEMBER: &str = "serviceAccount:";

pub fn create_service_account(
    store: &mut CloudStore,
    context: &ProviderContext,
    inputs: &Value,
) -> Result<ObjectState> {
    let name = Inputs::new(inputs).str("name")?;
    validate_name("name", name)?;
    if store
        .of_kind(SERVICE_ACCOUNT)
        .any(|sa| sa.input_str("name") == Some(name))
    {
        return Err(LocalCloudError::Conflict(format!(
            "service account '{}' already exists",
            name
        )));
    }

    let id = generate_id(SERVICE_ACCOUNT);
    Ok(store
        .insert(SERVICE_ACCOUNT, id, inputs, folder_attributes(context))
        .to_object_state())
}

pub fn update_service_account(
    store: &mut CloudStore,
    id: &str,
    inputs: &Value,
) -> Result<ObjectState> {
    validate_name("name", Inputs::new(inputs).str("name")?)?;
    Ok(store
        .update(SERVICE_ACCOUNT, id, inputs, BTreeMap::new())?
        .to_object_state())
}

pub fn delete_service_account(store: &mut CloudStore, id: &str) -> Result<()> {
    store.remove(SERVICE_ACCOUNT, id)?;
    Ok(())
}

/// Check a `serviceAccount:<id>` / `userAccount:<id>` / `system:<group>` member
pub(crate) fn check_member(store: &CloudStore, field: &str, member: &str) -> Result<()> {
    if let Some(id) = member.strip_prefix(SERVICE_ACCOUNT_MEMBER) {
        if store.get(SERVICE_ACCOUNT, id).is_none() {
            return Err(LocalCloudError::Rejected(format!(
                "service account {} does not exist",
                id
            )));
        }
        return Ok(());
    }
    match member.split_once(':') {
        Some(("userAccount", id)) if !id.is_empty() => Ok(()),
        Some(("system", "allUsers" | "allAuthenticatedUsers")) => Ok(()),
        _ => Err(LocalCloudError::invalid(
            field,
            format!("unsupported member '{}'", member),
        )),
    }
}

pub fn create_role_binding(store: &mut CloudStore, inputs: &Value) -> Result<ObjectState> {
    let args = Inputs::new(inputs);
    let role = args.str("role")?;
    let member = args.str("member")?;
    let secret_id = args.opt_str("secret_id")?;

    if !role.contains('.') {
        return Err(LocalCloudError::invalid(
            "role",
            format!("'{}' is not a role name", role),
        ));
    }
    check_member(store, "member", member)?;
    if let Some(secret_id) = secret_id
        && store.get(SECRET, secret_id).is_none()
    {
        return Err(LocalCloudError::Rejected(format!(
            "secret {} does not exist",
            secret_id
        )));
    }

    let duplicate = store.of_kind(ROLE_BINDING).any(|b| {
        b.input_str("role") == Some(role)
            && b.input_str("member") == Some(member)
            && b.input_str("secret_id") == secret_id
    });
    if duplicate {
        return Err(LocalCloudError::Conflict(format!(
            "{} already holds {}",
            member, role
        )));
    }

    let id = generate_id(ROLE_BINDING);
    Ok(store
        .insert(ROLE_BINDING, id, inputs, BTreeMap::new())
        .to_object_state())
}

pub fn update_role_binding(store: &mut CloudStore, id: &str, inputs: &Value) -> Result<ObjectState> {
    Ok(store
        .update(ROLE_BINDING, id, inputs, BTreeMap::new())?
        .to_object_state())
}

pub fn delete_role_binding(store: &mut CloudStore, id: &str) -> Result<()> {
    store.remove(ROLE_BINDING, id)?;
    Ok(())
}

/// Whether the service account holds one of `roles` at folder scope
pub(crate) fn has_folder_role(store: &CloudStore, service_account_id: &str, roles: &[&str]) -> bool {
    let member = format!("{}{}", SERVICE_ACCOUNT_MEMBER, service_account_id);
    store.of_kind(ROLE_BINDING).any(|b| {
        b.input_str("member") == Some(member.as_str())
            && b.input_str("secret_id").is_none()
            && b.input_str("role").is_some_and(|r| roles.contains(&r))
    })
}

/// Static key that matches the given credentials
pub(crate) fn find_key<'a>(
    store: &'a CloudStore,
    access_key: &str,
) -> Option<&'a StoredObject> {
    store
        .of_kind(STATIC_ACCESS_KEY)
        .find(|k| k.attribute_str("access_key") == Some(access_key))
}

fn generate_access_key() -> String {
    let random = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("YCAJ{}", &random[..21])
}

fn generate_secret_key() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    format!("YC{}", URL_SAFE_NO_PAD.encode(&bytes[..30]))
}

/// Create a key; `output_to_secret` stores both halves as a new secret version
pub fn create_static_access_key(store: &mut CloudStore, inputs: &Value) -> Result<ObjectState> {
    let args = Inputs::new(inputs);
    let service_account_id = args.str("service_account_id")?;
    if store.get(SERVICE_ACCOUNT, service_account_id).is_none() {
        return Err(LocalCloudError::Rejected(format!(
            "service account {} does not exist",
            service_account_id
        )));
    }

    let output = match args.block("output_to_secret")? {
        Some(block) => {
            let secret_id = block.str("secret_id")?;
            let access_entry = block.str("entry_for_access_key")?;
            let secret_entry = block.str("entry_for_secret_key")?;
            if access_entry == secret_entry {
                return Err(LocalCloudError::invalid(
                    "output_to_secret",
                    "entries for the access key and the secret key must differ",
                ));
            }
            if store.get(SECRET, secret_id).is_none() {
                return Err(LocalCloudError::Rejected(format!(
                    "secret {} does not exist",
                    secret_id
                )));
            }
            Some((secret_id, access_entry, secret_entry))
        }
        None => None,
    };

    let access_key = generate_access_key();
    let secret_key = generate_secret_key();
    let mut attributes = BTreeMap::from([
        ("access_key".to_string(), json!(access_key)),
        ("secret_key".to_string(), json!(secret_key)),
    ]);

    if let Some((secret_id, access_entry, secret_entry)) = output {
        let entries = BTreeMap::from([
            (access_entry.to_string(), access_key.clone()),
            (secret_entry.to_string(), secret_key.clone()),
        ]);
        let version = store.add_secret_version(secret_id, entries);
        tracing::debug!(secret_id, version_id = %version.id, "Wrote key into secret");
        attributes.insert("secret_version_id".to_string(), json!(version.id));
    }

    let id = generate_id(STATIC_ACCESS_KEY);
    Ok(store
        .insert(STATIC_ACCESS_KEY, id, inputs, attributes)
        .to_object_state())
}

/// Only the description changes in place; the key material is kept
pub fn update_static_access_key(
    store: &mut CloudStore,
    id: &str,
    inputs: &Value,
) -> Result<ObjectState> {
    Ok(store
        .update(STATIC_ACCESS_KEY, id, inputs, BTreeMap::new())?
        .to_object_state())
}

pub fn delete_static_access_key(store: &mut CloudStore, id: &str) -> Result<()> {
    store.remove(STATIC_ACCESS_KEY, id)?;
    Ok(())
}
