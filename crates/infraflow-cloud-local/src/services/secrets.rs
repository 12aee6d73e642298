//! Secrets and the `secret_version` data source

use super::{folder_attributes, validate_name};
use crate::error::{LocalCloudError, Result};
use crate::inputs::Inputs;
use crate::schema::SECRET;
use crate::store::{CloudStore, generate_id};
use infraflow_cloud::{ObjectState, ProviderContext};
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub fn create_secret(
    store: &mut CloudStore,
    context: &ProviderContext,
    inputs: &Value,
) -> Result<ObjectState> {
    let name = Inputs::new(inputs).str("name")?;
    validate_name("name", name)?;
    if store.of_kind(SECRET).any(|s| s.input_str("name") == Some(name)) {
        return Err(LocalCloudError::Conflict(format!(
            "secret '{}' already exists",
            name
        )));
    }

    let id = generate_id(SECRET);
    Ok(store
        .insert(SECRET, id, inputs, folder_attributes(context))
        .to_object_state())
}

pub fn update_secret(store: &mut CloudStore, id: &str, inputs: &Value) -> Result<ObjectState> {
    validate_name("name", Inputs::new(inputs).str("name")?)?;
    Ok(store
        .update(SECRET, id, inputs, BTreeMap::new())?
        .to_object_state())
}

/// Deleting a secret destroys all of its versions
pub fn delete_secret(store: &mut CloudStore, id: &str) -> Result<()> {
    store.remove(SECRET, id)?;
    store.remove_secret_versions(id);
    Ok(())
}

/// Read the current (or a pinned) version of a secret
pub fn read_secret_version(store: &CloudStore, inputs: &Value) -> Result<ObjectState> {
    let args = Inputs::new(inputs);
    let secret_id = args.str("secret_id")?;
    store.require(SECRET, secret_id)?;

    let version = match args.opt_str("version_id")? {
        Some(version_id) => store
            .secret_version(secret_id, version_id)
            .ok_or_else(|| LocalCloudError::not_found("secret_version", version_id))?,
        None => store.current_version(secret_id).ok_or_else(|| {
            LocalCloudError::Rejected(format!("secret {} has no versions", secret_id))
        })?,
    };

    Ok(ObjectState::new(version.id.clone())
        .with_attribute("version_id", json!(version.id))
        .with_attribute("entries", json!(version.entries)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_current_version() {
        let mut store = CloudStore::new();
        let secret = create_secret(&mut store, &ProviderContext::new(), &json!({"name": "keys"})).unwrap();

        let err = read_secret_version(&store, &json!({"secret_id": secret.id})).unwrap_err();
        assert!(matches!(err, LocalCloudError::Rejected(_)));

        let first = store
            .add_secret_version(&secret.id, BTreeMap::from([("A".into(), "1".into())]))
            .id
            .clone();
        store.add_secret_version(&secret.id, BTreeMap::from([("A".into(), "2".into())]));

        let current = read_secret_version(&store, &json!({"secret_id": secret.id})).unwrap();
        assert_eq!(current.attributes["entries"], json!({"A": "2"}));

        let pinned =
            read_secret_version(&store, &json!({"secret_id": secret.id, "version_id": first}))
                .unwrap();
        assert_eq!(pinned.id, first);
        assert_eq!(pinned.attributes["entries"], json!({"A": "1"}));
    }

    #[test]
    fn test_missing_secret_is_not_found() {
        let store = CloudStore::new();
        let err = read_secret_version(&store, &json!({"secret_id": "e6q-missing"})).unwrap_err();
        assert!(matches!(err, LocalCloudError::NotFound { .. }));
    }

    #[test]
    fn test_delete_removes_versions() {
        let mut store = CloudStore::new();
        let secret = create_secret(&mut store, &ProviderContext::new(), &json!({"name": "keys"})).unwrap();
        store.add_secret_version(&secret.id, BTreeMap::new());

        delete_secret(&mut store, &secret.id).unwrap();
        assert!(store.current_version(&secret.id).is_none());
        assert!(delete_secret(&mut store, &secret.id).is_err());
    }
}
