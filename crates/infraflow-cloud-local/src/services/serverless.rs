//! Serverless functions and their invocation bindings

use super::identity::check_member;
use super::validate_name;
use crate::error::{LocalCloudError, Result};
use crate::inputs::Inputs;
use crate::schema::{BUCKET, FUNCTION, FUNCTION_IAM_BINDING, SECRET, SERVICE_ACCOUNT};
use crate::store::{CloudStore, generate_id};
use infraflow_cloud::ObjectState;
use serde_json::{Value, json};
use std::collections::BTreeMap;

const RUNTIMES: &[&str] = &[
    "python311",
    "python312",
    "nodejs18",
    "nodejs22",
    "golang121",
    "java21",
    "bash-2204",
];
const MIN_MEMORY_MB: i64 = 128;
const MAX_MEMORY_MB: i64 = 4096;
const MAX_TIMEOUT_SECS: i64 = 3600;

/// Deploying a function always produces a new version
pub fn create_function(store: &mut CloudStore, inputs: &Value) -> Result<ObjectState> {
    let name = Inputs::new(inputs).str("name")?;
    validate_name("name", name)?;
    if store.of_kind(FUNCTION).any(|f| f.input_str("name") == Some(name)) {
        return Err(LocalCloudError::Conflict(format!(
            "function '{}' already exists",
            name
        )));
    }
    check_function(store, inputs)?;

    let id = generate_id(FUNCTION);
    let attributes = BTreeMap::from([
        ("version_id".to_string(), json!(generate_id("function_version"))),
        (
            "invoke_url".to_string(),
            json!(format!("https://functions.local/{}", id)),
        ),
    ]);
    Ok(store
        .insert(FUNCTION, id, inputs, attributes)
        .to_object_state())
}

pub fn update_function(store: &mut CloudStore, id: &str, inputs: &Value) -> Result<ObjectState> {
    store.require(FUNCTION, id)?;
    validate_name("name", Inputs::new(inputs).str("name")?)?;
    check_function(store, inputs)?;

    let attributes = BTreeMap::from([(
        "version_id".to_string(),
        json!(generate_id("function_version")),
    )]);
    Ok(store
        .update(FUNCTION, id, inputs, attributes)?
        .to_object_state())
}

pub fn delete_function(store: &mut CloudStore, id: &str) -> Result<()> {
    store.remove(FUNCTION, id)?;
    Ok(())
}

fn check_function(store: &CloudStore, inputs: &Value) -> Result<()> {
    let args = Inputs::new(inputs);

    let runtime = args.str("runtime")?;
    if !RUNTIMES.contains(&runtime) {
        return Err(LocalCloudError::invalid(
            "runtime",
            format!("unsupported runtime '{}'", runtime),
        ));
    }
    args.str("entrypoint")?;

    if let Some(memory) = args.opt_i64("memory")?
        && !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&memory)
    {
        return Err(LocalCloudError::invalid(
            "memory",
            format!("must be between {} and {} MB", MIN_MEMORY_MB, MAX_MEMORY_MB),
        ));
    }
    if let Some(timeout) = args.opt_i64("execution_timeout")?
        && !(1..=MAX_TIMEOUT_SECS).contains(&timeout)
    {
        return Err(LocalCloudError::invalid(
            "execution_timeout",
            format!("must be between 1 and {} seconds", MAX_TIMEOUT_SECS),
        ));
    }

    if let Some(sa) = args.opt_str("service_account_id")?
        && store.get(SERVICE_ACCOUNT, sa).is_none()
    {
        return Err(LocalCloudError::Rejected(format!(
            "service account {} does not exist",
            sa
        )));
    }

    if let Some(environment) = args.block("environment")? {
        environment.string_map()?;
    }

    for secret in args.blocks("secret")? {
        let secret_id = secret.str("id")?;
        let version_id = secret.str("version_id")?;
        let key = secret.str("key")?;
        secret.str("environment_variable")?;

        if store.get(SECRET, secret_id).is_none() {
            return Err(LocalCloudError::Rejected(format!(
                "secret {} does not exist",
                secret_id
            )));
        }
        let version = store.secret_version(secret_id, version_id).ok_or_else(|| {
            LocalCloudError::Rejected(format!(
                "secret {} has no version {}",
                secret_id, version_id
            ))
        })?;
        if !version.entries.contains_key(key) {
            return Err(LocalCloudError::Rejected(format!(
                "version {} of secret {} has no entry '{}'",
                version_id, secret_id, key
            )));
        }
    }

    for mount in args.blocks("mount")? {
        mount.str("name")?;
        let bucket = mount.str("bucket")?;
        if store.get(BUCKET, bucket).is_none() {
            return Err(LocalCloudError::Rejected(format!(
                "bucket '{}' does not exist",
                bucket
            )));
        }
        if let Some(mode) = mount.opt_str("mode")?
            && mode != "ro"
            && mode != "rw"
        {
            return Err(LocalCloudError::invalid(
                "mount",
                format!("mode must be 'ro' or 'rw', got '{}'", mode),
            ));
        }
    }

    if let Some(package) = args.block("package")? {
        package.str("path")?;
    }

    Ok(())
}

pub fn create_function_iam_binding(store: &mut CloudStore, inputs: &Value) -> Result<ObjectState> {
    let args = Inputs::new(inputs);
    let function_id = args.str("function_id")?;
    if store.get(FUNCTION, function_id).is_none() {
        return Err(LocalCloudError::Rejected(format!(
            "function {} does not exist",
            function_id
        )));
    }
    let role = args.str("role")?;
    if store.of_kind(FUNCTION_IAM_BINDING).any(|b| {
        b.input_str("function_id") == Some(function_id) && b.input_str("role") == Some(role)
    }) {
        return Err(LocalCloudError::Conflict(format!(
            "function {} already has a binding for {}",
            function_id, role
        )));
    }
    check_members(store, &args)?;

    let id = generate_id(FUNCTION_IAM_BINDING);
    Ok(store
        .insert(FUNCTION_IAM_BINDING, id, inputs, BTreeMap::new())
        .to_object_state())
}

/// Members are replaced in place
pub fn update_function_iam_binding(
    store: &mut CloudStore,
    id: &str,
    inputs: &Value,
) -> Result<ObjectState> {
    check_members(store, &Inputs::new(inputs))?;
    Ok(store
        .update(FUNCTION_IAM_BINDING, id, inputs, BTreeMap::new())?
        .to_object_state())
}

pub fn delete_function_iam_binding(store: &mut CloudStore, id: &str) -> Result<()> {
    store.remove(FUNCTION_IAM_BINDING, id)?;
    Ok(())
}

fn check_members(store: &CloudStore, args: &Inputs<'_>) -> Result<()> {
    let members = args.strings("members")?;
    if members.is_empty() {
        return Err(LocalCloudError::invalid("members", "is required"));
    }
    for member in members {
        check_member(store, "members", member)?;
    }
    Ok(())
}
