//! Kinds served by the local control plane

use infraflow_core::{ProviderSchema, ResourceSchema};

pub const NETWORK: &str = "network";
pub const SUBNET: &str = "subnet";
pub const SERVICE_ACCOUNT: &str = "service_account";
pub const ROLE_BINDING: &str = "role_binding";
pub const SECRET: &str = "secret";
pub const STATIC_ACCESS_KEY: &str = "static_access_key";
pub const BUCKET: &str = "bucket";
pub const FUNCTION: &str = "function";
pub const FUNCTION_IAM_BINDING: &str = "function_iam_binding";

/// Data source
pub const SECRET_VERSION: &str = "secret_version";

pub fn local_schema() -> ProviderSchema {
    ProviderSchema::new()
        .with_resource(
            NETWORK,
            ResourceSchema::new().required(["name"]).computed(["folder_id"]),
        )
        .with_resource(
            SUBNET,
            ResourceSchema::new()
                .required(["name", "network_id", "v4_cidr_blocks"])
                .computed(["folder_id"])
                .force_new(["network_id", "zone", "v4_cidr_blocks"]),
        )
        .with_resource(
            SERVICE_ACCOUNT,
            ResourceSchema::new().required(["name"]).computed(["folder_id"]),
        )
        .with_resource(
            ROLE_BINDING,
            ResourceSchema::new()
                .required(["role", "member"])
                .force_new(["role", "member", "secret_id"]),
        )
        .with_resource(
            SECRET,
            ResourceSchema::new().required(["name"]).computed(["folder_id"]),
        )
        .with_resource(
            STATIC_ACCESS_KEY,
            ResourceSchema::new()
                .required(["service_account_id"])
                .computed(["access_key", "secret_key", "secret_version_id"])
                .sensitive(["secret_key"])
                .force_new(["service_account_id", "output_to_secret"]),
        )
        .with_resource(
            BUCKET,
            ResourceSchema::new()
                .required(["bucket"])
                .computed(["bucket_domain_name"])
                .sensitive(["secret_key"])
                .force_new(["bucket"]),
        )
        .with_resource(
            FUNCTION,
            ResourceSchema::new()
                .required(["name", "runtime", "entrypoint"])
                .computed(["version_id", "invoke_url"]),
        )
        .with_resource(
            FUNCTION_IAM_BINDING,
            ResourceSchema::new()
                .required(["function_id", "role", "members"])
                .force_new(["function_id", "role"]),
        )
        .with_data_source(
            SECRET_VERSION,
            ResourceSchema::new()
                .required(["secret_id"])
                .computed(["version_id", "entries"])
                .sensitive(["entries"]),
        )
}
