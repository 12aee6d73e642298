//! Local control plane error types

use infraflow_cloud::{ControlPlaneErrorKind, ProviderError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalCloudError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    #[error("invalid argument '{field}': {message}")]
    InvalidArgument { field: String, message: String },

    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    QuotaExceeded(String),

    #[error("Unsupported kind: {0}")]
    UnsupportedKind(String),

    /// A fault registered through [`LocalCloudProvider::inject_fault`](crate::LocalCloudProvider::inject_fault)
    #[error("{0}")]
    Injected(ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LocalCloudError {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        LocalCloudError::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        LocalCloudError::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<LocalCloudError> for ProviderError {
    fn from(err: LocalCloudError) -> Self {
        let kind = match &err {
            LocalCloudError::NotFound { .. } => ControlPlaneErrorKind::NotFound,
            LocalCloudError::PermissionDenied(_) => ControlPlaneErrorKind::PermissionDenied,
            LocalCloudError::Conflict(_) => ControlPlaneErrorKind::Conflict,
            LocalCloudError::QuotaExceeded(_) => ControlPlaneErrorKind::QuotaExceeded,
            LocalCloudError::Injected(inner) => return inner.clone(),
            LocalCloudError::InvalidArgument { .. }
            | LocalCloudError::Rejected(_)
            | LocalCloudError::UnsupportedKind(_)
            | LocalCloudError::Io(_)
            | LocalCloudError::Json(_) => ControlPlaneErrorKind::Rejected,
        };
        ProviderError::control_plane(kind, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LocalCloudError>;
