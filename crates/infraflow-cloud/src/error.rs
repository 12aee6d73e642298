//! Cloud provider error types

use infraflow_core::FlowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Engine-level errors
#[derive(Error, Debug)]
pub enum CloudError {
    /// Parse, reference, cycle and unresolved-reference errors from the graph layer
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Apply task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error(transparent)]
    PartialApply(#[from] PartialApplyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Why the control plane rejected an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPlaneErrorKind {
    PermissionDenied,
    QuotaExceeded,
    Conflict,
    NotFound,
    Rejected,
    /// A transient error that kept failing after all retry attempts
    RetriesExhausted,
}

impl fmt::Display for ControlPlaneErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlPlaneErrorKind::PermissionDenied => write!(f, "permission denied"),
            ControlPlaneErrorKind::QuotaExceeded => write!(f, "quota exceeded"),
            ControlPlaneErrorKind::Conflict => write!(f, "conflict"),
            ControlPlaneErrorKind::NotFound => write!(f, "not found"),
            ControlPlaneErrorKind::Rejected => write!(f, "rejected"),
            ControlPlaneErrorKind::RetriesExhausted => write!(f, "retries exhausted"),
        }
    }
}

/// Errors worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientErrorKind {
    RateLimited,
    Timeout,
    /// Read-after-write gap of an eventually consistent API
    NotYetConsistent,
}

impl fmt::Display for TransientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientErrorKind::RateLimited => write!(f, "rate limited"),
            TransientErrorKind::Timeout => write!(f, "timeout"),
            TransientErrorKind::NotYetConsistent => write!(f, "not yet consistent"),
        }
    }
}

/// Errors returned by a [`CloudProvider`](crate::CloudProvider) call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{kind}: {message}")]
    ControlPlane {
        kind: ControlPlaneErrorKind,
        message: String,
    },

    #[error("transient error ({kind}): {message}")]
    Transient {
        kind: TransientErrorKind,
        message: String,
    },
}

impl ProviderError {
    pub fn control_plane(kind: ControlPlaneErrorKind, message: impl Into<String>) -> Self {
        ProviderError::ControlPlane {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(kind: TransientErrorKind, message: impl Into<String>) -> Self {
        ProviderError::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::control_plane(ControlPlaneErrorKind::NotFound, message)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProviderError::ControlPlane {
                kind: ControlPlaneErrorKind::NotFound,
                ..
            }
        )
    }

    /// Convert a transient error that outlived its retries into a control-plane error
    pub fn escalate(self, attempts: u32) -> Self {
        match self {
            ProviderError::Transient { kind, message } => ProviderError::ControlPlane {
                kind: ControlPlaneErrorKind::RetriesExhausted,
                message: format!("{} after {} attempts: {}", kind, attempts, message),
            },
            other => other,
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A single node that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub address: String,
    pub action: String,
    pub error: String,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} failed: {}", self.address, self.action, self.error)
    }
}

/// Aggregate error of an apply that did not fully succeed
#[derive(Debug, Clone)]
pub struct PartialApplyError {
    pub succeeded: Vec<String>,
    pub failed: Vec<NodeFailure>,
    pub skipped: Vec<String>,
    pub cancelled: bool,
}

impl fmt::Display for PartialApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "apply incomplete: {} succeeded, {} failed, {} skipped",
            self.succeeded.len(),
            self.failed.len(),
            self.skipped.len()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

impl std::error::Error for PartialApplyError {}
