//! InfraFlow Cloud Infrastructure
//!
//! This crate turns a [`ResourceGraph`](infraflow_core::ResourceGraph) into
//! changes against a cloud control plane.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 InfraFlow CLI                     │
//! │            (infraflow plan / apply)               │
//! └─────────────────┬────────────────────────────────┘
//!                   │
//! ┌─────────────────▼────────────────────────────────┐
//! │                infraflow-cloud                    │
//! │  ┌──────────────┐  ┌──────────────┐              │
//! │  │PlanEvaluator │─▶│ApplyExecutor │              │
//! │  └──────┬───────┘  └──────┬───────┘              │
//! │         │                 │                       │
//! │  ┌──────▼───────┐  ┌──────▼───────────────────┐  │
//! │  │  State Mgmt  │  │ trait CloudProvider {..} │  │
//! │  └──────────────┘  └──────────────────────────┘  │
//! └───────────────────────────┬──────────────────────┘
//!                             │
//!                     ┌───────▼───────┐
//!                     │  local cloud  │
//!                     │   provider    │
//!                     └───────────────┘
//! ```

pub mod action;
pub mod error;
pub mod executor;
pub mod plan;
pub mod provider;
pub mod refresh;
pub mod retry;
pub mod state;

// Re-exports
pub use action::{
    Action, ActionResult, ActionType, ApplyResult, AttributeChange, Plan, PlanSummary,
};
pub use error::{
    CloudError, ControlPlaneErrorKind, NodeFailure, PartialApplyError, ProviderError,
    ProviderResult, Result, TransientErrorKind,
};
pub use executor::{ApplyExecutor, ApplyOptions};
pub use infraflow_core::schema::{ProviderSchema, ResourceSchema};
pub use plan::{OutputValue, PlanEvaluator, evaluate_outputs};
pub use provider::{AuthStatus, CloudProvider, ObjectState, ProviderContext, RetryConfig};
pub use refresh::{RefreshReport, refresh_state};
pub use state::{GlobalState, ResourceState, ResourceStatus, StateLock, StateManager};
