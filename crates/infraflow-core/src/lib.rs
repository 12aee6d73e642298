//! InfraFlow Core
//!
//! KDLで記述された宣言的インフラ定義をパースし、
//! 依存関係グラフ（Resource Graph）を構築します。
//!
//! - [`parser`]: `infra.kdl` → [`Document`]
//! - [`graph`]: [`Document`] + [`ProviderSchema`] → [`ResourceGraph`]
//! - [`schema`]: プロバイダーが公開するリソース種別の定義

pub mod error;
pub mod graph;
pub mod model;
pub mod parser;
pub mod schema;

pub use error::{FlowError, Result};
pub use graph::{Edge, EdgeKind, GraphNode, ResourceGraph};
pub use model::*;
pub use parser::{LocalOverrides, parse_kdl_file, parse_kdl_string, parse_kdl_string_with_overrides};
pub use schema::{ProviderSchema, ResourceSchema};
