//! モデル定義
//!
//! インフラ定義で使用されるデータモデルを定義します。

mod document;
mod expr;
mod node;

// Re-exports
pub use document::*;
pub use expr::*;
pub use node::*;
