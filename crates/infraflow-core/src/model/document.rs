use super::expr::Expr;
use super::node::{NodeAddress, NodeDecl};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// パース済みのインフラ定義ファイル全体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// プロジェクト名
    pub name: String,

    /// ローカル値（パース時に展開済み）
    pub locals: BTreeMap<String, Value>,

    /// 宣言順のノード
    pub nodes: Vec<NodeDecl>,

    /// 適用後に表示する出力値
    pub outputs: Vec<Output>,
}

impl Document {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locals: BTreeMap::new(),
            nodes: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn node(&self, address: &NodeAddress) -> Option<&NodeDecl> {
        self.nodes.iter().find(|n| &n.address == address)
    }
}

/// `output` ブロック
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub value: Expr,
    /// true の場合は表示時に値を伏せる
    pub sensitive: bool,
}
