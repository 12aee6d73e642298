//! リソースノード
//!
//! `resource` / `data` ブロックが表すグラフ上のノード定義

use super::expr::Expr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// ノードの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeMode {
    /// 外部状態を変更するマネージドリソース
    Managed,
    /// 読み取り専用のデータソース
    Data,
}

/// ノードアドレス（種類 + 種別 + 論理名）
///
/// `kind.name` または `data.kind.name` の形式で表示されます。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress {
    pub mode: NodeMode,
    pub kind: String,
    pub name: String,
}

impl NodeAddress {
    pub fn managed(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: NodeMode::Managed,
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn data(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: NodeMode::Data,
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// `kind.name` / `data.kind.name` 形式の文字列をパース
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            ["data", kind, name] if !kind.is_empty() && !name.is_empty() => {
                Some(Self::data(*kind, *name))
            }
            [kind, name] if *kind != "data" && !kind.is_empty() && !name.is_empty() => {
                Some(Self::managed(*kind, *name))
            }
            _ => None,
        }
    }

    pub fn is_data(&self) -> bool {
        self.mode == NodeMode::Data
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            NodeMode::Managed => write!(f, "{}.{}", self.kind, self.name),
            NodeMode::Data => write!(f, "data.{}.{}", self.kind, self.name),
        }
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        NodeAddress::parse(&value).ok_or_else(|| format!("invalid node address: {}", value))
    }
}

impl From<NodeAddress> for String {
    fn from(address: NodeAddress) -> Self {
        address.to_string()
    }
}

/// ノードの実体化フラグ（count 0/1）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// count = 0: ノードも依存先も実体化しない
    Absent,
    /// count = 1
    #[default]
    Present,
}

impl Presence {
    pub fn from_count(count: i64) -> Option<Self> {
        match count {
            0 => Some(Presence::Absent),
            1 => Some(Presence::Present),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Presence::Present)
    }
}

/// `resource` / `data` ブロックの宣言
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDecl {
    pub address: NodeAddress,

    /// 属性（参照式を含む未解決の値）
    pub attributes: BTreeMap<String, Expr>,

    /// depends_on で宣言された明示的な依存
    pub depends_on: Vec<NodeAddress>,

    /// count から決定される実体化フラグ
    pub presence: Presence,
}

impl NodeDecl {
    pub fn new(address: NodeAddress) -> Self {
        Self {
            address,
            attributes: BTreeMap::new(),
            depends_on: Vec::new(),
            presence: Presence::Present,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Expr) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_depends_on(mut self, address: NodeAddress) -> Self {
        self.depends_on.push(address);
        self
    }

    pub fn with_presence(mut self, presence: Presence) -> Self {
        self.presence = presence;
        self
    }

    /// 属性参照から導出される暗黙の依存先
    pub fn implicit_dependencies(&self) -> Vec<&NodeAddress> {
        let mut deps: Vec<&NodeAddress> = Vec::new();
        for expr in self.attributes.values() {
            for reference in expr.references() {
                if !deps.contains(&&reference.address) {
                    deps.push(&reference.address);
                }
            }
        }
        deps
    }

    /// 暗黙・明示を合わせた依存先（重複なし）
    pub fn dependency_addresses(&self) -> Vec<NodeAddress> {
        let mut deps: Vec<NodeAddress> = self.implicit_dependencies().into_iter().cloned().collect();
        for address in &self.depends_on {
            if !deps.contains(address) {
                deps.push(address.clone());
            }
        }
        deps
    }
}
