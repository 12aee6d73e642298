//! 属性式
//!
//! 属性値は参照 `${kind.name.field}` を含むことができます。
//! 参照は依存関係グラフの暗黙の辺になり、プラン/適用時に解決されます。

use super::node::NodeAddress;
use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// 他ノードの計算済みフィールドへの参照
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub address: NodeAddress,
    pub field: String,
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.address, self.field)
    }
}

/// テンプレート文字列の断片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Text(String),
    Ref(NodeRef),
}

/// 未解決の属性値
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// 参照を含まない値
    Literal(Value),
    /// 参照を含む文字列
    Template(Vec<Segment>),
    /// 複数引数
    List(Vec<Expr>),
    /// ネストしたブロック（grant, mount, secret など）
    Block(BTreeMap<String, Expr>),
}

/// 解決済みの値
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Known(Value),
    /// 適用後に確定する値
    Unknown,
}

/// 参照の問い合わせ結果
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Known(Value),
    /// 参照先が作成/置換予定のため未確定
    Unknown,
    /// 参照先の状態にフィールドが存在しない
    Missing,
}

/// 参照を値に解決する
pub trait ReferenceResolver {
    fn lookup(&self, reference: &NodeRef) -> Lookup;
}

impl<F> ReferenceResolver for F
where
    F: Fn(&NodeRef) -> Lookup,
{
    fn lookup(&self, reference: &NodeRef) -> Lookup {
        self(reference)
    }
}

impl Expr {
    pub fn string(s: impl Into<String>) -> Self {
        Expr::Literal(Value::String(s.into()))
    }

    pub fn reference(address: NodeAddress, field: impl Into<String>) -> Self {
        Expr::Template(vec![Segment::Ref(NodeRef {
            address,
            field: field.into(),
        })])
    }

    /// 式に含まれる全ての参照
    pub fn references(&self) -> Vec<&NodeRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a NodeRef>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Template(segments) => {
                for segment in segments {
                    if let Segment::Ref(r) = segment {
                        refs.push(r);
                    }
                }
            }
            Expr::List(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            Expr::Block(fields) => {
                for value in fields.values() {
                    value.collect_references(refs);
                }
            }
        }
    }

    /// 参照を解決する。解決できない参照があれば `Err` でその参照を返す
    pub fn resolve<R: ReferenceResolver + ?Sized>(
        &self,
        resolver: &R,
    ) -> std::result::Result<Resolved, NodeRef> {
        match self {
            Expr::Literal(v) => Ok(Resolved::Known(v.clone())),
            Expr::Template(segments) => {
                // 単一参照のみの場合は型を保持
                if let [Segment::Ref(r)] = segments.as_slice() {
                    return match resolver.lookup(r) {
                        Lookup::Known(v) => Ok(Resolved::Known(v)),
                        Lookup::Unknown => Ok(Resolved::Unknown),
                        Lookup::Missing => Err(r.clone()),
                    };
                }

                let mut rendered = String::new();
                let mut unknown = false;
                for segment in segments {
                    match segment {
                        Segment::Text(text) => rendered.push_str(text),
                        Segment::Ref(r) => match resolver.lookup(r) {
                            Lookup::Known(v) => rendered.push_str(&render_scalar(&v)),
                            Lookup::Unknown => unknown = true,
                            Lookup::Missing => return Err(r.clone()),
                        },
                    }
                }
                if unknown {
                    Ok(Resolved::Unknown)
                } else {
                    Ok(Resolved::Known(Value::String(rendered)))
                }
            }
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                let mut unknown = false;
                for item in items {
                    match item.resolve(resolver)? {
                        Resolved::Known(v) => values.push(v),
                        Resolved::Unknown => unknown = true,
                    }
                }
                if unknown {
                    Ok(Resolved::Unknown)
                } else {
                    Ok(Resolved::Known(Value::Array(values)))
                }
            }
            Expr::Block(fields) => {
                let mut map = serde_json::Map::new();
                let mut unknown = false;
                for (key, value) in fields {
                    match value.resolve(resolver)? {
                        Resolved::Known(v) => {
                            map.insert(key.clone(), v);
                        }
                        Resolved::Unknown => unknown = true,
                    }
                }
                if unknown {
                    Ok(Resolved::Unknown)
                } else {
                    Ok(Resolved::Known(Value::Object(map)))
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Template(segments) => {
                write!(f, "\"")?;
                for segment in segments {
                    match segment {
                        Segment::Text(text) => write!(f, "{}", text)?,
                        Segment::Ref(r) => write!(f, "${{{}}}", r)?,
                    }
                }
                write!(f, "\"")
            }
            Expr::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Expr::Block(fields) => {
                write!(f, "{{ ")?;
                for (key, value) in fields {
                    write!(f, "{}={} ", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// テンプレートに埋め込むときの文字列表現
fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// ノード単位で解決した属性
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedAttributes {
    pub values: BTreeMap<String, Value>,
    /// 適用後まで確定しない属性名
    pub unknown: BTreeSet<String>,
}

impl ResolvedAttributes {
    pub fn is_fully_known(&self) -> bool {
        self.unknown.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// 状態ファイルに保存する形式（JSONオブジェクト）
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// ノードの全属性を解決
pub fn resolve_attributes<R: ReferenceResolver + ?Sized>(
    node: &NodeAddress,
    attributes: &BTreeMap<String, Expr>,
    resolver: &R,
) -> Result<ResolvedAttributes> {
    let mut resolved = ResolvedAttributes::default();
    for (key, expr) in attributes {
        match expr.resolve(resolver) {
            Ok(Resolved::Known(v)) => {
                resolved.values.insert(key.clone(), v);
            }
            Ok(Resolved::Unknown) => {
                resolved.unknown.insert(key.clone());
            }
            Err(reference) => {
                return Err(FlowError::UnresolvedReference {
                    node: node.to_string(),
                    reference: reference.to_string(),
                });
            }
        }
    }
    Ok(resolved)
}
