//! resource / data / output / locals ノードのパース

use super::value::{kdl_to_json, node_to_expr, parse_block, value_to_expr};
use crate::error::{FlowError, Result};
use crate::model::{Expr, NodeAddress, NodeDecl, NodeMode, Output, Presence};
use kdl::KdlNode;
use serde_json::Value;
use std::collections::BTreeMap;

/// 予約された子ノード名（属性としては扱わない）
const COUNT: &str = "count";
const DEPENDS_ON: &str = "depends_on";

/// locals ブロックをパースし、既存のローカル値に追加
///
/// 後に定義されたローカル値は、先に定義されたものを参照できます。
/// `overrides` に同名の値があればそちらが優先されます。
pub(super) fn parse_locals(
    node: &KdlNode,
    locals: &mut BTreeMap<String, Value>,
    overrides: &BTreeMap<String, Value>,
) -> Result<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        let key = child.name().value().to_string();

        if let Some(value) = overrides.get(&key) {
            locals.insert(key, value.clone());
            continue;
        }

        let value = match child.entries().first() {
            Some(entry) => match value_to_expr(entry.value(), locals)? {
                Expr::Literal(v) => v,
                _ => {
                    return Err(FlowError::InvalidConfig(format!(
                        "ローカル値 '{}' はノードを参照できません",
                        key
                    )));
                }
            },
            None => {
                return Err(FlowError::InvalidConfig(format!(
                    "ローカル値 '{}' に値が指定されていません",
                    key
                )));
            }
        };
        locals.insert(key, value);
    }

    Ok(())
}

/// `resource "kind" "name" { ... }` / `data "kind" "name" { ... }` をパース
pub(super) fn parse_node(
    node: &KdlNode,
    mode: NodeMode,
    locals: &BTreeMap<String, Value>,
) -> Result<NodeDecl> {
    let label = node.name().value();
    let args: Vec<&str> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .collect();

    let [kind, name] = args.as_slice() else {
        return Err(FlowError::InvalidConfig(format!(
            "{} には種別と名前の2つの引数が必要です",
            label
        )));
    };

    let address = match mode {
        NodeMode::Managed => NodeAddress::managed(*kind, *name),
        NodeMode::Data => NodeAddress::data(*kind, *name),
    };
    let mut decl = NodeDecl::new(address);

    let Some(children) = node.children() else {
        return Ok(decl);
    };

    let mut attribute_nodes = Vec::new();
    for child in children.nodes() {
        match child.name().value() {
            COUNT => {
                decl.presence = parse_count(child, locals, &decl.address)?;
            }
            DEPENDS_ON => {
                for entry in child.entries() {
                    let target = entry.value().as_string().ok_or_else(|| {
                        FlowError::InvalidConfig(format!(
                            "{}: depends_on には文字列のアドレスを指定してください",
                            decl.address
                        ))
                    })?;
                    let target = NodeAddress::parse(target).ok_or_else(|| {
                        FlowError::InvalidConfig(format!(
                            "{}: 無効な depends_on アドレス '{}'",
                            decl.address, target
                        ))
                    })?;
                    if !decl.depends_on.contains(&target) {
                        decl.depends_on.push(target);
                    }
                }
            }
            _ => attribute_nodes.push(child.clone()),
        }
    }

    decl.attributes = parse_block(&attribute_nodes, locals)?;
    Ok(decl)
}

/// count は 0 か 1（ローカル値で切り替え可能）
fn parse_count(
    node: &KdlNode,
    locals: &BTreeMap<String, Value>,
    address: &NodeAddress,
) -> Result<Presence> {
    let invalid = || {
        FlowError::InvalidConfig(format!(
            "{}: count には 0 または 1 を指定してください",
            address
        ))
    };

    let value = match node_to_expr(node, locals)? {
        Expr::Literal(v) => v,
        _ => {
            return Err(FlowError::InvalidConfig(format!(
                "{}: count はグラフ構築時に確定する値である必要があります",
                address
            )));
        }
    };

    let count = match &value {
        Value::Number(n) => n.as_i64().ok_or_else(invalid)?,
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid())?,
        Value::Bool(b) => i64::from(*b),
        _ => return Err(invalid()),
    };
    Presence::from_count(count).ok_or_else(invalid)
}

/// `output "name" { value "..." }` をパース
pub(super) fn parse_output(node: &KdlNode, locals: &BTreeMap<String, Value>) -> Result<Output> {
    let name = node
        .entries()
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| FlowError::InvalidConfig("output requires a name".to_string()))?
        .to_string();

    let mut value = None;
    let mut sensitive = false;
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "value" => value = Some(node_to_expr(child, locals)?),
                "sensitive" => {
                    sensitive = child
                        .entries()
                        .first()
                        .map(|e| kdl_to_json(e.value()))
                        .transpose()?
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                }
                other => {
                    return Err(FlowError::InvalidConfig(format!(
                        "output '{}': 不明な項目 '{}'",
                        name, other
                    )));
                }
            }
        }
    }

    let value = value.ok_or_else(|| {
        FlowError::InvalidConfig(format!("output '{}' に value が指定されていません", name))
    })?;

    Ok(Output {
        name,
        value,
        sensitive,
    })
}
