//! KDLエントリ → 属性式 の変換

use crate::error::{FlowError, Result};
use crate::model::{Expr, NodeAddress, NodeRef, Segment};
use kdl::{KdlNode, KdlValue};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

/// KDLのスカラー値をJSON値に変換
pub(super) fn kdl_to_json(value: &KdlValue) -> Result<Value> {
    match value {
        KdlValue::String(s) => Ok(Value::String(s.clone())),
        KdlValue::Integer(i) => i64::try_from(*i)
            .map(Value::from)
            .map_err(|_| FlowError::InvalidConfig(format!("整数値が範囲外です: {}", i))),
        KdlValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| FlowError::InvalidConfig(format!("無効な浮動小数点値: {}", f))),
        KdlValue::Bool(b) => Ok(Value::Bool(*b)),
        KdlValue::Null => Ok(Value::Null),
    }
}

/// 文字列中の `${...}` を参照式として解釈する
///
/// `local.*` はこの時点で値に置き換えられ、ノード参照だけが残ります。
pub(super) fn parse_template(s: &str, locals: &BTreeMap<String, Value>) -> Result<Expr> {
    let re = Regex::new(r"\$\{([^}]*)\}")
        .map_err(|e| FlowError::InvalidConfig(format!("正規表現のコンパイルエラー: {}", e)))?;

    let mut segments = Vec::new();
    let mut last = 0;
    for cap in re.captures_iter(s) {
        let (Some(whole), Some(inner)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        if whole.start() > last {
            segments.push(Segment::Text(s[last..whole.start()].to_string()));
        }
        segments.push(parse_reference(inner.as_str().trim(), locals)?);
        last = whole.end();
    }

    if segments.is_empty() {
        return Ok(Expr::string(s));
    }
    if last < s.len() {
        segments.push(Segment::Text(s[last..].to_string()));
    }

    // ローカル値だけで構成される場合はリテラルに畳み込む
    if segments.iter().all(|seg| matches!(seg, Segment::Text(_))) {
        return Ok(collapse_local_segments(s, &re, locals, segments));
    }
    Ok(Expr::Template(segments))
}

/// ローカル参照の展開結果を1つのリテラルにまとめる
fn collapse_local_segments(
    source: &str,
    re: &Regex,
    locals: &BTreeMap<String, Value>,
    segments: Vec<Segment>,
) -> Expr {
    // "${local.x}" 単独なら元の型を保持
    if let Some(cap) = re.captures(source)
        && cap.get(0).map(|m| m.as_str()) == Some(source)
        && let Some(name) = cap
            .get(1)
            .and_then(|m| m.as_str().trim().strip_prefix("local."))
        && let Some(value) = locals.get(name)
    {
        return Expr::Literal(value.clone());
    }

    let text: String = segments
        .into_iter()
        .map(|seg| match seg {
            Segment::Text(t) => t,
            Segment::Ref(r) => r.to_string(),
        })
        .collect();
    Expr::string(text)
}

fn parse_reference(inner: &str, locals: &BTreeMap<String, Value>) -> Result<Segment> {
    let parts: Vec<&str> = inner.split('.').collect();
    match parts.as_slice() {
        ["local", name] => {
            let value = locals
                .get(*name)
                .ok_or_else(|| FlowError::UnknownLocal(name.to_string()))?;
            Ok(Segment::Text(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }))
        }
        ["data", kind, name, field] => Ok(Segment::Ref(NodeRef {
            address: NodeAddress::data(*kind, *name),
            field: field.to_string(),
        })),
        [kind, name, field] if *kind != "data" && *kind != "local" => Ok(Segment::Ref(NodeRef {
            address: NodeAddress::managed(*kind, *name),
            field: field.to_string(),
        })),
        _ => Err(FlowError::InvalidConfig(format!(
            "無効な参照式です: ${{{}}}",
            inner
        ))),
    }
}

/// KDL値を属性式に変換（文字列は参照式として解釈）
pub(super) fn value_to_expr(value: &KdlValue, locals: &BTreeMap<String, Value>) -> Result<Expr> {
    match value {
        KdlValue::String(s) => parse_template(s, locals),
        other => Ok(Expr::Literal(kdl_to_json(other)?)),
    }
}

/// 子ノード1つを属性式に変換
///
/// - 子ブロックあり → Block
/// - プロパティのみ → Block
/// - 引数1つ → スカラー、複数 → List
pub(super) fn node_to_expr(node: &KdlNode, locals: &BTreeMap<String, Value>) -> Result<Expr> {
    let mut fields: BTreeMap<String, Expr> = BTreeMap::new();
    let mut args = Vec::new();

    for entry in node.entries() {
        let expr = value_to_expr(entry.value(), locals)?;
        match entry.name() {
            Some(key) => {
                fields.insert(key.value().to_string(), expr);
            }
            None => args.push(expr),
        }
    }

    if let Some(children) = node.children() {
        if !args.is_empty() {
            return Err(FlowError::InvalidConfig(format!(
                "ブロック '{}' に引数は指定できません",
                node.name().value()
            )));
        }
        let block = parse_block(children.nodes(), locals)?;
        fields.extend(block);
        return Ok(Expr::Block(fields));
    }

    if !fields.is_empty() {
        if !args.is_empty() {
            return Err(FlowError::InvalidConfig(format!(
                "'{}' で引数とプロパティは混在できません",
                node.name().value()
            )));
        }
        return Ok(Expr::Block(fields));
    }

    match args.len() {
        0 => Err(FlowError::InvalidConfig(format!(
            "'{}' に値が指定されていません",
            node.name().value()
        ))),
        1 => Ok(args.remove(0)),
        _ => Ok(Expr::List(args)),
    }
}

/// 子ノード群を属性マップに変換（同名ブロックの繰り返しは List にまとめる）
pub(super) fn parse_block(
    nodes: &[KdlNode],
    locals: &BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Expr>> {
    let mut attributes: BTreeMap<String, Expr> = BTreeMap::new();
    let mut repeated: BTreeMap<String, Vec<Expr>> = BTreeMap::new();

    for child in nodes {
        let key = child.name().value().to_string();
        let expr = node_to_expr(child, locals)?;
        let is_block = matches!(expr, Expr::Block(_));

        if is_block {
            repeated.entry(key).or_default().push(expr);
        } else if attributes.insert(key.clone(), expr).is_some() {
            return Err(FlowError::InvalidConfig(format!(
                "属性 '{}' が重複しています",
                key
            )));
        }
    }

    for (key, blocks) in repeated {
        if attributes.contains_key(&key) {
            return Err(FlowError::InvalidConfig(format!(
                "'{}' が属性とブロックの両方で指定されています",
                key
            )));
        }
        attributes.insert(key, Expr::List(blocks));
    }

    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn locals() -> BTreeMap<String, Value> {
        let mut locals = BTreeMap::new();
        locals.insert("zone".to_string(), json!("ru-central1-a"));
        locals.insert("enabled".to_string(), json!(1));
        locals
    }

    #[test]
    fn test_plain_string() {
        let expr = parse_template("hello", &locals()).unwrap();
        assert_eq!(expr, Expr::string("hello"));
    }

    #[test]
    fn test_local_keeps_type() {
        let expr = parse_template("${local.enabled}", &locals()).unwrap();
        assert_eq!(expr, Expr::Literal(json!(1)));
    }

    #[test]
    fn test_local_inside_text() {
        let expr = parse_template("zone-${local.zone}-a", &locals()).unwrap();
        assert_eq!(expr, Expr::string("zone-ru-central1-a-a"));
    }

    #[test]
    fn test_node_reference() {
        let expr = parse_template("${network.form-net.id}", &locals()).unwrap();
        assert_eq!(
            expr,
            Expr::reference(NodeAddress::managed("network", "form-net"), "id")
        );
    }

    #[test]
    fn test_data_reference_with_text() {
        let expr = parse_template("v=${data.secret_version.keys.version_id}", &locals()).unwrap();
        let refs = expr.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].address, NodeAddress::data("secret_version", "keys"));
        assert_eq!(refs[0].field, "version_id");
    }

    #[test]
    fn test_unknown_local() {
        let err = parse_template("${local.missing}", &locals()).unwrap_err();
        assert!(matches!(err, FlowError::UnknownLocal(name) if name == "missing"));
    }

    #[test]
    fn test_invalid_reference() {
        assert!(parse_template("${network}", &locals()).is_err());
        assert!(parse_template("${a.b.c.d.e}", &locals()).is_err());
    }
}
