//! KDLパーサー
//!
//! `infra.kdl` をパースして [`Document`] を生成します。
//! ローカル値（locals）はこの段階で展開され、ノード参照だけが残ります。

mod node;
mod value;

use node::{parse_locals, parse_node, parse_output};

use crate::error::{FlowError, Result};
use crate::model::{Document, NodeMode};
use kdl::KdlDocument;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// CLI などから与えるローカル値の上書き
pub type LocalOverrides = BTreeMap<String, Value>;

/// KDLファイルをパースしてDocumentを生成
pub fn parse_kdl_file<P: AsRef<Path>>(path: P, overrides: &LocalOverrides) -> Result<Document> {
    let content = fs::read_to_string(path.as_ref()).map_err(|e| FlowError::IoError {
        path: path.as_ref().to_path_buf(),
        message: e.to_string(),
    })?;
    let name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_kdl_string_with_overrides(&content, name, overrides)
}

/// KDL文字列をパース
pub fn parse_kdl_string(content: &str, default_name: String) -> Result<Document> {
    parse_kdl_string_with_overrides(content, default_name, &LocalOverrides::new())
}

/// KDL文字列をローカル値の上書き付きでパース
pub fn parse_kdl_string_with_overrides(
    content: &str,
    default_name: String,
    overrides: &LocalOverrides,
) -> Result<Document> {
    let doc: KdlDocument = content.parse()?;
    let mut document = Document::new(default_name);

    // 1パス目: project と locals（ノードより後に書かれていても参照できるように）
    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                if let Some(project_name) =
                    node.entries().first().and_then(|e| e.value().as_string())
                {
                    document.name = project_name.to_string();
                }
            }
            "locals" => parse_locals(node, &mut document.locals, overrides)?,
            _ => {}
        }
    }

    // 宣言されていないローカル値の上書きは打ち間違いとみなす
    if let Some(unknown) = overrides.keys().find(|k| !document.locals.contains_key(*k)) {
        return Err(FlowError::UnknownLocal(unknown.clone()));
    }

    // 2パス目: resource / data / output
    let mut seen = HashSet::new();
    let mut output_names = HashSet::new();
    for node in doc.nodes() {
        match node.name().value() {
            "project" | "locals" => {}
            "resource" | "data" => {
                let mode = if node.name().value() == "data" {
                    NodeMode::Data
                } else {
                    NodeMode::Managed
                };
                let decl = parse_node(node, mode, &document.locals)?;
                if !seen.insert(decl.address.clone()) {
                    return Err(FlowError::DuplicateNode(decl.address.to_string()));
                }
                tracing::debug!(address = %decl.address, "Parsed node");
                document.nodes.push(decl);
            }
            "output" => {
                let output = parse_output(node, &document.locals)?;
                if !output_names.insert(output.name.clone()) {
                    return Err(FlowError::InvalidConfig(format!(
                        "output '{}' が重複しています",
                        output.name
                    )));
                }
                document.outputs.push(output);
            }
            other => {
                return Err(FlowError::InvalidConfig(format!(
                    "不明なトップレベルノード: {}",
                    other
                )));
            }
        }
    }

    tracing::debug!(
        nodes = document.nodes.len(),
        locals = document.locals.len(),
        "Parsed infrastructure document"
    );
    Ok(document)
}
