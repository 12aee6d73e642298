//! リソースグラフ
//!
//! [`Document`] のノード宣言から、依存関係を明示的な辺リストとして持つ
//! 有向非巡回グラフを構築します。辺はグラフ構築時に一度だけ導出され、
//! プラン/適用時に再計算されることはありません。

use crate::error::{FlowError, Result};
use crate::model::{Document, NodeAddress, NodeDecl, Output, Presence};
use crate::schema::ProviderSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 辺の由来
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// 属性参照から導出
    Implicit,
    /// depends_on で宣言
    Explicit,
}

/// `from` は `to` に依存する（`to` が先に作成され、後に削除される）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeAddress,
    pub to: NodeAddress,
    pub kind: EdgeKind,
}

/// グラフ上のノード
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub decl: NodeDecl,

    /// 依存先の不在を反映した実効的な実体化フラグ
    pub presence: Presence,
}

impl GraphNode {
    pub fn address(&self) -> &NodeAddress {
        &self.decl.address
    }

    pub fn is_present(&self) -> bool {
        self.presence.is_present()
    }
}

/// 依存関係グラフ
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    name: String,
    nodes: BTreeMap<NodeAddress, GraphNode>,
    edges: Vec<Edge>,
    order: Vec<NodeAddress>,
    outputs: Vec<Output>,
}

impl ResourceGraph {
    /// Documentとスキーマからグラフを構築
    ///
    /// 参照先の不在・未公開フィールドは参照エラー、循環は循環依存エラーになります。
    pub fn build(document: &Document, schema: &ProviderSchema) -> Result<Self> {
        let mut nodes = BTreeMap::new();
        for decl in &document.nodes {
            let kind_schema = schema
                .get(decl.address.mode, &decl.address.kind)
                .ok_or_else(|| FlowError::UnknownKind {
                    node: decl.address.to_string(),
                    kind: decl.address.kind.clone(),
                })?;

            for required in &kind_schema.required {
                if !decl.attributes.contains_key(required) {
                    return Err(FlowError::MissingAttribute {
                        node: decl.address.to_string(),
                        attribute: required.clone(),
                    });
                }
            }

            nodes.insert(
                decl.address.clone(),
                GraphNode {
                    decl: decl.clone(),
                    presence: decl.presence,
                },
            );
        }

        let mut edges: Vec<Edge> = Vec::new();
        for decl in &document.nodes {
            for expr in decl.attributes.values() {
                for reference in expr.references() {
                    check_reference(
                        &nodes,
                        schema,
                        &decl.address,
                        &reference.address,
                        Some(reference.field.as_str()),
                    )?;
                    push_edge(
                        &mut edges,
                        &decl.address,
                        &reference.address,
                        EdgeKind::Implicit,
                    );
                }
            }
            for target in &decl.depends_on {
                check_reference(&nodes, schema, &decl.address, target, None)?;
                push_edge(&mut edges, &decl.address, target, EdgeKind::Explicit);
            }
        }

        for output in &document.outputs {
            let owner = NodeAddress::managed("output", output.name.clone());
            for reference in output.value.references() {
                check_reference(
                    &nodes,
                    schema,
                    &owner,
                    &reference.address,
                    Some(reference.field.as_str()),
                )?;
            }
        }

        let order = topological_sort(&nodes, &edges)?;

        // count = 0 のノードに依存するノードも実体化しない
        for address in &order {
            let absent_dependency = edges
                .iter()
                .filter(|e| &e.from == address)
                .any(|e| nodes.get(&e.to).is_some_and(|n| !n.is_present()));
            if absent_dependency && let Some(node) = nodes.get_mut(address) {
                if node.presence.is_present() {
                    tracing::debug!(address = %address, "Suppressed by absent dependency");
                }
                node.presence = Presence::Absent;
            }
        }

        tracing::debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            "Built resource graph"
        );

        Ok(Self {
            name: document.name.clone(),
            nodes,
            edges,
            order,
            outputs: document.outputs.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, address: &NodeAddress) -> Option<&GraphNode> {
        self.nodes.get(address)
    }

    /// トポロジカル順（依存先が先）のノード
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.order.iter().filter_map(|a| self.nodes.get(a))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// 依存先が依存元より前に並ぶ順序（同順位はアドレス順）
    pub fn topological_order(&self) -> &[NodeAddress] {
        &self.order
    }

    /// `address` が直接依存するノード
    pub fn dependencies(&self, address: &NodeAddress) -> Vec<&NodeAddress> {
        self.edges
            .iter()
            .filter(|e| &e.from == address)
            .map(|e| &e.to)
            .collect()
    }

    /// `address` に直接依存するノード
    pub fn dependents(&self, address: &NodeAddress) -> Vec<&NodeAddress> {
        self.edges
            .iter()
            .filter(|e| &e.to == address)
            .map(|e| &e.from)
            .collect()
    }

    /// `address` に推移的に依存する全ノード
    pub fn transitive_dependents(&self, address: &NodeAddress) -> BTreeSet<NodeAddress> {
        let mut visited = BTreeSet::new();
        let mut stack = vec![address.clone()];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents(&current) {
                if visited.insert(dependent.clone()) {
                    stack.push(dependent.clone());
                }
            }
        }
        visited
    }
}

fn check_reference(
    nodes: &BTreeMap<NodeAddress, GraphNode>,
    schema: &ProviderSchema,
    from: &NodeAddress,
    target: &NodeAddress,
    field: Option<&str>,
) -> Result<()> {
    let Some(target_node) = nodes.get(target) else {
        return Err(FlowError::DanglingReference {
            node: from.to_string(),
            target: target.to_string(),
        });
    };

    if let Some(field) = field {
        let computed = schema
            .get(target.mode, &target.kind)
            .is_some_and(|s| s.is_computed(field));
        if !computed && !target_node.decl.attributes.contains_key(field) {
            return Err(FlowError::UnknownField {
                node: from.to_string(),
                target: target.to_string(),
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

fn push_edge(edges: &mut Vec<Edge>, from: &NodeAddress, to: &NodeAddress, kind: EdgeKind) {
    if edges.iter().any(|e| &e.from == from && &e.to == to) {
        return;
    }
    edges.push(Edge {
        from: from.clone(),
        to: to.clone(),
        kind,
    });
}

/// Kahn法によるトポロジカルソート
fn topological_sort(
    nodes: &BTreeMap<NodeAddress, GraphNode>,
    edges: &[Edge],
) -> Result<Vec<NodeAddress>> {
    let mut remaining: BTreeMap<&NodeAddress, usize> = nodes.keys().map(|a| (a, 0)).collect();
    for edge in edges {
        if let Some(count) = remaining.get_mut(&edge.from) {
            *count += 1;
        }
    }

    let mut ready: BTreeSet<&NodeAddress> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(a, _)| *a)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(address) = ready.pop_first() {
        remaining.remove(address);
        order.push(address.clone());

        for edge in edges.iter().filter(|e| &e.to == address) {
            if let Some(count) = remaining.get_mut(&edge.from) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(&edge.from);
                }
            }
        }
    }

    if remaining.is_empty() {
        return Ok(order);
    }

    let cycle = find_cycle(remaining.keys().copied().collect(), edges);
    Err(FlowError::CircularDependency(cycle))
}

/// 残ったノードから循環経路を1つ取り出して表示用の文字列にする
fn find_cycle(remaining: BTreeSet<&NodeAddress>, edges: &[Edge]) -> String {
    let Some(start) = remaining.first().copied() else {
        return String::new();
    };

    let mut path: Vec<&NodeAddress> = vec![start];
    let mut current = start;
    loop {
        let next = edges
            .iter()
            .find(|e| &e.from == current && remaining.contains(&e.to))
            .map(|e| &e.to);
        let Some(next) = next else {
            break;
        };
        if let Some(pos) = path.iter().position(|a| *a == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|a| a.to_string()).collect();
            cycle.push(next.to_string());
            return cycle.join(" -> ");
        }
        path.push(next);
        current = next;
    }

    path.iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
