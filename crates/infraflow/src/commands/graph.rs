use crate::project::{GlobalArgs, Project};
use colored::Colorize;
use infraflow_cloud_local::local_schema;
use infraflow_core::EdgeKind;
use serde_json::Value;

pub fn handle(args: &GlobalArgs, set: Vec<(String, Value)>) -> anyhow::Result<()> {
    let project = Project::load(args, set)?;
    let graph = project.graph(&local_schema())?;

    println!("{} {}", "依存順:".bold(), graph.name().cyan());
    println!();

    for (index, address) in graph.topological_order().iter().enumerate() {
        let Some(node) = graph.node(address) else {
            continue;
        };
        let name = if node.is_present() {
            address.to_string().bold()
        } else {
            format!("{} (count = 0)", address).dimmed()
        };
        println!("{:>3}. {}", index + 1, name);

        for edge in graph.edges().iter().filter(|e| &e.from == address) {
            let marker = match edge.kind {
                EdgeKind::Implicit => "参照",
                EdgeKind::Explicit => "depends_on",
            };
            println!("       └─ {} {}", edge.to, format!("({})", marker).dimmed());
        }
    }

    Ok(())
}
