use crate::project::{GlobalArgs, Project};
use colored::Colorize;
use infraflow_cloud::CloudProvider;
use infraflow_core::{NodeMode, ResourceGraph};
use serde_json::Value;
use std::collections::BTreeMap;

pub async fn handle(args: &GlobalArgs, set: Vec<(String, Value)>) -> anyhow::Result<()> {
    println!("{}", "設定を検証中...".blue());

    match check(args, set).await {
        Ok((project, graph)) => {
            println!(
                "プロジェクトファイル: {}",
                project.file.display().to_string().cyan()
            );
            println!("{}", "✓ 設定ファイルは正常です！".green().bold());
            println!();
            print_summary(&graph);
            Ok(())
        }
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ 設定エラー".red().bold());
            eprintln!("  {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn check(
    args: &GlobalArgs,
    set: Vec<(String, Value)>,
) -> anyhow::Result<(Project, ResourceGraph)> {
    let project = Project::load(args, set)?;
    let provider = project.provider(args).await?;
    let graph = project.graph(provider.schema())?;
    provider.validate(&graph).await?;
    Ok((project, graph))
}

fn print_summary(graph: &ResourceGraph) {
    let mut by_kind: BTreeMap<(NodeMode, &str), (usize, usize)> = BTreeMap::new();
    for node in graph.nodes() {
        let entry = by_kind
            .entry((node.address().mode, node.address().kind.as_str()))
            .or_default();
        entry.0 += 1;
        if node.is_present() {
            entry.1 += 1;
        }
    }

    let present = graph.nodes().filter(|n| n.is_present()).count();
    println!("サマリー: {}", graph.name().cyan());
    println!("  ノード: {}個（うち作成対象 {}個）", graph.len(), present);
    for ((mode, kind), (total, present)) in &by_kind {
        let prefix = match mode {
            NodeMode::Managed => "",
            NodeMode::Data => "data.",
        };
        println!("    - {}{} ({}/{})", prefix, kind.cyan(), present, total);
    }
    println!("  依存関係: {}本", graph.edges().len());
    println!("  出力: {}個", graph.outputs().len());
}
