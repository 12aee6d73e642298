use super::load_refreshed_state;
use crate::project::{GlobalArgs, Project};
use crate::render;
use colored::Colorize;
use infraflow_cloud::{CloudProvider, PlanEvaluator};
use serde_json::Value;

pub async fn handle(
    args: &GlobalArgs,
    set: Vec<(String, Value)>,
    destroy: bool,
) -> anyhow::Result<()> {
    let project = Project::load(args, set)?;
    let provider = project.provider(args).await?;
    let graph = project.graph(provider.schema())?;
    provider.validate(&graph).await?;

    println!(
        "{} {} ({})",
        "プロジェクト:".bold(),
        graph.name().cyan(),
        project.file.display()
    );

    // 読み取りのみなのでロックは取らない
    let manager = project.state_manager();
    let state = load_refreshed_state(&project, &provider, &manager).await?;

    let evaluator = PlanEvaluator::new(&graph, provider.schema());
    let plan = if destroy {
        evaluator.plan_destroy(&state)?
    } else {
        evaluator.plan(&state)?
    };

    println!();
    render::print_plan(&plan, provider.schema());

    if plan.has_changes {
        println!();
        let hint = if destroy {
            "削除するには: infraflow destroy"
        } else {
            "適用するには: infraflow apply"
        };
        println!("{}", hint.dimmed());
    }

    Ok(())
}
