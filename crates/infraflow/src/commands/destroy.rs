use super::{Mode, plan_and_apply};
use crate::project::{GlobalArgs, Project};
use colored::Colorize;

pub async fn handle(args: &GlobalArgs, yes: bool, parallelism: Option<usize>) -> anyhow::Result<()> {
    let project = Project::load(args, Vec::new())?;
    println!(
        "{}",
        format!("⚠ プロジェクト '{}' の全リソースを削除します", project.document.name)
            .red()
            .bold()
    );
    plan_and_apply(args, project, Mode::Destroy, yes, parallelism).await
}
