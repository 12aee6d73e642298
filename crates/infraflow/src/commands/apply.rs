use super::{Mode, plan_and_apply};
use crate::project::{GlobalArgs, Project};
use serde_json::Value;

pub async fn handle(
    args: &GlobalArgs,
    set: Vec<(String, Value)>,
    yes: bool,
    parallelism: Option<usize>,
) -> anyhow::Result<()> {
    let project = Project::load(args, set)?;
    plan_and_apply(args, project, Mode::Apply, yes, parallelism).await
}
