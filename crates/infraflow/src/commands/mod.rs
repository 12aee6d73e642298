pub mod apply;
pub mod destroy;
pub mod graph;
pub mod plan;
pub mod state;
pub mod validate;

use crate::project::{GlobalArgs, Project};
use crate::render;
use anyhow::Result;
use colored::Colorize;
use infraflow_cloud::{
    ApplyExecutor, ApplyOptions, CloudProvider, GlobalState, Plan, PlanEvaluator, StateManager,
    evaluate_outputs, refresh_state,
};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::watch;

/// apply / destroy の実行モード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Apply,
    Destroy,
}

/// 標準入力で確認を取る
fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N]: ", prompt);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim(), "y" | "Y" | "yes"))
}

/// Ctrl-C で true になるキャンセルシグナル
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!(
                "{}",
                "⚠ 中断を受け付けました。実行中の操作の完了を待っています...".yellow()
            );
            let _ = tx.send(true);
        }
    });
    rx
}

/// 状態を読み込み、プロバイダーの実体と突き合わせる
pub(crate) async fn load_refreshed_state(
    project: &Project,
    provider: &dyn CloudProvider,
    manager: &StateManager,
) -> Result<GlobalState> {
    let mut state = manager.load().await?;
    let report = refresh_state(provider, &project.retry(), &mut state).await?;
    for address in &report.removed {
        println!(
            "{} {} は外部で削除されています。再作成を計画します",
            "⚠".yellow(),
            address
        );
    }
    if !report.updated.is_empty() {
        tracing::info!(count = report.updated.len(), "計算属性の変化を状態に反映しました");
    }
    Ok(state)
}

/// プランを作成して確認の上で適用する（apply / destroy 共通）
pub(crate) async fn plan_and_apply(
    args: &GlobalArgs,
    project: Project,
    mode: Mode,
    yes: bool,
    parallelism: Option<usize>,
) -> Result<()> {
    let provider = Arc::new(project.provider(args).await?);
    let graph = project.graph(provider.schema())?;
    provider.validate(&graph).await?;

    let auth = provider.check_auth().await?;
    println!(
        "{} {} ({})",
        "プロバイダー:".bold(),
        provider.display_name().cyan(),
        auth.account_info.unwrap_or_default()
    );

    let manager = project.state_manager();
    let lock = manager.acquire_lock().await?;
    let mut state = load_refreshed_state(&project, &*provider, &manager).await?;

    let evaluator = PlanEvaluator::new(&graph, provider.schema());
    let plan: Plan = match mode {
        Mode::Apply => evaluator.plan(&state)?,
        Mode::Destroy => evaluator.plan_destroy(&state)?,
    };

    println!();
    render::print_plan(&plan, provider.schema());
    if !plan.has_changes {
        lock.release().await?;
        if mode == Mode::Apply {
            render::print_outputs(&evaluate_outputs(&graph, &state));
        }
        return Ok(());
    }

    println!();
    if !yes {
        let prompt = match mode {
            Mode::Apply => "この計画を適用しますか？",
            Mode::Destroy => "管理している全リソースを削除しますか？",
        };
        if !confirm(prompt)? {
            lock.release().await?;
            println!("{}", "キャンセルしました".yellow());
            return Ok(());
        }
    }

    let options = ApplyOptions {
        parallelism: project.parallelism(parallelism),
        retry: project.retry(),
    };
    tracing::debug!(parallelism = options.parallelism, "適用を開始します");

    let executor = ApplyExecutor::new(provider.clone(), manager.clone(), options);
    let result = executor
        .apply(&graph, &plan, &mut state, cancel_on_ctrl_c())
        .await;
    lock.release().await?;
    let result = result?;

    render::print_apply_result(&result);
    if mode == Mode::Apply {
        render::print_outputs(&evaluate_outputs(&graph, &state));
    }

    result.into_result()?;
    Ok(())
}
