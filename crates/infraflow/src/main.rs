mod commands;
mod project;
mod render;

use clap::{Parser, Subcommand};
use project::{GlobalArgs, parse_local_override};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "infraflow")]
#[command(about = "宣言したインフラを、依存関係の順に。", long_about = None)]
struct Cli {
    /// プロジェクトファイル（省略時は infra.local.kdl / infra.kdl を探索）
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// リソースを作成するフォルダ
    #[arg(long, global = true, env = "INFRAFLOW_FOLDER_ID")]
    folder_id: Option<String>,

    /// デフォルトのゾーン
    #[arg(long, global = true, env = "INFRAFLOW_ZONE")]
    zone: Option<String>,

    /// 詳細なログを表示
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// プロジェクトファイルと依存関係グラフを検証
    Validate {
        /// ローカル値を上書き (KEY=VALUE)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_local_override)]
        set: Vec<(String, Value)>,
    },
    /// ノードを依存順に表示
    Graph {
        /// ローカル値を上書き (KEY=VALUE)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_local_override)]
        set: Vec<(String, Value)>,
    },
    /// 実行計画を表示（変更は行わない）
    Plan {
        /// ローカル値を上書き (KEY=VALUE)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_local_override)]
        set: Vec<(String, Value)>,
        /// 全リソースの削除計画を表示
        #[arg(long)]
        destroy: bool,
    },
    /// 実行計画を適用
    Apply {
        /// ローカル値を上書き (KEY=VALUE)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_local_override)]
        set: Vec<(String, Value)>,
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
        /// 同時に実行する操作の上限
        #[arg(short, long, env = "INFRAFLOW_PARALLELISM")]
        parallelism: Option<usize>,
    },
    /// 管理している全リソースを削除
    Destroy {
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
        /// 同時に実行する操作の上限
        #[arg(short, long, env = "INFRAFLOW_PARALLELISM")]
        parallelism: Option<usize>,
    },
    /// 状態ファイルを参照
    #[command(subcommand)]
    State(StateCommands),
    /// バージョン情報を表示
    Version,
}

/// 状態ファイルのサブコマンド
#[derive(Subcommand)]
enum StateCommands {
    /// 記録されているノードの一覧
    List,
    /// ノードの記録内容を表示
    Show {
        /// ノードのアドレス (例: bucket.forms, data.secret_version.keys)
        address: String,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let args = GlobalArgs {
        file: cli.file,
        folder_id: cli.folder_id,
        zone: cli.zone,
    };

    match cli.command {
        Commands::Validate { set } => {
            commands::validate::handle(&args, set).await?;
        }
        Commands::Graph { set } => {
            commands::graph::handle(&args, set)?;
        }
        Commands::Plan { set, destroy } => {
            commands::plan::handle(&args, set, destroy).await?;
        }
        Commands::Apply {
            set,
            yes,
            parallelism,
        } => {
            commands::apply::handle(&args, set, yes, parallelism).await?;
        }
        Commands::Destroy { yes, parallelism } => {
            commands::destroy::handle(&args, yes, parallelism).await?;
        }
        Commands::State(state_cmd) => match state_cmd {
            StateCommands::List => commands::state::handle_list(&args).await?,
            StateCommands::Show { address } => {
                commands::state::handle_show(&args, &address).await?
            }
        },
        // プロジェクトファイル不要
        Commands::Version => {
            println!("infraflow {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
