//! プロジェクトの読み込み
//!
//! プロジェクトファイル・設定・状態ファイル・プロバイダーを
//! 各コマンドから同じ手順で組み立てるためのヘルパー

use anyhow::{Context, Result};
use infraflow_cloud::{ProviderContext, RetryConfig, StateManager};
use infraflow_cloud_local::{LOCAL_CLOUD_FILE, LocalCloudProvider};
use infraflow_config::{RetrySettings, Settings};
use infraflow_core::{Document, LocalOverrides, ProviderSchema, ResourceGraph, parse_kdl_file};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// すべてのサブコマンドに共通する引数
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub file: Option<PathBuf>,
    pub folder_id: Option<String>,
    pub zone: Option<String>,
}

/// 読み込み済みのプロジェクト
pub struct Project {
    pub file: PathBuf,
    pub root: PathBuf,
    pub settings: Settings,
    pub document: Document,
}

impl Project {
    pub fn load(args: &GlobalArgs, overrides: Vec<(String, Value)>) -> Result<Self> {
        let file = match &args.file {
            Some(file) => file.clone(),
            None => infraflow_config::find_project_file()?,
        };
        let root = infraflow_config::project_root(&file);
        let settings = Settings::load(&root)?;

        let overrides: LocalOverrides = overrides.into_iter().collect();
        let document = parse_kdl_file(&file, &overrides)
            .with_context(|| format!("{} の読み込みに失敗しました", file.display()))?;

        tracing::debug!(
            file = %file.display(),
            root = %root.display(),
            nodes = document.nodes.len(),
            "プロジェクトを読み込みました"
        );

        Ok(Self {
            file,
            root,
            settings,
            document,
        })
    }

    pub fn graph(&self, schema: &ProviderSchema) -> Result<ResourceGraph> {
        Ok(ResourceGraph::build(&self.document, schema)?)
    }

    /// CLIフラグ → 設定ファイルの順で値を決める
    pub fn provider_context(&self, args: &GlobalArgs) -> ProviderContext {
        let mut context = ProviderContext::new();
        if let Some(folder_id) = args.folder_id.as_ref().or(self.settings.folder_id.as_ref()) {
            context = context.with_folder_id(folder_id.clone());
        }
        if let Some(zone) = args.zone.as_ref().or(self.settings.zone.as_ref()) {
            context = context.with_zone(zone.clone());
        }
        context
    }

    pub async fn provider(&self, args: &GlobalArgs) -> Result<LocalCloudProvider> {
        let path = self.root.join(LOCAL_CLOUD_FILE);
        let provider = LocalCloudProvider::open(self.provider_context(args), &path)
            .await
            .with_context(|| format!("{} を開けませんでした", path.display()))?;
        Ok(provider)
    }

    pub fn state_manager(&self) -> StateManager {
        StateManager::new(&self.root)
    }

    pub fn parallelism(&self, flag: Option<usize>) -> usize {
        flag.unwrap_or(self.settings.parallelism).max(1)
    }

    pub fn retry(&self) -> RetryConfig {
        retry_config(&self.settings.retry)
    }
}

pub fn retry_config(settings: &RetrySettings) -> RetryConfig {
    RetryConfig {
        max_attempts: settings.max_attempts,
        initial_delay: Duration::from_millis(settings.initial_delay_ms),
        max_delay: Duration::from_millis(settings.max_delay_ms),
        backoff_multiplier: settings.backoff_multiplier,
    }
}

/// `--set KEY=VALUE` を解釈する
///
/// 値は整数 → 真偽値 → 文字列の順に解釈します。
pub fn parse_local_override(s: &str) -> std::result::Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("KEY=VALUE の形式で指定してください: {}", s))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("キーが空です: {}", s));
    }

    let value = if let Ok(n) = raw.parse::<i64>() {
        Value::from(n)
    } else if let Ok(b) = raw.parse::<bool>() {
        Value::Bool(b)
    } else {
        Value::String(raw.to_string())
    };

    Ok((key.to_string(), value))
}
