//! エンジン設定（settings.yaml）
//!
//! 以下の順に最初に見つかったファイルを読み込みます:
//! 1. プロジェクトの `.infraflow/settings.yaml`
//! 2. `~/.config/infraflow/settings.yaml`
//!
//! どちらも無ければデフォルト値を使います。CLIのフラグはこれらより優先されます。

use crate::PROJECT_DIR;
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE: &str = "settings.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 同時に実行するノード操作の上限
    pub parallelism: usize,

    pub retry: RetrySettings,

    /// リソースを作成するフォルダ
    pub folder_id: Option<String>,

    /// デフォルトのゾーン
    pub zone: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            parallelism: 10,
            retry: RetrySettings::default(),
            folder_id: None,
            zone: None,
        }
    }
}

/// 一時的なエラーの再試行設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Settings {
    /// プロジェクト → グローバルの順で設定を読み込む
    pub fn load(project_root: &Path) -> Result<Self> {
        let mut candidates = vec![project_root.join(PROJECT_DIR).join(SETTINGS_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("infraflow").join(SETTINGS_FILE));
        }
        Self::load_first(&candidates)
    }

    /// 存在する最初のファイルを読み込む（無ければデフォルト）
    pub fn load_first(candidates: &[PathBuf]) -> Result<Self> {
        match candidates.iter().find(|p| p.is_file()) {
            Some(path) => Self::from_file(path),
            None => {
                tracing::debug!("設定ファイルが無いためデフォルト値を使用します");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::InvalidSettings {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        tracing::debug!(path = %path.display(), "設定ファイルを読み込みました");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(ConfigError::InvalidValue(
                "parallelism は 1 以上を指定してください".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "retry.max_attempts は 1 以上を指定してください".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue(
                "retry.backoff_multiplier は 1.0 以上を指定してください".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_first(&[temp_dir.path().join(SETTINGS_FILE)]).unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.parallelism, 10);
        assert_eq!(settings.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE);
        fs::write(
            &path,
            "parallelism: 4\nfolder_id: b1g-form-sink\nretry:\n  max_attempts: 5\n",
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.parallelism, 4);
        assert_eq!(settings.folder_id.as_deref(), Some("b1g-form-sink"));
        assert_eq!(settings.zone, None);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.initial_delay_ms, 1_000);
    }

    #[test]
    fn test_project_settings_take_priority() {
        let project = tempfile::tempdir().unwrap();
        let global = tempfile::tempdir().unwrap();

        let project_file = project.path().join(PROJECT_DIR).join(SETTINGS_FILE);
        fs::create_dir_all(project_file.parent().unwrap()).unwrap();
        fs::write(&project_file, "zone: ru-central1-b\n").unwrap();
        let global_file = global.path().join(SETTINGS_FILE);
        fs::write(&global_file, "zone: ru-central1-a\n").unwrap();

        let settings = Settings::load_first(&[project_file, global_file.clone()]).unwrap();
        assert_eq!(settings.zone.as_deref(), Some("ru-central1-b"));

        let settings = Settings::load_first(&[project.path().join("missing.yaml"), global_file])
            .unwrap();
        assert_eq!(settings.zone.as_deref(), Some("ru-central1-a"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(SETTINGS_FILE);

        fs::write(&path, "parallelism: 0\n").unwrap();
        assert!(matches!(
            Settings::from_file(&path),
            Err(ConfigError::InvalidValue(_))
        ));

        fs::write(&path, "parallelism: [1, 2]\n").unwrap();
        assert!(matches!(
            Settings::from_file(&path),
            Err(ConfigError::InvalidSettings { .. })
        ));
    }
}
