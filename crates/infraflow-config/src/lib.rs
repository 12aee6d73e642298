pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{RetrySettings, Settings};

use std::path::PathBuf;

/// プロジェクトファイルを直接指定する環境変数
pub const CONFIG_PATH_ENV: &str = "INFRAFLOW_CONFIG_PATH";

/// プロジェクトごとの作業ディレクトリ（状態ファイルなど）
pub const PROJECT_DIR: &str = ".infraflow";

const CANDIDATES: [&str; 2] = ["infra.local.kdl", "infra.kdl"];

/// InfraFlowの設定ディレクトリを取得（なければ作成）
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("infraflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// プロジェクトの infra.kdl を探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 INFRAFLOW_CONFIG_PATH (直接パス指定)
/// 2. カレントディレクトリ: infra.local.kdl, infra.kdl
/// 3. ./.infraflow/infra.kdl
pub fn find_project_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} のファイルが存在しません", CONFIG_PATH_ENV);
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    // 3. ./.infraflow/ ディレクトリで検索
    let path = current_dir.join(PROJECT_DIR).join("infra.kdl");
    if path.exists() {
        return Ok(path);
    }

    Err(ConfigError::ProjectFileNotFound)
}

/// プロジェクトファイルからプロジェクトのルートディレクトリを求める
///
/// `.infraflow/infra.kdl` の場合は `.infraflow` の親がルートになります。
pub fn project_root(project_file: &std::path::Path) -> PathBuf {
    let parent = project_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    match parent.file_name() {
        Some(name) if name == PROJECT_DIR => parent
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".")),
        _ => parent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use std::path::Path;

    #[test]
    fn test_get_config_dir() {
        let result = get_config_dir();
        assert!(result.is_ok());

        let config_dir = result.unwrap();
        assert!(config_dir.ends_with("infraflow"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_project_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("infra.kdl"), "// test").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, find_project_file);
        assert!(result.unwrap().ends_with("infra.kdl"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_project_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("infra.kdl"), "// shared").unwrap();
        fs::write(temp_dir.path().join("infra.local.kdl"), "// local").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        // infra.local.kdl が優先される
        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, find_project_file).unwrap();
        assert!(result.ends_with("infra.local.kdl"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_project_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let project_dir = temp_dir.path().join(PROJECT_DIR);
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join("infra.kdl"), "// in project dir").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, find_project_file).unwrap();
        assert!(result.ends_with(".infraflow/infra.kdl"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_project_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.kdl");
        fs::write(&config_path, "// custom").unwrap();

        let result = temp_env::with_var(CONFIG_PATH_ENV, Some(&config_path), find_project_file);
        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    #[serial]
    fn test_find_project_file_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, find_project_file);
        assert!(matches!(result, Err(ConfigError::ProjectFileNotFound)));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    fn test_project_root() {
        assert_eq!(
            project_root(Path::new("/work/form-sink/infra.kdl")),
            PathBuf::from("/work/form-sink")
        );
        assert_eq!(
            project_root(Path::new("/work/form-sink/.infraflow/infra.kdl")),
            PathBuf::from("/work/form-sink")
        );
        assert_eq!(project_root(Path::new("infra.kdl")), PathBuf::from("."));
    }
}
