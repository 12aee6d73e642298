use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "プロジェクトファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: infra.local.kdl, infra.kdl\n\
        - ./.infraflow/infra.kdl\n\
        または INFRAFLOW_CONFIG_PATH 環境変数で直接指定できます"
    )]
    ProjectFileNotFound,

    #[error("設定ファイルの読み込みに失敗しました: {path}\n理由: {source}")]
    InvalidSettings {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("無効な設定値: {0}")]
    InvalidValue(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
