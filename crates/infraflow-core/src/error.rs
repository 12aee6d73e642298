use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO エラー: {path}\n理由: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("ノード '{0}' が重複して定義されています")]
    DuplicateNode(String),

    #[error("ローカル値が見つかりません: local.{0}")]
    UnknownLocal(String),

    #[error("'{node}' に必須属性 '{attribute}' が指定されていません")]
    MissingAttribute { node: String, attribute: String },

    #[error("'{node}' の種別 '{kind}' はプロバイダーでサポートされていません")]
    UnknownKind { node: String, kind: String },

    #[error("'{node}' が存在しないノード '{target}' を参照しています")]
    DanglingReference { node: String, target: String },

    #[error("'{node}' が参照するフィールド '{target}.{field}' は公開されていません")]
    UnknownField {
        node: String,
        target: String,
        field: String,
    },

    #[error("循環依存が検出されました: {0}")]
    CircularDependency(String),

    #[error("'{node}' の参照 '{reference}' は現時点で解決できません")]
    UnresolvedReference { node: String, reference: String },
}

impl FlowError {
    /// 外部呼び出し前に検出される静的エラーかどうか
    pub fn is_static(&self) -> bool {
        !matches!(self, FlowError::UnresolvedReference { .. })
    }

    /// 参照エラー（ReferenceError）に分類されるか
    pub fn is_reference_error(&self) -> bool {
        matches!(
            self,
            FlowError::DanglingReference { .. }
                | FlowError::UnknownField { .. }
                | FlowError::UnknownKind { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
