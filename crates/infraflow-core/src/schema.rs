//! プロバイダースキーマ
//!
//! プロバイダーが扱えるリソース種別と、その属性の性質を記述します。
//! グラフ構築時の参照検証と、プラン時の置換判定に使われます。

use crate::model::NodeMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 常に計算済みフィールドとして公開される識別子
pub const ID_FIELD: &str = "id";

/// 1種別分のスキーマ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// 必須属性
    pub required: Vec<String>,

    /// プロバイダーが適用時に決める属性
    pub computed: Vec<String>,

    /// 変更時に置換（削除→作成）が必要な属性
    pub force_new: Vec<String>,

    /// 状態表示で伏せる計算済み属性
    pub sensitive: Vec<String>,
}

impl ResourceSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn computed<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.computed.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn force_new<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force_new.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn sensitive<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn is_computed(&self, field: &str) -> bool {
        field == ID_FIELD || self.computed.iter().any(|c| c == field)
    }

    pub fn requires_replace(&self, attribute: &str) -> bool {
        self.force_new.iter().any(|f| f == attribute)
    }

    pub fn is_sensitive(&self, field: &str) -> bool {
        self.sensitive.iter().any(|s| s == field)
    }
}

/// プロバイダー全体のスキーマ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSchema {
    pub resources: BTreeMap<String, ResourceSchema>,
    pub data_sources: BTreeMap<String, ResourceSchema>,
}

impl ProviderSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, kind: impl Into<String>, schema: ResourceSchema) -> Self {
        self.resources.insert(kind.into(), schema);
        self
    }

    pub fn with_data_source(mut self, kind: impl Into<String>, schema: ResourceSchema) -> Self {
        self.data_sources.insert(kind.into(), schema);
        self
    }

    pub fn get(&self, mode: NodeMode, kind: &str) -> Option<&ResourceSchema> {
        match mode {
            NodeMode::Managed => self.resources.get(kind),
            NodeMode::Data => self.data_sources.get(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_always_computed() {
        let schema = ResourceSchema::new().computed(["access_key"]);
        assert!(schema.is_computed("id"));
        assert!(schema.is_computed("access_key"));
        assert!(!schema.is_computed("name"));
    }

    #[test]
    fn test_lookup_by_mode() {
        let schema = ProviderSchema::new()
            .with_resource("secret", ResourceSchema::new().required(["name"]))
            .with_data_source("secret_version", ResourceSchema::new().required(["secret_id"]));

        assert!(schema.get(NodeMode::Managed, "secret").is_some());
        assert!(schema.get(NodeMode::Data, "secret").is_none());
        assert!(schema.get(NodeMode::Data, "secret_version").is_some());
    }
}
