//! 分类结果索引
//!
//! 相对路径键到分类结果的映射，分类阶段写入一次，报告阶段多次读取。
//! JSON格式与历史文件兼容：`{"A/1.dcm": {"predicted_class": 2, "predicted_probabilities": [...]}}`。

use pacs_core::{ClassificationResult, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// 结果索引
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultIndex {
    entries: BTreeMap<String, ClassificationResult>,
}

/// 查找结果
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(ClassificationResult),
    /// 未命中，已替换为 Unknown 占位结果
    Missing(ClassificationResult),
}

impl ResultIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, result: ClassificationResult) {
        self.entries.insert(key.into(), result);
    }

    pub fn get(&self, key: &str) -> Option<&ClassificationResult> {
        self.entries.get(key)
    }

    /// 查找结果，未命中时给出 Unknown 占位
    pub fn lookup(&self, key: &str) -> Lookup {
        match self.entries.get(key) {
            Some(result) => Lookup::Found(result.clone()),
            None => Lookup::Missing(ClassificationResult::unknown()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 从JSON文件加载；文件缺失或格式错误时整批终止
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let index: ResultIndex = serde_json::from_str(&content)?;
        info!("已加载结果索引: {:?} ({} 条)", path, index.len());
        Ok(index)
    }

    /// 写入JSON文件（缩进格式）
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("结果索引已保存: {:?} ({} 条)", path, self.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacs_core::{PacsError, PredictedClass};

    #[test]
    fn test_load_existing_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classification_results.json");
        std::fs::write(
            &path,
            r#"{"A/1.dcm": {"predicted_class": 2, "predicted_probabilities": [0.1, 0.1, 0.7, 0.1]}}"#,
        )
        .unwrap();

        let index = ResultIndex::load(&path).unwrap();
        assert_eq!(index.len(), 1);
        let result = index.get("A/1.dcm").unwrap();
        assert_eq!(result.predicted_class, PredictedClass::Index(2));
        assert_eq!(result.predicted_probabilities, vec![0.1, 0.1, 0.7, 0.1]);
    }

    #[test]
    fn test_lookup_miss_substitutes_unknown() {
        let index = ResultIndex::new();
        match index.lookup("B/9.dcm") {
            Lookup::Missing(result) => assert!(result.is_unknown()),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/results.json");

        let mut index = ResultIndex::new();
        index.insert("A/1.dcm", ClassificationResult::new(0, vec![0.9, 0.1]));
        index.save(&path).unwrap();

        assert_eq!(ResultIndex::load(&path).unwrap(), index);
    }

    #[test]
    fn test_malformed_json_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(ResultIndex::load(&path), Err(PacsError::Serialization(_))));
        assert!(matches!(
            ResultIndex::load(dir.path().join("absent.json")),
            Err(PacsError::Io(_))
        ));
    }
}
