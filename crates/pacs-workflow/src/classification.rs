//! 分类批处理：解码目录下全部影像并生成结果索引

use crate::orchestrator::DEFAULT_WORKERS;
use crate::pool::run_bounded;
use crate::result_index::ResultIndex;
use crate::scan::scan_dicom_files;
use pacs_ai::Classifier;
use pacs_core::{BatchSummary, ClassificationResult, PacsError, Result};
use pacs_dicom::ImageDecoder;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// 分类批处理
pub struct ClassificationPass {
    classifier: Arc<Classifier>,
    workers: usize,
}

impl ClassificationPass {
    pub fn new(classifier: Classifier) -> Self {
        Self {
            classifier: Arc::new(classifier),
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// 分类目录下所有DICOM文件，结果以相对路径为键
    pub async fn classify_tree(&self, input_root: &Path) -> Result<(ResultIndex, BatchSummary)> {
        let files = scan_dicom_files(input_root)?;
        info!(
            "开始分类: {} 个文件, 模型 {}, 并发数 {}",
            files.len(),
            self.classifier.model_name(),
            self.workers
        );

        let mut summary = BatchSummary {
            files_seen: files.len(),
            ..Default::default()
        };

        let keys: Vec<String> = files.iter().map(|file| file.key.clone()).collect();
        let outcomes = run_bounded(files, self.workers, |file| {
            let classifier = self.classifier.clone();
            async move {
                tokio::task::spawn_blocking(move || classify_file(&classifier, &file.path))
                    .await
                    .unwrap_or_else(|e| Err(PacsError::Internal(format!("分类任务失败: {}", e))))
            }
        })
        .await;

        let mut index = ResultIndex::new();
        for (key, result) in keys.into_iter().zip(outcomes) {
            match result.and_then(|result| result) {
                Ok(classification) => {
                    index.insert(key, classification);
                    summary.classified += 1;
                }
                Err(e) => {
                    error!("分类 {} 失败: {}", key, e);
                    summary.record_failure(key, &e);
                }
            }
        }

        info!(
            "分类完成: 文件 {}, 成功 {}, 失败 {}",
            summary.files_seen,
            summary.classified,
            summary.failure_count()
        );
        Ok((index, summary))
    }
}

fn classify_file(classifier: &Classifier, path: &Path) -> Result<ClassificationResult> {
    let image = ImageDecoder::decode(path)?;
    classifier.classify(&image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use pacs_ai::ImageModel;
    use pacs_core::PredictedClass;
    use pacs_dicom::fixtures::SyntheticImage;

    struct ConstantModel;

    impl ImageModel for ConstantModel {
        fn name(&self) -> &str {
            "constant"
        }

        fn logits(&self, _input: &Array4<f32>) -> Result<Vec<f32>> {
            Ok(vec![0.0, 3.0, 1.0])
        }
    }

    #[tokio::test]
    async fn test_classify_tree_keys_by_relative_path() {
        let input = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(input.path().join("A")).unwrap();
        SyntheticImage::monochrome2(4, 4, (0..16).map(|v| v * 64).collect())
            .write_to(input.path().join("A/1.dcm"))
            .unwrap();
        // 全黑影像无法归一化
        SyntheticImage::monochrome2(2, 2, vec![0; 4])
            .write_to(input.path().join("A/2.dcm"))
            .unwrap();

        let pass = ClassificationPass::new(Classifier::new(Arc::new(ConstantModel))).with_workers(2);
        let (index, summary) = pass.classify_tree(input.path()).await.unwrap();

        assert_eq!(summary.files_seen, 2);
        assert_eq!(summary.classified, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].path, "A/2.dcm");

        let result = index.get("A/1.dcm").unwrap();
        assert_eq!(result.predicted_class, PredictedClass::Index(1));
        assert_eq!(result.predicted_probabilities.len(), 3);
    }
}
