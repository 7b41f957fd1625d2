//! 分类适配器
//!
//! 连接归一化影像与外部模型：预处理、单次前向推理、softmax、取最大概率类别。

use crate::model::ImageModel;
use crate::preprocess::Preprocessor;
use pacs_core::{ClassificationResult, NormalizedImage, PacsError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// 影像分类器
#[derive(Clone)]
pub struct Classifier {
    model: Arc<dyn ImageModel>,
    preprocessor: Preprocessor,
    /// 期望的类别数，`None` 表示不检查
    expected_classes: Option<usize>,
}

impl Classifier {
    pub fn new(model: Arc<dyn ImageModel>) -> Self {
        Self {
            model,
            preprocessor: Preprocessor::default(),
            expected_classes: None,
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_expected_classes(mut self, classes: Option<usize>) -> Self {
        self.expected_classes = classes;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// 对单张影像分类
    pub fn classify(&self, image: &NormalizedImage) -> Result<ClassificationResult> {
        let failure = |reason: String| PacsError::ClassificationFailure {
            path: image.source.clone(),
            reason,
        };

        let tensor = self.preprocessor.to_tensor(image)?;
        debug!("输入张量形状: {:?}", tensor.shape());

        let logits = self
            .model
            .logits(&tensor)
            .map_err(|e| failure(format!("模型推理失败: {}", e)))?;

        if logits.is_empty() {
            return Err(failure("模型输出为空".to_string()));
        }
        if let Some(expected) = self.expected_classes {
            if logits.len() != expected {
                return Err(failure(format!("类别数不匹配: 期望 {}, 实际 {}", expected, logits.len())));
            }
        }
        if logits.iter().any(|v| !v.is_finite()) {
            return Err(failure("模型输出包含非有限值".to_string()));
        }

        let probabilities = softmax(&logits);
        let predicted = argmax(&probabilities).ok_or_else(|| failure("无法确定预测类别".to_string()))?;

        info!("分类完成: {} → 类别 {} (p={:.4})", image.source, predicted, probabilities[predicted]);
        Ok(ClassificationResult::new(predicted, probabilities))
    }
}

/// 归一化指数函数，减去最大值以保证数值稳定
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, |acc, v| acc.max(f64::from(v)));
    let exps: Vec<f64> = logits.iter().map(|&v| (f64::from(v) - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// 最大值下标，相同时取最小下标
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, &value) in values.iter().enumerate() {
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use pacs_core::PredictedClass;

    struct FixedLogits(Vec<f32>);

    impl ImageModel for FixedLogits {
        fn name(&self) -> &str {
            "fixed"
        }

        fn logits(&self, input: &Array4<f32>) -> Result<Vec<f32>> {
            assert_eq!(input.shape(), &[1, 3, 224, 224]);
            Ok(self.0.clone())
        }
    }

    struct FailingModel;

    impl ImageModel for FailingModel {
        fn name(&self) -> &str {
            "failing"
        }

        fn logits(&self, _input: &Array4<f32>) -> Result<Vec<f32>> {
            Err(PacsError::Internal("shape mismatch".to_string()))
        }
    }

    fn image() -> NormalizedImage {
        NormalizedImage::new("A/1.dcm", 8, 8, (0..64).map(|v| v as f32 * 16.0 - 512.0).collect())
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let classifier = Classifier::new(Arc::new(FixedLogits(vec![2.0, -1.0, 0.5, 7.5, 3.0])));
        let result = classifier.classify(&image()).unwrap();

        let sum: f64 = result.predicted_probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(result.predicted_probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
        assert_eq!(result.predicted_class, PredictedClass::Index(3));
    }

    #[test]
    fn test_uniform_logits_pick_first_index() {
        let classifier = Classifier::new(Arc::new(FixedLogits(vec![0.3; 4])));
        let result = classifier.classify(&image()).unwrap();

        assert_eq!(result.predicted_class, PredictedClass::Index(0));
        for p in &result.predicted_probabilities {
            assert!((p - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_argmax_tie_break() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_softmax_is_stable_for_large_logits() {
        let probabilities = softmax(&[1000.0, 1000.0]);
        assert_eq!(probabilities, vec![0.5, 0.5]);
    }

    #[test]
    fn test_model_error_becomes_classification_failure() {
        let classifier = Classifier::new(Arc::new(FailingModel));
        match classifier.classify(&image()) {
            Err(PacsError::ClassificationFailure { path, reason }) => {
                assert_eq!(path, "A/1.dcm");
                assert!(reason.contains("shape mismatch"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_class_count_mismatch() {
        let classifier = Classifier::new(Arc::new(FixedLogits(vec![1.0, 2.0])))
            .with_expected_classes(Some(1000));
        assert!(matches!(
            classifier.classify(&image()),
            Err(PacsError::ClassificationFailure { .. })
        ));
    }

    #[test]
    fn test_empty_logits_rejected() {
        let classifier = Classifier::new(Arc::new(FixedLogits(vec![])));
        assert!(classifier.classify(&image()).is_err());
    }
}
