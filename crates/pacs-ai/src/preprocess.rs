//! 模型输入预处理
//!
//! 将 [-R, R] 范围的归一化影像转换为模型所需的 `[1, 3, 224, 224]` NCHW 张量。

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::Array4;
use pacs_core::{NormalizedImage, PacsError, Result, NORMALIZATION_RANGE};

/// 模型输入边长
pub const INPUT_SIZE: u32 = 224;

/// ImageNet 通道均值
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet 通道标准差
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 预处理器
#[derive(Debug, Clone)]
pub struct Preprocessor {
    pub size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            size: INPUT_SIZE,
            mean: CHANNEL_MEAN,
            std: CHANNEL_STD,
        }
    }
}

impl Preprocessor {
    /// 转换为标准化后的三通道张量
    ///
    /// 步骤：映射到 [0, 1] → 双线性缩放 → 灰度复制为三通道 → 按通道标准化。
    pub fn to_tensor(&self, image: &NormalizedImage) -> Result<Array4<f32>> {
        let failure = |reason: String| PacsError::ClassificationFailure {
            path: image.source.clone(),
            reason,
        };

        if !image.is_well_formed() {
            return Err(failure(format!(
                "输入形状无效: {}x{}, 数据长度 {}",
                image.rows,
                image.columns,
                image.data.len()
            )));
        }
        if image.data.iter().any(|v| !v.is_finite()) {
            return Err(failure("输入包含非有限值".to_string()));
        }

        let unit: Vec<f32> = image
            .data
            .iter()
            .map(|v| ((v + NORMALIZATION_RANGE) / (2.0 * NORMALIZATION_RANGE)).clamp(0.0, 1.0))
            .collect();

        let (width, height) = (image.columns as u32, image.rows as u32);
        let buffer = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(width, height, unit)
            .ok_or_else(|| failure("无法构建影像缓冲区".to_string()))?;

        // Triangle 即双线性插值
        let resized = imageops::resize(&buffer, self.size, self.size, FilterType::Triangle);

        let size = self.size as usize;
        let tensor = Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            let value = resized.get_pixel(x as u32, y as u32)[0];
            (value - self.mean[c]) / self.std[c]
        });

        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shape() {
        let image = NormalizedImage::new("t", 10, 20, vec![0.0; 200]);
        let tensor = Preprocessor::default().to_tensor(&image).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_constant_image_standardization() {
        // -R 映射为 0，标准化后为 -mean/std
        let image = NormalizedImage::new("t", 4, 4, vec![-NORMALIZATION_RANGE; 16]);
        let tensor = Preprocessor::default().to_tensor(&image).unwrap();

        for c in 0..3 {
            let expected = -CHANNEL_MEAN[c] / CHANNEL_STD[c];
            let actual = tensor[[0, c, 100, 100]];
            assert!((actual - expected).abs() < 1e-5, "channel {}: {}", c, actual);
        }
    }

    #[test]
    fn test_malformed_input_is_classification_failure() {
        let image = NormalizedImage::new("bad.dcm", 4, 4, vec![0.0; 15]);
        match Preprocessor::default().to_tensor(&image) {
            Err(PacsError::ClassificationFailure { path, .. }) => assert_eq!(path, "bad.dcm"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let image = NormalizedImage::new("nan.dcm", 1, 2, vec![0.0, f32::NAN]);
        assert!(Preprocessor::default().to_tensor(&image).is_err());
    }
}
