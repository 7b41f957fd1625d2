//! 预测模型接口
//!
//! 模型被视为纯函数能力：输入标准化张量，输出 logits。
//! 训练和模型结构不属于本模块职责，推理过程不会更新任何参数。

use ndarray::Array4;
use pacs_core::Result;

/// 影像分类模型
pub trait ImageModel: Send + Sync {
    /// 模型名称
    fn name(&self) -> &str;

    /// 对 `[1, 3, H, W]` 张量执行一次前向推理，返回 logits
    fn logits(&self, input: &Array4<f32>) -> Result<Vec<f32>>;
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxModel;

#[cfg(feature = "onnx")]
mod onnx {
    use super::ImageModel;
    use ndarray::Array4;
    use ort::session::Session;
    use ort::value::TensorRef;
    use pacs_core::{PacsError, Result};
    use std::path::Path;
    use std::sync::Mutex;
    use tracing::info;

    /// 基于 ONNX Runtime 的模型
    ///
    /// `Session::run` 需要 `&mut self`，因此会话放在互斥锁中。
    pub struct OnnxModel {
        name: String,
        session: Mutex<Session>,
    }

    impl OnnxModel {
        /// 从文件加载模型，每次运行只加载一次
        pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self> {
            if !model_path.exists() {
                return Err(PacsError::Config(format!("模型文件不存在: {}", model_path.display())));
            }

            let session = Session::builder()
                .map_err(|e: ort::Error| PacsError::Internal(e.to_string()))?
                .with_intra_threads(intra_threads)
                .map_err(|e| PacsError::Internal(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e: ort::Error| PacsError::Internal(format!("ONNX模型加载失败: {e}")))?;

            info!("ONNX模型已加载: {}", model_path.display());

            Ok(Self {
                name: model_path.display().to_string(),
                session: Mutex::new(session),
            })
        }
    }

    impl ImageModel for OnnxModel {
        fn name(&self) -> &str {
            &self.name
        }

        fn logits(&self, input: &Array4<f32>) -> Result<Vec<f32>> {
            let tensor = TensorRef::from_array_view(input)
                .map_err(|e| PacsError::Internal(format!("输入张量构建失败: {e}")))?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| PacsError::Internal("模型会话锁已中毒".to_string()))?;

            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| PacsError::Internal(format!("ONNX推理失败: {e}")))?;

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| PacsError::Internal(format!("输出提取失败: {e}")))?;

            // 期望输出 [1, num_classes]
            if shape.len() != 2 || shape[0] != 1 {
                return Err(PacsError::Internal(format!("输出形状异常: {shape:?}")));
            }

            Ok(data.to_vec())
        }
    }
}
