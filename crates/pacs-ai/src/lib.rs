//! # PACS AI模块
//!
//! 将归一化的X光影像转换为模型输入张量，调用预训练分类模型并输出类别与概率分布。
//! 模型通过 [`ImageModel`] 接口接入，ONNX Runtime 后端由 `onnx` 特性启用。

pub mod adapter;
pub mod model;
pub mod preprocess;

pub use adapter::{argmax, softmax, Classifier};
pub use model::ImageModel;
pub use preprocess::Preprocessor;

#[cfg(feature = "onnx")]
pub use model::OnnxModel;
