//! # DICOM处理模块
//!
//! 提供X光影像解码、VOI变换、身份元数据提取和结构化报告（SR）生成。

pub mod decoder;
pub mod parser;
pub mod report;
pub mod voi;

#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;

pub use decoder::ImageDecoder;
pub use parser::DicomParser;
pub use report::ReportBuilder;
pub use voi::{VoiFunction, VoiTransform};
