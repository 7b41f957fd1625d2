//! # PACS工作流模块
//!
//! 批处理流水线的各个阶段：
//! - 分类：解码目录下的影像并调用分类模型，生成结果索引
//! - 报告：按结果索引生成结构化报告，写入镜像目录并投递归档
//! - 投递：把已有报告目录重新发送到归档

pub mod classification;
pub mod orchestrator;
mod pool;
pub mod result_index;
pub mod scan;
pub mod upload;

pub use classification::ClassificationPass;
pub use orchestrator::{ReportOrchestrator, DEFAULT_WORKERS};
pub use result_index::{Lookup, ResultIndex};
pub use scan::{scan_dicom_files, ScannedFile};
pub use upload::upload_tree;
