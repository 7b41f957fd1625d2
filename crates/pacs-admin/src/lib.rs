//! # PACS管理模块
//!
//! 流水线的配置加载、校验与日志初始化

pub mod config;
pub mod logging;

pub use config::{ConfigOverrides, ConfigValidator, PipelineConfig};
pub use logging::init_logging;
