//! 错误定义模块

use thiserror::Error;

/// PACS系统统一错误类型
///
/// 单个文件的错误（`UnsupportedFormat`、`DecodeFailure`、`ClassificationFailure`、
/// `DeliveryFailure`、`MissingResultIndexEntry`）在批处理边界被记录并跳过；
/// 其余错误在批处理开始前出现时终止整个运行。
#[derive(Error, Debug)]
pub enum PacsError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("不支持的光度解释: {0}")]
    UnsupportedFormat(String),

    #[error("DICOM解码失败 {path}: {reason}")]
    DecodeFailure { path: String, reason: String },

    #[error("分类失败 {path}: {reason}")]
    ClassificationFailure { path: String, reason: String },

    #[error("投递失败 {target}: 状态码={status:?}, 响应={body}")]
    DeliveryFailure {
        target: String,
        status: Option<u16>,
        body: String,
    },

    #[error("结果索引缺少条目: {0}")]
    MissingResultIndexEntry(String),

    #[error("DICOM处理错误: {0}")]
    Dicom(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl PacsError {
    /// 是否为单个文件级别的错误（批处理中可跳过）
    pub fn is_item_error(&self) -> bool {
        matches!(
            self,
            PacsError::UnsupportedFormat(_)
                | PacsError::DecodeFailure { .. }
                | PacsError::ClassificationFailure { .. }
                | PacsError::DeliveryFailure { .. }
                | PacsError::MissingResultIndexEntry(_)
        )
    }
}

/// PACS系统统一结果类型
pub type Result<T> = std::result::Result<T, PacsError>;
