//! 归档投递客户端
//!
//! 将序列化后的结构化报告以 `application/dicom` POST 到PACS归档端点（Orthanc `/instances`），
//! 使用HTTP基本认证。只有HTTP 200视为成功，其他状态码或传输错误均为单项投递失败，
//! 不做自动重试。

use async_trait::async_trait;
use pacs_core::{PacsError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// DICOM 内容类型
pub const DICOM_CONTENT_TYPE: &str = "application/dicom";

/// 报告投递目标
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// 目标描述（用于日志）
    fn target(&self) -> &str;

    /// 投递一份报告，`name` 仅用于日志与错误定位
    async fn deliver(&self, name: &str, payload: Vec<u8>) -> Result<()>;
}

/// 归档连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSettings {
    pub url: String,
    pub username: String,
    pub password: String,
    /// 单次请求超时
    pub timeout: Duration,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8042/instances".to_string(),
            username: "orthanc".to_string(),
            password: "orthanc".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// PACS归档客户端，生命周期限定在一次批处理运行内
pub struct ArchiveClient {
    settings: ArchiveSettings,
    client: reqwest::Client,
}

impl ArchiveClient {
    pub fn new(settings: ArchiveSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent("PACS-SR/1.0")
            .build()
            .map_err(|e| PacsError::Config(format!("HTTP客户端创建失败: {}", e)))?;

        info!("初始化归档客户端: {}", settings.url);
        Ok(Self { settings, client })
    }

    fn failure(&self, status: Option<u16>, body: String) -> PacsError {
        PacsError::DeliveryFailure {
            target: self.settings.url.clone(),
            status,
            body,
        }
    }
}

#[async_trait]
impl ReportSink for ArchiveClient {
    fn target(&self) -> &str {
        &self.settings.url
    }

    async fn deliver(&self, name: &str, payload: Vec<u8>) -> Result<()> {
        info!("尝试投递: {} ({} bytes)", name, payload.len());

        let request = self
            .client
            .post(&self.settings.url)
            .header(reqwest::header::CONTENT_TYPE, DICOM_CONTENT_TYPE)
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .body(payload);

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status == reqwest::StatusCode::OK {
                    info!("投递成功: {}", name);
                    Ok(())
                } else {
                    let body = response.text().await.unwrap_or_default();
                    error!("投递失败 {}: {} - {}", name, status.as_u16(), body);
                    Err(self.failure(Some(status.as_u16()), body))
                }
            }
            Err(e) => {
                error!("投递 {} 时发生传输错误: {}", name, e);
                Err(self.failure(None, e.to_string()))
            }
        }
    }
}
