//! 仅投递：把目录下已有的报告文件全部发送到归档

use crate::pool::run_bounded;
use crate::scan::scan_dicom_files;
use pacs_core::{BatchSummary, Result};
use pacs_integration::ReportSink;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

pub async fn upload_tree(root: &Path, sink: Arc<dyn ReportSink>, workers: usize) -> Result<BatchSummary> {
    let files = scan_dicom_files(root)?;
    info!("开始投递 {} 个文件到 {}", files.len(), sink.target());

    let mut summary = BatchSummary {
        files_seen: files.len(),
        ..Default::default()
    };

    let keys: Vec<String> = files.iter().map(|file| file.key.clone()).collect();
    let outcomes = run_bounded(files, workers, |file| {
        let sink = sink.clone();
        async move {
            let payload = tokio::fs::read(&file.path).await?;
            sink.deliver(&file.key, payload).await
        }
    })
    .await;

    for (key, result) in keys.into_iter().zip(outcomes) {
        match result.and_then(|result| result) {
            Ok(()) => summary.delivered += 1,
            Err(e) => {
                error!("投递 {} 失败: {}", key, e);
                summary.record_failure(key, &e);
            }
        }
    }

    info!("投递完成: 成功 {}, 失败 {}", summary.delivered, summary.failure_count());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pacs_core::PacsError;
    use std::sync::Mutex;

    /// 拒绝名称中含 `bad` 的文件
    #[derive(Default)]
    struct SelectiveSink {
        accepted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ReportSink for SelectiveSink {
        fn target(&self) -> &str {
            "selective"
        }

        async fn deliver(&self, name: &str, _payload: Vec<u8>) -> Result<()> {
            if name.contains("bad") {
                return Err(PacsError::DeliveryFailure {
                    target: "selective".to_string(),
                    status: Some(400),
                    body: String::new(),
                });
            }
            self.accepted.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_upload_isolates_failures() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("P/S")).unwrap();
        std::fs::write(root.path().join("P/S/1_sr.dcm"), b"a").unwrap();
        std::fs::write(root.path().join("P/S/bad_sr.dcm"), b"b").unwrap();
        std::fs::write(root.path().join("P/S/readme.txt"), b"c").unwrap();

        let sink = Arc::new(SelectiveSink::default());
        let summary = upload_tree(root.path(), sink.clone(), 2).await.unwrap();

        assert_eq!(summary.files_seen, 2);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failures[0].path, "P/S/bad_sr.dcm");
        assert_eq!(*sink.accepted.lock().unwrap(), vec!["P/S/1_sr.dcm".to_string()]);
    }
}
