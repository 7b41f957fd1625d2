//! 报告批处理编排
//!
//! 遍历输入目录，为每个DICOM文件查找分类结果、生成结构化报告、
//! 按 患者/检查/序列 目录结构写入输出目录，并投递到归档。
//! 单个文件的失败只记录到 [`BatchSummary`]，不会中断整批处理。

use crate::pool::run_bounded;
use crate::result_index::{Lookup, ResultIndex};
use crate::scan::{scan_dicom_files, ScannedFile};
use pacs_core::{BatchSummary, ClassificationResult, PacsError, Result, SourceIdentity};
use pacs_dicom::{DicomParser, ReportBuilder};
use pacs_integration::ReportSink;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 默认并发数
pub const DEFAULT_WORKERS: usize = 4;

/// 报告编排器
pub struct ReportOrchestrator {
    sink: Arc<dyn ReportSink>,
    workers: usize,
    strict_index: bool,
}

/// 单个文件的处理上下文，所有任务共享
struct ItemContext {
    output_root: PathBuf,
    index: Arc<ResultIndex>,
    sink: Arc<dyn ReportSink>,
    strict_index: bool,
}

#[derive(Debug, Default)]
struct ItemOutcome {
    key: String,
    missing_index: bool,
    written: bool,
    delivered: bool,
    error: Option<PacsError>,
}

impl ReportOrchestrator {
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        Self {
            sink,
            workers: DEFAULT_WORKERS,
            strict_index: false,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// 严格模式下，结果索引未命中视为单项失败而不是生成 Unknown 报告
    pub fn with_strict_index(mut self, strict: bool) -> Self {
        self.strict_index = strict;
        self
    }

    /// 执行一次报告批处理
    pub async fn run(
        &self,
        input_root: &Path,
        output_root: &Path,
        index: Arc<ResultIndex>,
    ) -> Result<BatchSummary> {
        let files = scan_dicom_files(input_root)?;
        info!(
            "开始生成报告: {} 个文件, 并发数 {}, 投递目标 {}",
            files.len(),
            self.workers,
            self.sink.target()
        );

        let context = Arc::new(ItemContext {
            output_root: output_root.to_path_buf(),
            index,
            sink: self.sink.clone(),
            strict_index: self.strict_index,
        });

        let mut summary = BatchSummary {
            files_seen: files.len(),
            ..Default::default()
        };

        let keys: Vec<String> = files.iter().map(|file| file.key.clone()).collect();
        let outcomes = run_bounded(files, self.workers, |file| process_file(context.clone(), file)).await;

        for (key, outcome) in keys.into_iter().zip(outcomes) {
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("处理 {} 失败: {}", key, e);
                    summary.record_failure(&key, &e);
                    continue;
                }
            };
            if outcome.missing_index {
                summary.missing_index_entries += 1;
            }
            if outcome.written {
                summary.reports_written += 1;
            }
            if outcome.delivered {
                summary.delivered += 1;
            }
            if let Some(e) = &outcome.error {
                summary.record_failure(&outcome.key, e);
            }
        }

        info!(
            "报告批处理完成: 文件 {}, 写入 {}, 投递 {}, 索引缺失 {}, 失败 {}",
            summary.files_seen,
            summary.reports_written,
            summary.delivered,
            summary.missing_index_entries,
            summary.failure_count()
        );
        Ok(summary)
    }
}

async fn process_file(context: Arc<ItemContext>, file: ScannedFile) -> ItemOutcome {
    let mut outcome = ItemOutcome {
        key: file.key.clone(),
        ..Default::default()
    };

    let classification = match context.index.lookup(&file.key) {
        Lookup::Found(result) => result,
        Lookup::Missing(_) if context.strict_index => {
            error!("结果索引缺少条目: {}", file.key);
            outcome.error = Some(PacsError::MissingResultIndexEntry(file.key.clone()));
            return outcome;
        }
        Lookup::Missing(placeholder) => {
            warn!("结果索引缺少条目，使用 Unknown: {}", file.key);
            outcome.missing_index = true;
            placeholder
        }
    };

    let output_root = context.output_root.clone();
    let source_path = file.path.clone();
    let file_name = file.file_name();
    let written = tokio::task::spawn_blocking(move || {
        write_report_for(&source_path, &file_name, &output_root, &classification)
    })
    .await
    .unwrap_or_else(|e| Err(PacsError::Internal(format!("报告写入任务失败: {}", e))));

    let (report_path, payload) = match written {
        Ok(written) => written,
        Err(e) => {
            error!("处理 {} 失败: {}", file.key, e);
            outcome.error = Some(e);
            return outcome;
        }
    };
    outcome.written = true;

    let name = report_path.to_string_lossy().to_string();
    match context.sink.deliver(&name, payload).await {
        Ok(()) => outcome.delivered = true,
        Err(e) => outcome.error = Some(e),
    }
    outcome
}

/// 解析源文件身份、生成报告并写入镜像目录，返回报告路径和序列化内容
fn write_report_for(
    source_path: &Path,
    file_name: &str,
    output_root: &Path,
    classification: &ClassificationResult,
) -> Result<(PathBuf, Vec<u8>)> {
    let identity = DicomParser::parse_identity(source_path)?;
    let report = ReportBuilder::build_report(&identity, classification);

    let directory = report_directory(output_root, &identity);
    std::fs::create_dir_all(&directory)?;

    let report_path = directory.join(ReportBuilder::report_file_name(file_name));
    debug!("报告输出路径: {:?}", report_path);
    let payload = ReportBuilder::write_report(&report, &report_path)?;
    Ok((report_path, payload))
}

/// 输出目录：`output_root/{patient_id}/{study_uid}/{series_uid}`
pub fn report_directory(output_root: &Path, identity: &SourceIdentity) -> PathBuf {
    output_root
        .join(path_component(&identity.patient_id))
        .join(path_component(&identity.study_instance_uid))
        .join(path_component(&identity.series_instance_uid))
}

/// 把标签值转为安全的单级目录名
fn path_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{}", cleaned),
        _ => cleaned,
    }
}
