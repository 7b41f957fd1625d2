//! 影像分类与结构化报告批处理主程序

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pacs_admin::{init_logging, ConfigOverrides, ConfigValidator, PipelineConfig};
use pacs_ai::{Classifier, ImageModel};
use pacs_core::BatchSummary;
use pacs_integration::{ArchiveClient, ArchiveSettings, ReportSink};
use pacs_workflow::{upload_tree, ClassificationPass, ReportOrchestrator, ResultIndex};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "pacs-pipeline")]
#[command(about = "X光影像分类、DICOM结构化报告生成与PACS归档投递")]
struct Args {
    /// 配置文件路径（TOML/YAML/JSON）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 源影像目录
    #[arg(long, global = true)]
    input_dir: Option<PathBuf>,

    /// 报告输出目录
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// 分类结果索引文件
    #[arg(long, global = true)]
    result_index: Option<PathBuf>,

    /// 归档投递地址
    #[arg(long, global = true)]
    archive_url: Option<String>,

    /// ONNX分类模型
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// 并发任务数
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// 结果索引缺少条目时视为失败
    #[arg(long, global = true)]
    strict_index: bool,

    /// 日志级别
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// 分类源影像并保存结果索引
    Classify,
    /// 根据结果索引生成报告并投递
    Report,
    /// 投递输出目录中已有的报告
    Upload,
    /// 依次执行分类与报告
    Run,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            result_index_path: self.result_index.clone(),
            archive_url: self.archive_url.clone(),
            model_path: self.model.clone(),
            workers: self.workers,
            strict_index: self.strict_index.then_some(true),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = PipelineConfig::load(args.config.as_deref())?;
    config.apply_overrides(args.overrides());
    init_logging(&config.logging)?;
    ConfigValidator::new().validate(&config)?;

    info!("启动批处理: {:?}", args.command);
    info!("  源影像目录: {}", config.input_dir.display());
    info!("  报告输出目录: {}", config.output_dir.display());
    info!("  结果索引: {}", config.result_index_path.display());

    let summary = match args.command {
        Command::Classify => classify(&config).await?,
        Command::Report => report(&config).await?,
        Command::Upload => upload(&config).await?,
        Command::Run => {
            let classified = classify(&config).await?;
            classified.followed_by(report(&config).await?)
        }
    };

    for failure in &summary.failures {
        warn!("  失败 {}: {}", failure.path, failure.error);
    }
    info!(
        "批处理结束: 文件 {}, 分类 {}, 报告 {}, 投递 {}, 索引缺失 {}, 失败 {}",
        summary.files_seen,
        summary.classified,
        summary.reports_written,
        summary.delivered,
        summary.missing_index_entries,
        summary.failure_count()
    );
    Ok(())
}

async fn classify(config: &PipelineConfig) -> Result<BatchSummary> {
    let model = load_model(config)?;
    let classifier = Classifier::new(model).with_expected_classes(config.classifier.num_classes);

    let (index, summary) = ClassificationPass::new(classifier)
        .with_workers(config.workers)
        .classify_tree(&config.input_dir)
        .await
        .with_context(|| format!("无法扫描源影像目录 {}", config.input_dir.display()))?;

    index
        .save(&config.result_index_path)
        .context("结果索引保存失败")?;
    Ok(summary)
}

async fn report(config: &PipelineConfig) -> Result<BatchSummary> {
    let index = ResultIndex::load(&config.result_index_path)
        .with_context(|| format!("无法加载结果索引 {}", config.result_index_path.display()))?;

    let summary = ReportOrchestrator::new(archive_sink(config)?)
        .with_workers(config.workers)
        .with_strict_index(config.strict_index)
        .run(&config.input_dir, &config.output_dir, Arc::new(index))
        .await
        .with_context(|| format!("无法扫描源影像目录 {}", config.input_dir.display()))?;
    Ok(summary)
}

async fn upload(config: &PipelineConfig) -> Result<BatchSummary> {
    let summary = upload_tree(&config.output_dir, archive_sink(config)?, config.workers)
        .await
        .with_context(|| format!("无法扫描报告目录 {}", config.output_dir.display()))?;
    Ok(summary)
}

fn archive_sink(config: &PipelineConfig) -> Result<Arc<dyn ReportSink>> {
    let settings = ArchiveSettings {
        url: config.archive.url.clone(),
        username: config.archive.username.clone(),
        password: config.archive.password.clone(),
        timeout: config.archive.timeout(),
    };
    Ok(Arc::new(ArchiveClient::new(settings)?))
}

#[cfg(feature = "onnx")]
fn load_model(config: &PipelineConfig) -> Result<Arc<dyn ImageModel>> {
    let path = config
        .classifier
        .model_path
        .as_deref()
        .context("未配置分类模型 (--model 或 classifier.model_path)")?;
    let model = pacs_ai::OnnxModel::load(path, config.classifier.intra_threads)
        .with_context(|| format!("模型加载失败 {}", path.display()))?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "onnx"))]
fn load_model(_config: &PipelineConfig) -> Result<Arc<dyn ImageModel>> {
    anyhow::bail!("当前构建未启用 onnx 特性，无法加载分类模型")
}
