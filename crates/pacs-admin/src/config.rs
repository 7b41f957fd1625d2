//! 配置管理
//!
//! 分层加载流水线配置：内置默认值 → 配置文件 → `PACS_` 前缀环境变量 → 命令行覆盖，
//! 加载完成后由 [`ConfigValidator`] 校验。

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "PACS";

/// 流水线完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 源影像目录
    pub input_dir: PathBuf,
    /// 报告输出目录
    pub output_dir: PathBuf,
    /// 分类结果索引文件
    pub result_index_path: PathBuf,
    /// 结果索引未命中时是否视为失败
    pub strict_index: bool,
    /// 并发任务数
    pub workers: usize,
    pub archive: ArchiveConfig,
    pub classifier: ClassifierConfig,
    pub logging: LoggingConfig,
}

/// 归档配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
}

/// 分类模型配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// ONNX模型文件路径
    pub model_path: Option<PathBuf>,
    /// 期望的类别数，未设置时不检查
    pub num_classes: Option<usize>,
    /// 推理线程数
    pub intra_threads: usize,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 过滤指令，如 `info` 或 `pacs_workflow=debug,info`
    pub level: String,
    /// 输出JSON格式
    pub json: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data/dicoms"),
            output_dir: PathBuf::from("data/dicoms_sr"),
            result_index_path: PathBuf::from("data/classification_results.json"),
            strict_index: false,
            workers: 4,
            archive: ArchiveConfig::default(),
            classifier: ClassifierConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8042/instances".to_string(),
            username: "orthanc".to_string(),
            password: "orthanc".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            num_classes: None,
            intra_threads: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ArchiveConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 命令行覆盖项，`None` 表示不覆盖
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub result_index_path: Option<PathBuf>,
    pub archive_url: Option<String>,
    pub model_path: Option<PathBuf>,
    pub workers: Option<usize>,
    pub strict_index: Option<bool>,
    pub log_level: Option<String>,
}

impl PipelineConfig {
    /// 加载配置：默认值、可选配置文件、`PACS_` 环境变量
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);
        Self::load_from(config_path, environment)
    }

    fn load_from(config_path: Option<&Path>, environment: Environment) -> Result<Self> {
        let defaults = Config::try_from(&PipelineConfig::default())
            .context("Failed to build default configuration")?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

        let config: PipelineConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded from: {}", path.display()),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 应用命令行覆盖
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(input_dir) = overrides.input_dir {
            self.input_dir = input_dir;
        }
        if let Some(output_dir) = overrides.output_dir {
            self.output_dir = output_dir;
        }
        if let Some(path) = overrides.result_index_path {
            self.result_index_path = path;
        }
        if let Some(url) = overrides.archive_url {
            self.archive.url = url;
        }
        if let Some(model_path) = overrides.model_path {
            self.classifier.model_path = Some(model_path);
        }
        if let Some(workers) = overrides.workers {
            self.workers = workers;
        }
        if let Some(strict) = overrides.strict_index {
            self.strict_index = strict;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        debug!("Applied command line overrides");
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    field_path: &'static str,
    validator: fn(&PipelineConfig) -> Result<()>,
    error_message: &'static str,
}

fn non_empty(path: &Path, field: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        Err(anyhow::anyhow!("{} cannot be empty", field))
    } else {
        Ok(())
    }
}

impl ConfigValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "input_dir",
                validator: |config| non_empty(&config.input_dir, "input_dir"),
                error_message: "Invalid input directory",
            },
            ValidationRule {
                field_path: "output_dir",
                validator: |config| non_empty(&config.output_dir, "output_dir"),
                error_message: "Invalid output directory",
            },
            ValidationRule {
                field_path: "result_index_path",
                validator: |config| non_empty(&config.result_index_path, "result_index_path"),
                error_message: "Invalid result index path",
            },
            ValidationRule {
                field_path: "workers",
                validator: |config| {
                    if config.workers == 0 {
                        Err(anyhow::anyhow!("workers must be at least 1"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid worker count",
            },
            ValidationRule {
                field_path: "archive.url",
                validator: |config| {
                    let url = config.archive.url.as_str();
                    if url.starts_with("http://") || url.starts_with("https://") {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("unsupported URL scheme: {}", url))
                    }
                },
                error_message: "Invalid archive URL",
            },
            ValidationRule {
                field_path: "archive.timeout_secs",
                validator: |config| {
                    if config.archive.timeout_secs == 0 {
                        Err(anyhow::anyhow!("timeout must be greater than 0"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid archive timeout",
            },
            ValidationRule {
                field_path: "classifier.num_classes",
                validator: |config| match config.classifier.num_classes {
                    Some(0) => Err(anyhow::anyhow!("num_classes must be at least 1")),
                    _ => Ok(()),
                },
                error_message: "Invalid class count",
            },
        ];

        Self { validation_rules }
    }

    pub fn validate(&self, config: &PipelineConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("{}: {}", rule.error_message, e));
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::load_from(None, env(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.archive.timeout(), Duration::from_secs(30));
        assert!(ConfigValidator::new().validate(&config).is_ok());
    }

    #[test]
    fn test_file_then_environment_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(
            &path,
            r#"
input_dir = "/srv/xray"
workers = 2

[archive]
url = "http://pacs.local:8042/instances"
"#,
        )
        .unwrap();

        let config = PipelineConfig::load_from(
            Some(&path),
            env(&[("PACS_WORKERS", "8"), ("PACS_ARCHIVE__USERNAME", "radiology")]),
        )
        .unwrap();

        assert_eq!(config.input_dir, PathBuf::from("/srv/xray"));
        assert_eq!(config.workers, 8);
        assert_eq!(config.archive.url, "http://pacs.local:8042/instances");
        assert_eq!(config.archive.username, "radiology");
        assert_eq!(config.archive.password, "orthanc");
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(PipelineConfig::load_from(Some(&missing), env(&[])).is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = PipelineConfig::default();
        config.apply_overrides(ConfigOverrides {
            archive_url: Some("https://archive.example/instances".to_string()),
            workers: Some(1),
            strict_index: Some(true),
            ..Default::default()
        });

        assert_eq!(config.archive.url, "https://archive.example/instances");
        assert_eq!(config.workers, 1);
        assert!(config.strict_index);
        assert_eq!(config.output_dir, PathBuf::from("data/dicoms_sr"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let validator = ConfigValidator::new();

        let mut config = PipelineConfig::default();
        config.workers = 0;
        assert!(validator.validate(&config).is_err());

        let mut config = PipelineConfig::default();
        config.archive.url = "ftp://archive/instances".to_string();
        assert!(validator.validate(&config).is_err());

        let mut config = PipelineConfig::default();
        config.archive.timeout_secs = 0;
        assert!(validator.validate(&config).is_err());
    }
}
