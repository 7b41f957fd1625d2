//! 核心数据模型定义

use crate::error::{PacsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 归一化输出范围 R，解码结果落在 [-R, R]
pub const NORMALIZATION_RANGE: f32 = 1024.0;

/// 未命中结果索引时使用的类别标签
pub const UNKNOWN_CLASS_LABEL: &str = "Unknown";

/// 源影像的身份信息（患者/检查/序列/实例）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub patient_id: String,
    pub patient_name: String,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
}

/// 光度解释，仅支持两种单色变体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhotometricInterpretation {
    /// 低值显示为亮（骨骼为黑）
    Monochrome1,
    /// 低值显示为暗
    Monochrome2,
}

impl PhotometricInterpretation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monochrome1 => "MONOCHROME1",
            Self::Monochrome2 => "MONOCHROME2",
        }
    }

    /// 需要反转亮度以得到 MONOCHROME2 约定
    pub fn is_inverted(&self) -> bool {
        matches!(self, Self::Monochrome1)
    }
}

impl TryFrom<&str> for PhotometricInterpretation {
    type Error = PacsError;

    fn try_from(value: &str) -> Result<Self> {
        // DICOM CS值可能带有填充空格
        match value.trim_end_matches(['\0', ' ']) {
            "MONOCHROME1" => Ok(Self::Monochrome1),
            "MONOCHROME2" => Ok(Self::Monochrome2),
            other => Err(PacsError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for PhotometricInterpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 从文件读取的源影像
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub identity: SourceIdentity,
    pub photometric: PhotometricInterpretation,
    pub rows: usize,
    pub columns: usize,
    /// 行优先的像素值
    pub pixels: Vec<f32>,
}

/// 归一化后的二维影像，值域 [-R, R]
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    /// 来源文件，用于错误定位
    pub source: String,
    pub rows: usize,
    pub columns: usize,
    /// 行优先数据，长度 rows * columns
    pub data: Vec<f32>,
}

impl NormalizedImage {
    pub fn new(source: impl Into<String>, rows: usize, columns: usize, data: Vec<f32>) -> Self {
        Self {
            source: source.into(),
            rows,
            columns,
            data,
        }
    }

    /// 数据长度是否与行列数一致
    pub fn is_well_formed(&self) -> bool {
        self.rows > 0 && self.columns > 0 && self.data.len() == self.rows * self.columns
    }

    pub fn get(&self, row: usize, column: usize) -> Option<f32> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        self.data.get(row * self.columns + column).copied()
    }

    /// 最大绝对值
    pub fn max_abs(&self) -> f32 {
        self.data.iter().fold(0.0f32, |acc, v| acc.max(v.abs()))
    }
}

/// 预测类别：模型给出的索引，或索引缺失时的占位标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictedClass {
    Index(usize),
    Label(String),
}

impl fmt::Display for PredictedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{}", index),
            Self::Label(label) => f.write_str(label),
        }
    }
}

/// 分类结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub predicted_class: PredictedClass,
    pub predicted_probabilities: Vec<f64>,
}

impl ClassificationResult {
    pub fn new(predicted_class: usize, predicted_probabilities: Vec<f64>) -> Self {
        Self {
            predicted_class: PredictedClass::Index(predicted_class),
            predicted_probabilities,
        }
    }

    /// 结果索引缺失时的占位结果
    pub fn unknown() -> Self {
        Self {
            predicted_class: PredictedClass::Label(UNKNOWN_CLASS_LABEL.to_string()),
            predicted_probabilities: Vec::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(&self.predicted_class, PredictedClass::Label(label) if label == UNKNOWN_CLASS_LABEL)
    }
}

/// 结构化报告（DICOM SR）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredReport {
    /// 新生成的SOP实例UID
    pub sop_instance_uid: String,
    pub sop_class_uid: String,
    // 以下字段逐字节继承自源影像
    pub patient_id: String,
    pub patient_name: String,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub modality: String,
    /// 分类结果的文本表示
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StructuredReport {
    /// 报告继承的身份信息是否与源影像一致
    pub fn is_linked_to(&self, source: &SourceIdentity) -> bool {
        self.patient_id == source.patient_id
            && self.patient_name == source.patient_name
            && self.study_instance_uid == source.study_instance_uid
            && self.series_instance_uid == source.series_instance_uid
            && self.sop_instance_uid != source.sop_instance_uid
    }
}

/// 批处理中单个文件的失败记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    pub path: String,
    pub error: String,
}

/// 批处理运行统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub files_seen: usize,
    pub classified: usize,
    pub reports_written: usize,
    pub delivered: usize,
    /// 结果索引未命中、以 Unknown 替代的次数
    pub missing_index_entries: usize,
    pub failures: Vec<ItemFailure>,
}

impl BatchSummary {
    pub fn record_failure(&mut self, path: impl Into<String>, error: &PacsError) {
        self.failures.push(ItemFailure {
            path: path.into(),
            error: error.to_string(),
        });
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// 串接同一批文件上的下一阶段统计
    ///
    /// 各阶段扫描的是同一组源文件，`files_seen` 取两者较大值而非相加；
    /// 其余计数与失败列表累加。
    pub fn followed_by(mut self, next: BatchSummary) -> BatchSummary {
        self.files_seen = self.files_seen.max(next.files_seen);
        self.classified += next.classified;
        self.reports_written += next.reports_written;
        self.delivered += next.delivered;
        self.missing_index_entries += next.missing_index_entries;
        self.failures.extend(next.failures);
        self
    }
}
