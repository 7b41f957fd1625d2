//! 结构化报告构建
//!
//! 以分类结果生成新的Basic Text SR对象。报告获得新的SOP实例UID，
//! 患者、检查、序列标识逐字节继承自源影像，归档系统据此将报告与源影像归在一起。

use chrono::Utc;
use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::dictionary_std::{tags, uids};
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use pacs_core::utils::{generate_dicom_uid, UID_ROOT};
use pacs_core::{ClassificationResult, PacsError, Result, SourceIdentity, StructuredReport};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// SR模态代码
pub const SR_MODALITY: &str = "SR";

/// 报告文件名后缀
pub const REPORT_SUFFIX: &str = "_sr";

const CODING_SCHEME: &str = "99PACS";

/// 结构化报告构建器
pub struct ReportBuilder;

impl ReportBuilder {
    /// 由源影像身份与分类结果构建报告
    pub fn build_report(source: &SourceIdentity, classification: &ClassificationResult) -> StructuredReport {
        let mut sop_instance_uid = generate_dicom_uid();
        while sop_instance_uid == source.sop_instance_uid {
            sop_instance_uid = generate_dicom_uid();
        }

        let report = StructuredReport {
            sop_instance_uid,
            sop_class_uid: uids::BASIC_TEXT_SR_STORAGE.to_string(),
            patient_id: source.patient_id.clone(),
            patient_name: source.patient_name.clone(),
            study_instance_uid: source.study_instance_uid.clone(),
            series_instance_uid: source.series_instance_uid.clone(),
            modality: SR_MODALITY.to_string(),
            content: Self::render_content(classification),
            created_at: Utc::now(),
        };

        debug!("构建结构化报告 {} (检查UID: {})", report.sop_instance_uid, report.study_instance_uid);
        report
    }

    /// 分类结果的规范文本表示
    ///
    /// 下游系统会解析该格式，修改格式属于不兼容变更。
    pub fn render_content(classification: &ClassificationResult) -> String {
        let probabilities = classification
            .predicted_probabilities
            .iter()
            .map(|p| format_probability(*p))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Predicted Class: {}\nPredicted Probabilities: {}",
            classification.predicted_class, probabilities
        )
    }

    /// 将报告转换为DICOM文件对象
    pub fn to_dicom(report: &StructuredReport) -> Result<FileDicomObject<InMemDicomObject>> {
        let text = |tag, vr, value: &str| DataElement::new(tag, vr, PrimitiveValue::from(value));
        let date = report.created_at.format("%Y%m%d").to_string();
        let time = report.created_at.format("%H%M%S").to_string();

        let mut obj = InMemDicomObject::new_empty();
        obj.put(text(tags::SPECIFIC_CHARACTER_SET, VR::CS, "ISO_IR 192"));
        obj.put(text(tags::SOP_CLASS_UID, VR::UI, &report.sop_class_uid));
        obj.put(text(tags::SOP_INSTANCE_UID, VR::UI, &report.sop_instance_uid));
        obj.put(text(tags::MODALITY, VR::CS, &report.modality));
        obj.put(text(tags::PATIENT_ID, VR::LO, &report.patient_id));
        obj.put(text(tags::PATIENT_NAME, VR::PN, &report.patient_name));
        obj.put(text(tags::STUDY_INSTANCE_UID, VR::UI, &report.study_instance_uid));
        obj.put(text(tags::SERIES_INSTANCE_UID, VR::UI, &report.series_instance_uid));
        obj.put(text(tags::SERIES_NUMBER, VR::IS, "999"));
        obj.put(text(tags::INSTANCE_NUMBER, VR::IS, "1"));
        obj.put(text(tags::CONTENT_DATE, VR::DA, &date));
        obj.put(text(tags::CONTENT_TIME, VR::TM, &time));

        // SR文档根节点
        obj.put(text(tags::VALUE_TYPE, VR::CS, "CONTAINER"));
        obj.put(text(tags::CONTINUITY_OF_CONTENT, VR::CS, "SEPARATE"));
        obj.put(DataElement::new(
            tags::CONCEPT_NAME_CODE_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![Self::code_item("CLSRES", "Classification Results")]),
        ));
        obj.put(text(tags::COMPLETION_FLAG, VR::CS, "COMPLETE"));
        obj.put(text(tags::VERIFICATION_FLAG, VR::CS, "UNVERIFIED"));

        let finding = InMemDicomObject::from_element_iter([
            text(tags::RELATIONSHIP_TYPE, VR::CS, "CONTAINS"),
            text(tags::VALUE_TYPE, VR::CS, "TEXT"),
            DataElement::new(
                tags::CONCEPT_NAME_CODE_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(vec![Self::code_item("CLSTXT", "Classification Result")]),
            ),
            text(tags::TEXT_VALUE, VR::UT, &report.content),
        ]);
        obj.put(DataElement::new(
            tags::CONTENT_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![finding]),
        ));

        obj.with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(report.sop_class_uid.as_str())
                .media_storage_sop_instance_uid(report.sop_instance_uid.as_str())
                .implementation_class_uid(UID_ROOT),
        )
        .map_err(|e| PacsError::Dicom(format!("无法生成文件元信息: {}", e)))
    }

    fn code_item(value: &str, meaning: &str) -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            DataElement::new(tags::CODE_VALUE, VR::SH, PrimitiveValue::from(value)),
            DataElement::new(tags::CODING_SCHEME_DESIGNATOR, VR::SH, PrimitiveValue::from(CODING_SCHEME)),
            DataElement::new(tags::CODE_MEANING, VR::LO, PrimitiveValue::from(meaning)),
        ])
    }

    /// 序列化为DICOM Part 10字节流
    pub fn to_bytes(report: &StructuredReport) -> Result<Vec<u8>> {
        let file_obj = Self::to_dicom(report)?;
        let mut buffer = Vec::new();
        file_obj
            .write_all(&mut buffer)
            .map_err(|e| PacsError::Dicom(format!("报告序列化失败: {}", e)))?;
        Ok(buffer)
    }

    /// 写入报告文件，已存在时覆盖
    ///
    /// 先写入同目录临时文件再原子重命名，并发写同一路径时文件始终完整。
    pub fn write_report<P: AsRef<Path>>(report: &StructuredReport, path: P) -> Result<Vec<u8>> {
        let path = path.as_ref();
        let bytes = Self::to_bytes(report)?;

        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut staged = NamedTempFile::new_in(directory)?;
        staged.write_all(&bytes)?;
        staged.persist(path).map_err(|e| PacsError::Io(e.error))?;

        info!("结构化报告已写入: {:?}", path);
        Ok(bytes)
    }

    /// 报告文件名：原文件名主干加 `_sr` 后缀
    pub fn report_file_name(source_file_name: &str) -> String {
        let stem = Path::new(source_file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(source_file_name);
        let extension = Path::new(source_file_name)
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("dcm");
        format!("{}{}.{}", stem, REPORT_SUFFIX, extension)
    }

    /// 从报告文件中读取文本内容，去除尾部填充
    pub fn read_content<P: AsRef<Path>>(path: P) -> Result<String> {
        let value = Self::read_text_value(path)?;
        Ok(value.trim_end_matches(['\0', ' ']).to_string())
    }

    /// 读取内容项文本值的原始字符串（含可能的偶数长度填充）
    pub fn read_text_value<P: AsRef<Path>>(path: P) -> Result<String> {
        let obj = crate::parser::DicomParser::open(path)?;
        let sequence = obj
            .element(tags::CONTENT_SEQUENCE)
            .map_err(|e| PacsError::Dicom(format!("缺少内容序列: {}", e)))?;
        let item = sequence
            .items()
            .and_then(|items| items.first())
            .ok_or_else(|| PacsError::Dicom("内容序列为空".to_string()))?;
        let value = item
            .element(tags::TEXT_VALUE)
            .map_err(|e| PacsError::Dicom(format!("缺少文本值: {}", e)))?
            .to_raw_str()
            .map_err(|e| PacsError::Dicom(e.to_string()))?;
        Ok(value.to_string())
    }
}

/// 浮点数文本表示：最短往返数字；指数形式在 |x| < 1e-4 或 |x| >= 1e16 时使用，
/// 指数带符号且至少两位（`5e-05`、`1e+16`），整数值保留 `.0`
fn format_probability(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let magnitude = value.abs();
    if value == 0.0 || (1e-4..1e16).contains(&magnitude) {
        return format!("{:?}", value);
    }

    let scientific = format!("{:e}", value);
    match scientific.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exponent) => {
                let sign = if exponent < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exponent.abs())
            }
            Err(_) => scientific.clone(),
        },
        None => scientific.clone(),
    }
}
