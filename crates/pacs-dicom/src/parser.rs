//! DICOM数据解析器
//!
//! 以宽松模式打开DICOM文件并提取身份元数据

use dicom::dictionary_std::{tags, uids};
use dicom::encoding::transfer_syntax::TransferSyntaxIndex;
use dicom::object::file::ReadPreamble;
use dicom::object::{DefaultDicomObject, FileMetaTableBuilder, InMemDicomObject, OpenFileOptions};
use dicom::transfer_syntax::TransferSyntaxRegistry;
use pacs_core::utils::generate_dicom_uid;
use pacs_core::{PacsError, Result, SourceIdentity};
use std::path::Path;
use tracing::{debug, error, warn};

/// 前导区长度
const PREAMBLE_LEN: usize = 128;
const DICM_MAGIC: &[u8] = b"DICM";

/// 无文件元信息时依次尝试的传输语法
const BARE_DATASET_SYNTAXES: [&str; 2] = [
    uids::IMPLICIT_VR_LITTLE_ENDIAN,
    uids::EXPLICIT_VR_LITTLE_ENDIAN,
];

/// DICOM数据解析器
pub struct DicomParser;

impl DicomParser {
    /// 以宽松模式打开DICOM文件
    ///
    /// 自动检测128字节前导区；文件元信息缺失或损坏时，
    /// 按裸数据集重新读取，只要数据集可解析即继续。
    pub fn open<P: AsRef<Path>>(file_path: P) -> Result<DefaultDicomObject> {
        let file_path = file_path.as_ref();
        debug!("打开DICOM文件: {:?}", file_path);

        let strict_error = match OpenFileOptions::new()
            .read_preamble(ReadPreamble::Auto)
            .open_file(file_path)
        {
            Ok(obj) => return Ok(obj),
            Err(e) => e,
        };

        warn!("文件元信息无法解析，按裸数据集读取: {:?} ({})", file_path, strict_error);
        Self::open_bare_dataset(file_path).map_err(|reason| {
            error!("DICOM文件解析失败: {:?}, 错误: {}", file_path, strict_error);
            PacsError::DecodeFailure {
                path: file_path.display().to_string(),
                reason: format!("无法解析DICOM文件: {}; {}", strict_error, reason),
            }
        })
    }

    /// 跳过可选的前导区与 `DICM` 标记，按常见传输语法读取数据集，
    /// 并补全文件元信息以便后续像素解码
    fn open_bare_dataset(file_path: &Path) -> std::result::Result<DefaultDicomObject, String> {
        let bytes = std::fs::read(file_path).map_err(|e| e.to_string())?;
        let offset = if bytes.get(PREAMBLE_LEN..PREAMBLE_LEN + DICM_MAGIC.len()) == Some(DICM_MAGIC) {
            PREAMBLE_LEN + DICM_MAGIC.len()
        } else if bytes.starts_with(DICM_MAGIC) {
            DICM_MAGIC.len()
        } else {
            0
        };
        let body = &bytes[offset..];

        let mut last_error = String::from("数据集为空");
        for ts_uid in BARE_DATASET_SYNTAXES {
            if !first_header_fits(body, ts_uid == uids::EXPLICIT_VR_LITTLE_ENDIAN) {
                last_error = format!("首个数据元素头与 {} 不符", ts_uid);
                continue;
            }
            let ts = TransferSyntaxRegistry
                .get(ts_uid)
                .ok_or_else(|| format!("未注册的传输语法: {}", ts_uid))?;

            let dataset = match InMemDicomObject::read_dataset_with_ts(body, ts) {
                Ok(dataset) => dataset,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };
            if dataset.iter().next().is_none() {
                continue;
            }

            let uid = |tag| {
                dataset
                    .element(tag)
                    .ok()
                    .and_then(|e| e.to_str().ok())
                    .map(|v| v.trim_end_matches(['\0', ' ']).to_string())
                    .filter(|v| !v.is_empty())
            };
            let sop_class = uid(tags::SOP_CLASS_UID)
                .unwrap_or_else(|| uids::SECONDARY_CAPTURE_IMAGE_STORAGE.to_string());
            let sop_instance = uid(tags::SOP_INSTANCE_UID).unwrap_or_else(generate_dicom_uid);

            debug!("以 {} 读取裸数据集: {:?}", ts_uid, file_path);
            return dataset
                .with_meta(
                    FileMetaTableBuilder::new()
                        .transfer_syntax(ts_uid)
                        .media_storage_sop_class_uid(sop_class)
                        .media_storage_sop_instance_uid(sop_instance),
                )
                .map_err(|e| e.to_string());
        }
        Err(last_error)
    }

    /// 读取文件并提取身份信息
    pub fn parse_identity<P: AsRef<Path>>(file_path: P) -> Result<SourceIdentity> {
        let file_path = file_path.as_ref();
        let obj = Self::open(file_path)?;
        Self::extract_identity(&obj, &file_path.display().to_string())
    }

    /// 提取报告归档所需的身份信息
    ///
    /// 患者ID与三个UID必须存在；患者姓名缺失时按空值处理。
    pub fn extract_identity(obj: &DefaultDicomObject, source: &str) -> Result<SourceIdentity> {
        let required = |tag, name: &str| {
            Self::get_string_element(obj, tag).ok_or_else(|| PacsError::DecodeFailure {
                path: source.to_string(),
                reason: format!("缺少必要标签 {}", name),
            })
        };

        let identity = SourceIdentity {
            patient_id: required(tags::PATIENT_ID, "PatientID")?,
            patient_name: Self::get_string_element(obj, tags::PATIENT_NAME).unwrap_or_default(),
            study_instance_uid: required(tags::STUDY_INSTANCE_UID, "StudyInstanceUID")?,
            series_instance_uid: required(tags::SERIES_INSTANCE_UID, "SeriesInstanceUID")?,
            sop_instance_uid: required(tags::SOP_INSTANCE_UID, "SOPInstanceUID")?,
        };

        debug!("提取身份信息，患者ID: {}, 检查UID: {}",
               identity.patient_id, identity.study_instance_uid);
        Ok(identity)
    }

    /// 提取身份信息，缺失字段以空值代替（仅用于解码日志）
    pub fn extract_identity_lossy(obj: &DefaultDicomObject) -> SourceIdentity {
        let get = |tag| Self::get_string_element(obj, tag).unwrap_or_default();
        SourceIdentity {
            patient_id: get(tags::PATIENT_ID),
            patient_name: get(tags::PATIENT_NAME),
            study_instance_uid: get(tags::STUDY_INSTANCE_UID),
            series_instance_uid: get(tags::SERIES_INSTANCE_UID),
            sop_instance_uid: get(tags::SOP_INSTANCE_UID),
        }
    }

    /// 获取字符串类型元素的值，去除DICOM填充字符
    pub fn get_string_element(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<String> {
        match obj.element(tag) {
            Ok(element) => match element.to_str() {
                Ok(value) => Some(value.trim_end_matches(['\0', ' ']).to_string()),
                Err(_) => {
                    debug!("标签 {:?} 不是字符串类型", tag);
                    None
                }
            },
            Err(_) => {
                debug!("未找到标签: {:?}", tag);
                None
            }
        }
    }

    /// 获取整数类型元素的值
    pub fn get_integer_element(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<i64> {
        obj.element(tag).ok().and_then(|element| element.to_int::<i64>().ok())
    }

    /// 获取浮点类型元素的第一个值（多值元素如窗位取首个）
    pub fn get_float_element(obj: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<f64> {
        obj.element(tag)
            .ok()
            .and_then(|element| element.to_multi_float64().ok())
            .and_then(|values| values.first().copied())
    }
}

/// 首个元素头是否可信：组号为偶数，显式VR为两个大写字母，隐式VR长度不超出文件
fn first_header_fits(body: &[u8], explicit: bool) -> bool {
    let header = match body.get(..8) {
        Some(header) => header,
        None => return false,
    };
    let group = u16::from_le_bytes([header[0], header[1]]);
    if group % 2 != 0 {
        return false;
    }
    if explicit {
        header[4].is_ascii_uppercase() && header[5].is_ascii_uppercase()
    } else {
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        len == u32::MAX || len as usize <= body.len() - 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::SyntheticImage;

    #[test]
    fn test_parse_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.dcm");
        let image = SyntheticImage::monochrome2(2, 2, vec![0, 1, 2, 3]);
        image.write_to(&path).unwrap();

        let identity = DicomParser::parse_identity(&path).unwrap();
        assert_eq!(identity, image.identity);
    }

    #[test]
    fn test_missing_required_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.dcm");
        let mut image = SyntheticImage::monochrome2(2, 2, vec![0, 1, 2, 3]);
        image.identity.study_instance_uid = String::new();
        image.omit_study_uid = true;
        image.write_to(&path).unwrap();

        match DicomParser::parse_identity(&path) {
            Err(PacsError::DecodeFailure { reason, .. }) => assert!(reason.contains("StudyInstanceUID")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_bare_dataset_without_meta_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.dcm");
        let image = SyntheticImage::monochrome2(1, 3, vec![0, 10, 20]);
        image.write_bare_dataset_to(&path).unwrap();

        assert!(OpenFileOptions::new()
            .read_preamble(ReadPreamble::Auto)
            .open_file(&path)
            .is_err());

        let identity = DicomParser::parse_identity(&path).unwrap();
        assert_eq!(identity, image.identity);
    }

    #[test]
    fn test_open_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.dcm");
        std::fs::write(&path, b"not a dicom file").unwrap();

        assert!(matches!(
            DicomParser::open(&path),
            Err(PacsError::DecodeFailure { .. })
        ));
    }
}
