//! 测试用合成DICOM影像

use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::dictionary_std::{tags, uids};
use dicom::encoding::transfer_syntax::TransferSyntaxIndex;
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::TransferSyntaxRegistry;
use pacs_core::{PacsError, Result, SourceIdentity};
use std::io::Write;
use std::path::Path;

/// 数字X射线影像存储（用于展示）
pub const DIGITAL_XRAY_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.1.1";

/// 可写入磁盘的合成单帧灰度影像
#[derive(Debug, Clone)]
pub struct SyntheticImage {
    pub identity: SourceIdentity,
    pub photometric: String,
    pub rows: u16,
    pub columns: u16,
    pub pixels: Vec<u16>,
    /// 窗位、窗宽
    pub window: Option<(f64, f64)>,
    /// VOI LUT函数 (0028,1056)
    pub voi_function: Option<String>,
    /// VOI LUT序列的单个查找表：第一个映射值与表项
    pub voi_lut: Option<(u16, Vec<u16>)>,
    pub omit_pixel_data: bool,
    pub omit_study_uid: bool,
}

impl SyntheticImage {
    pub fn monochrome2(rows: u16, columns: u16, pixels: Vec<u16>) -> Self {
        Self {
            identity: SourceIdentity {
                patient_id: "PAT001".to_string(),
                patient_name: "Silva^Maria".to_string(),
                study_instance_uid: "1.2.826.0.1.3680043.9.7382.1".to_string(),
                series_instance_uid: "1.2.826.0.1.3680043.9.7382.1.1".to_string(),
                sop_instance_uid: "1.2.826.0.1.3680043.9.7382.1.1.1".to_string(),
            },
            photometric: "MONOCHROME2".to_string(),
            rows,
            columns,
            pixels,
            window: None,
            voi_function: None,
            voi_lut: None,
            omit_pixel_data: false,
            omit_study_uid: false,
        }
    }

    pub fn with_identity(mut self, identity: SourceIdentity) -> Self {
        self.identity = identity;
        self
    }

    fn to_object(&self) -> InMemDicomObject {
        let mut obj = InMemDicomObject::new_empty();
        let text = |tag, vr, value: &str| DataElement::new(tag, vr, PrimitiveValue::from(value));

        obj.put(text(tags::SOP_CLASS_UID, VR::UI, DIGITAL_XRAY_STORAGE));
        obj.put(text(tags::SOP_INSTANCE_UID, VR::UI, &self.identity.sop_instance_uid));
        obj.put(text(tags::MODALITY, VR::CS, "DX"));
        obj.put(text(tags::PATIENT_ID, VR::LO, &self.identity.patient_id));
        obj.put(text(tags::PATIENT_NAME, VR::PN, &self.identity.patient_name));
        if !self.omit_study_uid {
            obj.put(text(tags::STUDY_INSTANCE_UID, VR::UI, &self.identity.study_instance_uid));
        }
        obj.put(text(tags::SERIES_INSTANCE_UID, VR::UI, &self.identity.series_instance_uid));
        obj.put(text(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, &self.photometric));

        let short = |tag, value: u16| DataElement::new(tag, VR::US, PrimitiveValue::from(value));
        obj.put(short(tags::SAMPLES_PER_PIXEL, 1));
        obj.put(short(tags::ROWS, self.rows));
        obj.put(short(tags::COLUMNS, self.columns));
        obj.put(short(tags::BITS_ALLOCATED, 16));
        obj.put(short(tags::BITS_STORED, 16));
        obj.put(short(tags::HIGH_BIT, 15));
        obj.put(short(tags::PIXEL_REPRESENTATION, 0));

        if let Some((center, width)) = self.window {
            obj.put(text(tags::WINDOW_CENTER, VR::DS, &center.to_string()));
            obj.put(text(tags::WINDOW_WIDTH, VR::DS, &width.to_string()));
        }
        if let Some(function) = &self.voi_function {
            obj.put(text(tags::VOILUT_FUNCTION, VR::CS, function));
        }
        if let Some((first_mapped, entries)) = &self.voi_lut {
            let mut item = InMemDicomObject::new_empty();
            let len = u16::try_from(entries.len()).unwrap_or(0);
            item.put(DataElement::new(
                tags::LUT_DESCRIPTOR,
                VR::US,
                PrimitiveValue::U16([len, *first_mapped, 16].into_iter().collect()),
            ));
            item.put(DataElement::new(
                tags::LUT_DATA,
                VR::OW,
                PrimitiveValue::U16(entries.iter().copied().collect()),
            ));
            obj.put(DataElement::new(
                tags::VOILUT_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(vec![item]),
            ));
        }

        if !self.omit_pixel_data {
            obj.put(DataElement::new(
                tags::PIXEL_DATA,
                VR::OW,
                PrimitiveValue::U16(self.pixels.iter().copied().collect()),
            ));
        }
        obj
    }

    /// 写入DICOM Part 10文件
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file_obj = self
            .to_object()
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(DIGITAL_XRAY_STORAGE)
                    .media_storage_sop_instance_uid(self.identity.sop_instance_uid.as_str()),
            )
            .map_err(|e| PacsError::Dicom(e.to_string()))?;

        file_obj
            .write_to_file(path)
            .map_err(|e| PacsError::Dicom(e.to_string()))
    }

    /// 只写数据集（隐式VR小端），不含前导区与文件元信息
    pub fn write_bare_dataset_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let ts = TransferSyntaxRegistry
            .get(uids::IMPLICIT_VR_LITTLE_ENDIAN)
            .ok_or_else(|| PacsError::Dicom("未注册隐式VR小端传输语法".to_string()))?;
        let mut writer = std::io::BufWriter::new(std::fs::File::create(path)?);
        self.to_object()
            .write_dataset_with_ts(&mut writer, ts)
            .map_err(|e| PacsError::Dicom(e.to_string()))?;
        writer.flush()?;
        Ok(())
    }
}
