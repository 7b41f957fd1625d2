//! X光影像解码器
//!
//! 读取单个DICOM文件，提取像素数据，应用VOI变换，统一为MONOCHROME2约定，
//! 并按影像自身最大值归一化到 [-1024, 1024]。

use crate::parser::DicomParser;
use crate::voi::VoiTransform;
use dicom::dictionary_std::tags;
use dicom_pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder};
use pacs_core::{
    NormalizedImage, PacsError, PhotometricInterpretation, Result, SourceImage,
    NORMALIZATION_RANGE,
};
use std::path::Path;
use tracing::{debug, info, warn};

/// 影像解码器
pub struct ImageDecoder;

impl ImageDecoder {
    /// 解码并归一化DICOM影像
    pub fn decode<P: AsRef<Path>>(path: P) -> Result<NormalizedImage> {
        let path = path.as_ref();
        let (source, voi) = Self::read_source(path)?;
        Self::normalize(&source, &voi, &path.display().to_string())
    }

    /// 读取源影像的存储值与VOI参数
    pub fn read_source<P: AsRef<Path>>(path: P) -> Result<(SourceImage, VoiTransform)> {
        let path = path.as_ref();
        let source = path.display().to_string();
        let decode_failure = |reason: String| PacsError::DecodeFailure {
            path: source.clone(),
            reason,
        };

        let obj = DicomParser::open(path)?;

        let photometric = DicomParser::get_string_element(&obj, tags::PHOTOMETRIC_INTERPRETATION)
            .ok_or_else(|| decode_failure("缺少光度解释标签".to_string()))?;
        let photometric = PhotometricInterpretation::try_from(photometric.as_str())?;

        if obj.element(tags::PIXEL_DATA).is_err() {
            return Err(decode_failure("缺少像素数据".to_string()));
        }

        let decoded = obj
            .decode_pixel_data()
            .map_err(|e| decode_failure(format!("像素数据解码失败: {}", e)))?;

        let rows = decoded.rows() as usize;
        let columns = decoded.columns() as usize;
        let samples = usize::from(decoded.samples_per_pixel()).max(1);

        // 存储值，不在此处应用模态LUT（窗宽窗位变换自行处理重标定）
        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
        let frame: Vec<f32> = decoded
            .to_vec_frame_with_options(0, &options)
            .map_err(|e| decode_failure(format!("像素数据转换失败: {}", e)))?;

        if rows == 0 || columns == 0 || frame.len() < rows * columns * samples {
            return Err(decode_failure(format!(
                "像素数据尺寸不匹配: {}x{}x{}, 实际 {} 个值",
                rows,
                columns,
                samples,
                frame.len()
            )));
        }

        let pixels: Vec<f32> = frame.iter().step_by(samples).take(rows * columns).copied().collect();

        debug!("读取像素数据: {}x{}, 光度解释: {}", rows, columns, photometric);

        let image = SourceImage {
            identity: DicomParser::extract_identity_lossy(&obj),
            photometric,
            rows,
            columns,
            pixels,
        };
        Ok((image, VoiTransform::from_object(&obj)))
    }

    /// 将源影像变换并归一化
    ///
    /// 输出范围依赖影像内容：影像自身的最大值映射到 +1024，
    /// 不同影像之间不存在固定的绝对标定。
    pub fn normalize(source: &SourceImage, voi: &VoiTransform, label: &str) -> Result<NormalizedImage> {
        let decode_failure = |reason: String| PacsError::DecodeFailure {
            path: label.to_string(),
            reason,
        };

        if source.rows == 0 || source.columns == 0 || source.pixels.len() != source.rows * source.columns {
            return Err(decode_failure("像素数据尺寸不匹配".to_string()));
        }

        let mut data = source.pixels.clone();
        voi.apply_all(&mut data);

        if source.photometric.is_inverted() {
            warn!("将MONOCHROME1转换为MONOCHROME2约定（反转亮度）: {}", label);
            let max = max_value(&data);
            for value in data.iter_mut() {
                *value = max - *value;
            }
        }

        let max = max_value(&data);
        if !max.is_finite() || max <= 0.0 {
            return Err(decode_failure(format!("像素最大值无效: {}", max)));
        }

        for value in data.iter_mut() {
            let scaled = (2.0 * (*value / max) - 1.0) * NORMALIZATION_RANGE;
            *value = scaled.clamp(-NORMALIZATION_RANGE, NORMALIZATION_RANGE);
        }

        info!(
            "影像解码完成: {} ({}x{}), SOP实例UID: {}",
            label, source.rows, source.columns, source.identity.sop_instance_uid
        );
        Ok(NormalizedImage::new(label, source.rows, source.columns, data))
    }
}

fn max_value(values: &[f32]) -> f32 {
    values.iter().copied().fold(f32::NEG_INFINITY, f32::max)
}
