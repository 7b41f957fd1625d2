//! VOI（感兴趣值）变换
//!
//! 将存储值映射为便于观察的灰度值：优先使用VOI LUT序列，其次是窗宽窗位，
//! 两者都不存在时保持原值。窗函数支持 LINEAR、LINEAR_EXACT 与 SIGMOID。

use crate::parser::DicomParser;
use dicom::dictionary_std::tags;
use dicom::object::DefaultDicomObject;
use tracing::{debug, warn};

/// 模态重标定参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for Rescale {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

/// 窗宽窗位
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub center: f64,
    pub width: f64,
}

/// VOI LUT函数 (0028,1056)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiFunction {
    #[default]
    Linear,
    LinearExact,
    Sigmoid,
}

impl VoiFunction {
    /// 解析函数名，未知取值回退为线性
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "LINEAR" | "" => VoiFunction::Linear,
            "LINEAR_EXACT" => VoiFunction::LinearExact,
            "SIGMOID" => VoiFunction::Sigmoid,
            other => {
                warn!("不支持的VOI LUT函数 {}，按LINEAR处理", other);
                VoiFunction::Linear
            }
        }
    }

    /// 该函数可接受的最小窗宽
    fn accepts_width(self, width: f64) -> bool {
        match self {
            VoiFunction::Linear => width >= 1.0,
            VoiFunction::LinearExact | VoiFunction::Sigmoid => width > 0.0,
        }
    }
}

/// 查找表
#[derive(Debug, Clone, PartialEq)]
pub struct Lut {
    /// 第一个被映射的输入值
    pub first_mapped: i64,
    pub entries: Vec<f64>,
}

impl Lut {
    fn lookup(&self, value: f64) -> f64 {
        let last = self.entries.len() as i64 - 1;
        let index = (value.round() as i64 - self.first_mapped).clamp(0, last.max(0));
        self.entries.get(index as usize).copied().unwrap_or(value)
    }
}

/// VOI变换
#[derive(Debug, Clone, PartialEq)]
pub enum VoiTransform {
    Identity,
    Windowing {
        window: Window,
        function: VoiFunction,
        rescale: Rescale,
        bits_stored: u16,
    },
    Lut(Lut),
}

impl VoiTransform {
    /// 从数据集中读取VOI参数（取第一个LUT或第一组窗宽窗位）
    pub fn from_object(obj: &DefaultDicomObject) -> Self {
        if let Some(lut) = Self::read_first_lut(obj) {
            debug!("使用VOI LUT序列，条目数: {}", lut.entries.len());
            return VoiTransform::Lut(lut);
        }

        let center = DicomParser::get_float_element(obj, tags::WINDOW_CENTER);
        let width = DicomParser::get_float_element(obj, tags::WINDOW_WIDTH);
        let function = DicomParser::get_string_element(obj, tags::VOILUT_FUNCTION)
            .map(|value| VoiFunction::parse(&value))
            .unwrap_or_default();
        match (center, width) {
            (Some(center), Some(width)) if function.accepts_width(width) => {
                let rescale = Rescale {
                    slope: DicomParser::get_float_element(obj, tags::RESCALE_SLOPE).unwrap_or(1.0),
                    intercept: DicomParser::get_float_element(obj, tags::RESCALE_INTERCEPT)
                        .unwrap_or(0.0),
                };
                let bits_stored = DicomParser::get_integer_element(obj, tags::BITS_STORED)
                    .and_then(|b| u16::try_from(b).ok())
                    .filter(|b| (1..=32).contains(b))
                    .unwrap_or(16);
                debug!("使用窗宽窗位: C={}, W={}, 函数={:?}", center, width, function);
                VoiTransform::Windowing {
                    window: Window { center, width },
                    function,
                    rescale,
                    bits_stored,
                }
            }
            (Some(_), Some(width)) => {
                debug!("窗宽无效({})，忽略VOI变换", width);
                VoiTransform::Identity
            }
            _ => VoiTransform::Identity,
        }
    }

    fn read_first_lut(obj: &DefaultDicomObject) -> Option<Lut> {
        let element = obj.element(tags::VOILUT_SEQUENCE).ok()?;
        let item = element.items()?.first()?;
        let descriptor = item
            .element(tags::LUT_DESCRIPTOR)
            .ok()?
            .to_multi_int::<i64>()
            .ok()?;
        let first_mapped = *descriptor.get(1)?;
        let entries: Vec<f64> = item
            .element(tags::LUT_DATA)
            .ok()?
            .to_multi_float64()
            .ok()?;
        if entries.is_empty() {
            return None;
        }
        Some(Lut {
            first_mapped,
            entries,
        })
    }

    /// 对单个存储值应用变换
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            VoiTransform::Identity => value,
            VoiTransform::Lut(lut) => lut.lookup(value),
            VoiTransform::Windowing {
                window,
                function,
                rescale,
                bits_stored,
            } => {
                let x = value * rescale.slope + rescale.intercept;
                let y_min = 0.0;
                let y_max = 2f64.powi(i32::from(*bits_stored)) - 1.0;

                match function {
                    VoiFunction::Linear => linear(x, window.center - 0.5, window.width - 1.0, y_min, y_max),
                    VoiFunction::LinearExact => linear(x, window.center, window.width, y_min, y_max),
                    VoiFunction::Sigmoid => {
                        (y_max - y_min) / (1.0 + (-4.0 * (x - window.center) / window.width).exp()) + y_min
                    }
                }
            }
        }
    }

    pub fn apply_all(&self, values: &mut [f32]) {
        if matches!(self, VoiTransform::Identity) {
            return;
        }
        for value in values.iter_mut() {
            *value = self.apply(f64::from(*value)) as f32;
        }
    }
}

/// 分段线性窗函数，`c`、`w` 为已按函数类型调整后的窗位窗宽
fn linear(x: f64, c: f64, w: f64, y_min: f64, y_max: f64) -> f64 {
    if x <= c - w / 2.0 {
        y_min
    } else if x > c + w / 2.0 {
        y_max
    } else {
        ((x - c) / w + 0.5) * (y_max - y_min) + y_min
    }
}
