//! 通用工具函数

use chrono::Utc;
use uuid::Uuid;

/// 企业根标识符
pub const UID_ROOT: &str = "1.2.826.0.1.3680043.9.7382";

/// 生成唯一的DICOM标识符
///
/// UUID 的 128 位以十进制展开，保证每个组件都是纯数字且整体不超过64字符。
pub fn generate_dicom_uid() -> String {
    let uid = format!("{}.{}.{}",
        UID_ROOT,
        Uuid::new_v4().as_u128() % 10u128.pow(24),
        Utc::now().timestamp()
    );
    debug_assert!(uid.len() <= 64);
    uid
}

/// 验证DICOM UID格式
pub fn is_valid_dicom_uid(uid: &str) -> bool {
    !uid.is_empty()
        && uid.len() <= 64
        && uid.split('.').all(|part| {
            !part.is_empty()
                && part.chars().all(|c| c.is_ascii_digit())
                && (part == "0" || !part.starts_with('0'))
        })
}

/// 将相对路径规范化为以 `/` 分隔的键
pub fn normalize_path_key(relative: &str) -> String {
    relative.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_dicom_uid() {
        let uid = generate_dicom_uid();
        assert!(is_valid_dicom_uid(&uid), "invalid uid: {}", uid);
        assert!(uid.starts_with(UID_ROOT));
    }

    #[test]
    fn test_generated_uids_differ() {
        assert_ne!(generate_dicom_uid(), generate_dicom_uid());
    }

    #[test]
    fn test_is_valid_dicom_uid() {
        assert!(is_valid_dicom_uid("1.2.840.10008.5.1.4.1.1.4"));
        assert!(!is_valid_dicom_uid(""));
        assert!(!is_valid_dicom_uid("invalid.uid.with.letters"));
        assert!(!is_valid_dicom_uid("1..2"));
        assert!(!is_valid_dicom_uid("1.02.3"));
    }

    #[test]
    fn test_normalize_path_key() {
        assert_eq!(normalize_path_key("A\\1.dcm"), "A/1.dcm");
        assert_eq!(normalize_path_key("A/B/2.dcm"), "A/B/2.dcm");
    }
}
