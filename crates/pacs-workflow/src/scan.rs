//! 目录扫描

use pacs_core::utils::normalize_path_key;
use pacs_core::{PacsError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// DICOM文件扩展名（不区分大小写）
pub const DICOM_EXTENSION: &str = "dcm";

/// 扫描到的DICOM文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// 相对扫描根目录、以 `/` 分隔的键
    pub key: String,
}

impl ScannedFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.key.clone())
    }
}

pub fn is_dicom_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(DICOM_EXTENSION))
        .unwrap_or(false)
}

/// 计算文件相对根目录的键
pub fn path_key(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        PacsError::Internal(format!("{} 不在扫描目录 {} 下", path.display(), root.display()))
    })?;
    Ok(normalize_path_key(&relative.to_string_lossy()))
}

/// 递归扫描目录下的DICOM文件，按路径排序
///
/// 根目录不存在、不可读或不是目录时返回错误（整批终止）；
/// 子目录读取失败仅记录警告。
pub fn scan_dicom_files(root: &Path) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(std::io::Error::from(e).into()),
            Err(e) => {
                warn!("无法读取目录项 {:?}: {}", e.path(), e);
                continue;
            }
        };

        if entry.depth() == 0 {
            if !entry.file_type().is_dir() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} 不是目录", root.display()),
                )
                .into());
            }
            debug!("扫描目录: {:?}", root);
            continue;
        }

        if entry.file_type().is_file() && is_dicom_file(entry.path()) {
            let path = entry.into_path();
            let key = path_key(root, &path)?;
            files.push(ScannedFile { path, key });
        }
    }

    files.sort_by(|a, b| a.key.cmp(&b.key));
    debug!("共发现 {} 个DICOM文件", files.len());
    Ok(files)
}
