//! # PACS集成模块
//!
//! 提供与外部归档系统的集成：将结构化报告通过HTTP投递到PACS（Orthanc REST接口）。

pub mod archive;

pub use archive::{ArchiveClient, ArchiveSettings, ReportSink, DICOM_CONTENT_TYPE};
