//! 种子与下载记录的数据模型

use serde::{Deserialize, Serialize};

/// 对外可见的种子状态
///
/// 持久化为小写字符串；`CheckingUp` 与 `Unknown` 只用于展示远程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TorrentStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "downloading")]
    Downloading,
    #[serde(rename = "downloaded")]
    Downloaded,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "checkingUP")]
    CheckingUp,
    #[serde(rename = "unknown")]
    Unknown,
}

impl TorrentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentStatus::Queued => "queued",
            TorrentStatus::Downloading => "downloading",
            TorrentStatus::Downloaded => "downloaded",
            TorrentStatus::Error => "error",
            TorrentStatus::CheckingUp => "checkingUP",
            TorrentStatus::Unknown => "unknown",
        }
    }

    /// 从数据库字符串解析，无法识别的值视为 Unknown
    pub fn from_db(value: &str) -> Self {
        match value {
            "queued" => TorrentStatus::Queued,
            "downloading" => TorrentStatus::Downloading,
            "downloaded" => TorrentStatus::Downloaded,
            "error" => TorrentStatus::Error,
            "checkingUP" => TorrentStatus::CheckingUp,
            _ => TorrentStatus::Unknown,
        }
    }
}

impl std::fmt::Display for TorrentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 调度器内部状态
///
/// 和 `TorrentStatus` 分开维护：远程 downloaded 只表示 debrid 服务端已就绪，
/// 本地文件是否拉取完成由这里记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalStatus {
    Waiting,
    WaitingForDownload,
    Downloading,
    Downloaded,
    Error,
}

impl InternalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InternalStatus::Waiting => "waiting",
            InternalStatus::WaitingForDownload => "waiting_for_download",
            InternalStatus::Downloading => "downloading",
            InternalStatus::Downloaded => "downloaded",
            InternalStatus::Error => "error",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "waiting_for_download" => InternalStatus::WaitingForDownload,
            "downloading" => InternalStatus::Downloading,
            "downloaded" => InternalStatus::Downloaded,
            "error" => InternalStatus::Error,
            _ => InternalStatus::Waiting,
        }
    }
}

impl std::fmt::Display for InternalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 本地跟踪的种子
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Torrent {
    pub id: i64,
    /// debrid 服务端 ID，唯一
    pub rd_id: String,
    pub hash: String,
    pub name: String,
    pub category: String,
    pub status: TorrentStatus,
    pub internal_status: InternalStatus,
    /// 远程进度 0-100
    pub progress: f64,
    pub size: i64,
    /// 远程速度（字节/秒）
    pub speed: i64,
    pub seeders: i64,
    pub split: i64,
    pub host: String,
    /// Unix 时间戳（秒）
    pub created_at: i64,
    pub updated_at: i64,
}

impl Torrent {
    /// 新建一条待同步的种子记录
    pub fn new(rd_id: impl Into<String>, category: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: 0,
            rd_id: rd_id.into(),
            hash: String::new(),
            name: String::new(),
            category: category.into(),
            status: TorrentStatus::Downloading,
            internal_status: InternalStatus::Waiting,
            progress: 0.0,
            size: 0,
            speed: 0,
            seeders: 0,
            split: 0,
            host: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// 种子拆出的单个文件下载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub id: i64,
    pub torrent_id: i64,
    /// 解析前的原始链接，用于去重
    pub source_link: String,
    pub file_name: String,
    pub file_size: u64,
    /// 直链（有时效）
    pub url: String,
    pub save_path: String,
    /// 终态标记，只由下载完成回调写入
    pub downloaded: bool,
    pub downloaded_bytes: u64,
    pub progress: f64,
    pub error: Option<String>,
}

impl Download {
    /// 尚未结束（既未完成也未失败）
    pub fn is_pending(&self) -> bool {
        !self.downloaded && self.error.is_none()
    }
}

/// 创建下载记录的参数
#[derive(Debug, Clone)]
pub struct NewDownload {
    pub torrent_id: i64,
    pub source_link: String,
    pub file_name: String,
    pub file_size: u64,
    pub url: String,
    pub save_path: String,
}
