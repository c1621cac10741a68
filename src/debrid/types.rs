//! debrid 服务返回的数据结构

use serde::{Deserialize, Serialize};

/// 远程种子状态
///
/// 服务端返回的是自由字符串，这里收敛为封闭枚举，无法识别的值落到 `Unknown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteStatus {
    WaitingFilesSelection,
    Queued,
    Downloading,
    Downloaded,
    Uploading,
    Dead,
    Unknown,
}

impl RemoteStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "waiting_files_selection" => RemoteStatus::WaitingFilesSelection,
            "queue" | "queued" => RemoteStatus::Queued,
            "downloading" | "magnet_conversion" => RemoteStatus::Downloading,
            "downloaded" => RemoteStatus::Downloaded,
            "uploading" | "compressing" => RemoteStatus::Uploading,
            "dead" | "magnet_error" | "error" | "virus" => RemoteStatus::Dead,
            _ => RemoteStatus::Unknown,
        }
    }
}

impl From<&str> for RemoteStatus {
    fn from(value: &str) -> Self {
        RemoteStatus::parse(value)
    }
}

/// 远程种子信息
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTorrentInfo {
    pub id: String,
    pub filename: String,
    pub hash: String,
    pub bytes: i64,
    pub host: String,
    pub split: i64,
    /// 0-100
    pub progress: f64,
    pub status: RemoteStatus,
    pub links: Vec<String>,
    pub speed: Option<i64>,
    pub seeders: Option<i64>,
}

/// 解析后的直链
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLink {
    pub filename: String,
    pub file_size: u64,
    pub url: String,
}

/// 添加种子后服务端返回的 ID
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddedTorrent {
    pub id: String,
    #[serde(default)]
    pub uri: String,
}

// ============================================================================
// Real-Debrid 接口原始响应
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct RawTorrentInfo {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub bytes: i64,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub split: i64,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub links: Vec<String>,
    pub speed: Option<i64>,
    pub seeders: Option<i64>,
}

impl From<RawTorrentInfo> for RemoteTorrentInfo {
    fn from(raw: RawTorrentInfo) -> Self {
        Self {
            status: RemoteStatus::parse(&raw.status),
            id: raw.id,
            filename: raw.filename,
            hash: raw.hash,
            bytes: raw.bytes,
            host: raw.host,
            split: raw.split,
            progress: raw.progress,
            links: raw.links,
            speed: raw.speed,
            seeders: raw.seeders,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawUnrestrictedLink {
    pub filename: String,
    #[serde(default)]
    pub filesize: u64,
    pub download: String,
}

impl From<RawUnrestrictedLink> for ResolvedLink {
    fn from(raw: RawUnrestrictedLink) -> Self {
        Self {
            filename: raw.filename,
            file_size: raw.filesize,
            url: raw.download,
        }
    }
}
