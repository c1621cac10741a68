//! debrid 服务客户端
//!
//! 调度器通过 `DebridClient` 访问远程服务，生产实现为 Real-Debrid

pub mod realdebrid;
pub mod types;

pub use realdebrid::RealDebridClient;
pub use types::{AddedTorrent, RemoteStatus, RemoteTorrentInfo, ResolvedLink};

use async_trait::async_trait;
use thiserror::Error;

/// debrid 接口错误
#[derive(Debug, Error)]
pub enum DebridError {
    /// 远程种子或资源不存在
    #[error("远程资源不存在: {0}")]
    NotFound(String),
    #[error("认证失败: {0}")]
    Unauthorized(String),
    #[error("HTTP 错误 {status}: {message}")]
    Http { status: u16, message: String },
    #[error("网络请求失败: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("响应解析失败: {0}")]
    Decode(String),
}

impl DebridError {
    /// 远程明确返回不存在
    pub fn is_not_found(&self) -> bool {
        matches!(self, DebridError::NotFound(_))
    }
}

pub type DebridResult<T> = std::result::Result<T, DebridError>;

/// debrid 服务 RPC 接口
#[async_trait]
pub trait DebridClient: Send + Sync {
    /// 查询种子信息
    async fn get_torrent_info(&self, rd_id: &str) -> DebridResult<RemoteTorrentInfo>;

    /// 选择全部文件开始下载
    async fn accept_torrent(&self, rd_id: &str) -> DebridResult<()>;

    async fn delete_torrent(&self, rd_id: &str) -> DebridResult<()>;

    /// 把托管链接解析成可直接下载的地址
    async fn resolve_download_link(&self, link: &str) -> DebridResult<ResolvedLink>;

    async fn add_magnet(&self, magnet: &str) -> DebridResult<AddedTorrent>;

    async fn add_torrent_file(&self, content: Vec<u8>) -> DebridResult<AddedTorrent>;
}
