// qbrdt: 把 debrid 服务伪装成 qBittorrent 的桥接服务

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 持久化模块（SQLite）
pub mod storage;

// debrid 服务客户端
pub mod debrid;

// 下载引擎模块
pub mod downloader;

// 种子同步模块
pub mod monitor;

// Web服务器模块
pub mod server;

#[cfg(test)]
pub(crate) mod test_support;

// 导出常用类型
pub use config::AppConfig;
pub use debrid::{DebridClient, DebridError, RealDebridClient};
pub use downloader::{DownloadEngine, DownloadRequest, DownloadSubmitter};
pub use monitor::{RepositoryHooks, TorrentMonitor};
pub use server::AppState;
pub use storage::{SqliteRepository, TorrentRepository};
