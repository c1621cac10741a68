//! 种子/下载记录持久化
//!
//! 调度器与下载回调只依赖 `TorrentRepository`，具体实现为 SQLite

pub mod models;
pub mod sqlite;

pub use models::{Download, InternalStatus, NewDownload, Torrent, TorrentStatus};
pub use sqlite::SqliteRepository;

use anyhow::Result;

/// 种子仓库
///
/// 实现需要自行保证并发写入不同记录时的串行化：
/// 下载完成回调会从多个下载任务中同时调用
pub trait TorrentRepository: Send + Sync {
    /// 需要调度器继续处理的种子：内部状态不是 downloaded，
    /// 或者标记为 downloaded 却没有任何下载记录
    fn find_not_terminal(&self) -> Result<Vec<Torrent>>;

    fn find_by_external_id(&self, rd_id: &str) -> Result<Option<Torrent>>;

    /// 按 hash 或 rd_id 查找（不区分大小写）
    fn find_by_hash(&self, hash: &str) -> Result<Option<Torrent>>;

    /// 空分类返回全部
    fn find_by_category(&self, category: &str) -> Result<Vec<Torrent>>;

    fn get_torrent(&self, id: i64) -> Result<Option<Torrent>>;

    /// 插入新种子，返回自增 ID
    fn create_torrent(&self, torrent: &Torrent) -> Result<i64>;

    fn save(&self, torrent: &Torrent) -> Result<()>;

    /// 删除种子及其所有下载记录
    fn delete(&self, id: i64) -> Result<()>;

    fn has_downloads(&self, torrent_id: i64) -> Result<bool>;

    /// 是否还有未完成且未失败的下载
    fn has_pending_downloads(&self, torrent_id: i64) -> Result<bool>;

    fn has_failed_downloads(&self, torrent_id: i64) -> Result<bool>;

    /// 至少有一条下载记录且全部完成
    fn all_downloads_complete(&self, torrent_id: i64) -> Result<bool>;

    fn list_downloads(&self, torrent_id: i64) -> Result<Vec<Download>>;

    fn get_download(&self, id: i64) -> Result<Option<Download>>;

    /// 已完成下载对应的原始链接
    fn completed_source_links(&self, torrent_id: i64) -> Result<Vec<String>>;

    fn create_download(&self, download: &NewDownload) -> Result<i64>;

    fn update_download_progress(&self, id: i64, downloaded_bytes: u64, progress: f64) -> Result<()>;

    /// 标记下载完成，只生效一次；返回本次调用是否改变了记录
    fn mark_download_complete(&self, id: i64) -> Result<bool>;

    fn mark_download_failed(&self, id: i64, error: &str) -> Result<()>;

    fn mark_torrent_downloaded(&self, torrent_id: i64) -> Result<()>;

    /// 启动恢复：删除所有未完成的下载记录，返回删除数量
    fn clear_pending_downloads(&self) -> Result<usize>;

    /// 启动恢复：内部状态 downloading 重置为 waiting_for_download，返回影响数量
    fn reset_downloading_torrents(&self) -> Result<usize>;
}
