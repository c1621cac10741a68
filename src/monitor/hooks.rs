//! 下载引擎回调：把下载结果写回仓库
//!
//! 回调只携带下载记录 ID，每次从仓库重新读取记录

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::downloader::{DownloadHooks, DownloadSnapshot};
use crate::storage::TorrentRepository;

pub struct RepositoryHooks {
    repo: Arc<dyn TorrentRepository>,
}

impl RepositoryHooks {
    pub fn new(repo: Arc<dyn TorrentRepository>) -> Self {
        Self { repo }
    }

    fn finish(&self, snapshot: &DownloadSnapshot) -> anyhow::Result<()> {
        let Some(download) = self.repo.get_download(snapshot.download_id)? else {
            // 种子已被删除
            debug!("下载记录 #{} 已不存在，忽略完成回调", snapshot.download_id);
            return Ok(());
        };

        if let Some(err) = &snapshot.error {
            self.repo.mark_download_failed(download.id, err)?;
            return Ok(());
        }

        if !self.repo.mark_download_complete(download.id)? {
            return Ok(());
        }

        if self.repo.all_downloads_complete(download.torrent_id)? {
            self.repo.mark_torrent_downloaded(download.torrent_id)?;
            info!("✓ 种子 #{} 全部文件下载完成", download.torrent_id);
        }
        Ok(())
    }
}

impl DownloadHooks for RepositoryHooks {
    fn on_update(&self, snapshot: &DownloadSnapshot) {
        if let Err(e) = self.repo.update_download_progress(
            snapshot.download_id,
            snapshot.progress.downloaded,
            snapshot.progress.percent,
        ) {
            error!("更新下载进度失败 #{}: {:#}", snapshot.download_id, e);
        }
    }

    fn on_finish(&self, snapshot: &DownloadSnapshot) {
        if let Err(e) = self.finish(snapshot) {
            error!("记录下载结果失败 #{}: {:#}", snapshot.download_id, e);
        }
    }
}
