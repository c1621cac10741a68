// 应用状态

use crate::config::AppConfig;
use crate::debrid::DebridClient;
use crate::downloader::{sanitize_component, DownloadSubmitter};
use crate::storage::TorrentRepository;
use std::path::PathBuf;
use std::sync::Arc;

/// HTTP 层共享状态
#[derive(Clone)]
pub struct AppState {
    /// 种子仓库
    pub repo: Arc<dyn TorrentRepository>,
    /// debrid 客户端
    pub debrid: Arc<dyn DebridClient>,
    /// 下载引擎（删除种子时取消进行中的下载）
    pub downloads: Arc<dyn DownloadSubmitter>,
    /// 应用配置（启动后只读）
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn TorrentRepository>,
        debrid: Arc<dyn DebridClient>,
        downloads: Arc<dyn DownloadSubmitter>,
        config: AppConfig,
    ) -> Self {
        Self {
            repo,
            debrid,
            downloads,
            config: Arc::new(config),
        }
    }

    /// 下载根目录
    pub fn save_root(&self) -> PathBuf {
        self.config.downloader.save_path.clone()
    }

    /// 分类目录：{save_path}/{category}
    pub fn category_dir(&self, category: &str) -> PathBuf {
        let root = self.save_root();
        match sanitize_component(category) {
            Some(category) => root.join(category),
            None => root,
        }
    }
}
