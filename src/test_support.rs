//! 测试替身：内存 debrid 服务与记录型下载提交器

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::debrid::{
    AddedTorrent, DebridClient, DebridError, DebridResult, RemoteStatus, RemoteTorrentInfo,
    ResolvedLink,
};
use crate::downloader::{DownloadRequest, DownloadSubmitter};

#[derive(Clone)]
pub enum Reply {
    Info(RemoteTorrentInfo),
    NotFound,
    Transient,
}

#[derive(Default)]
pub struct FakeDebrid {
    pub replies: Mutex<HashMap<String, Reply>>,
    pub queries: Mutex<Vec<String>>,
    pub accepted: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    /// add_magnet / add_torrent_file 收到的内容
    pub added: Mutex<Vec<String>>,
    pub fail_remote_delete: bool,
    /// 解析链接时返回的文件名，默认取链接末段
    pub resolved_name: Option<String>,
}

impl FakeDebrid {
    pub fn reply(&self, rd_id: &str, reply: Reply) {
        self.replies.lock().insert(rd_id.to_string(), reply);
    }

    fn register(&self, source: String) -> AddedTorrent {
        let mut added = self.added.lock();
        added.push(source);
        let id = format!("ADD{}", added.len());
        self.reply(&id, Reply::Info(remote(&id, "magnet_conversion", &[])));
        AddedTorrent {
            uri: format!("https://api.example/torrents/info/{}", id),
            id,
        }
    }
}

/// 构造远程种子信息
pub fn remote(id: &str, status: &str, links: &[&str]) -> RemoteTorrentInfo {
    RemoteTorrentInfo {
        id: id.to_string(),
        filename: "Some.Movie".to_string(),
        hash: "deadbeef".to_string(),
        bytes: 2000,
        host: "real-debrid.com".to_string(),
        split: 2000,
        progress: 100.0,
        status: RemoteStatus::parse(status),
        links: links.iter().map(|l| l.to_string()).collect(),
        speed: Some(0),
        seeders: Some(3),
    }
}

#[async_trait]
impl DebridClient for FakeDebrid {
    async fn get_torrent_info(&self, rd_id: &str) -> DebridResult<RemoteTorrentInfo> {
        self.queries.lock().push(rd_id.to_string());
        match self.replies.lock().get(rd_id).cloned() {
            Some(Reply::Info(info)) => Ok(info),
            Some(Reply::Transient) => Err(DebridError::Http {
                status: 503,
                message: "unavailable".to_string(),
            }),
            Some(Reply::NotFound) | None => Err(DebridError::NotFound(rd_id.to_string())),
        }
    }

    async fn accept_torrent(&self, rd_id: &str) -> DebridResult<()> {
        self.accepted.lock().push(rd_id.to_string());
        Ok(())
    }

    async fn delete_torrent(&self, rd_id: &str) -> DebridResult<()> {
        self.deleted.lock().push(rd_id.to_string());
        if self.fail_remote_delete {
            return Err(DebridError::Http {
                status: 500,
                message: "boom".to_string(),
            });
        }
        Ok(())
    }

    async fn resolve_download_link(&self, link: &str) -> DebridResult<ResolvedLink> {
        let name = link.rsplit('/').next().unwrap_or("file").to_string();
        Ok(ResolvedLink {
            filename: self
                .resolved_name
                .clone()
                .unwrap_or_else(|| format!("{}.mkv", name)),
            file_size: 1000,
            url: format!("https://cdn.example/{}", name),
        })
    }

    async fn add_magnet(&self, magnet: &str) -> DebridResult<AddedTorrent> {
        Ok(self.register(magnet.to_string()))
    }

    async fn add_torrent_file(&self, content: Vec<u8>) -> DebridResult<AddedTorrent> {
        Ok(self.register(format!("file:{}", content.len())))
    }
}

#[derive(Default)]
pub struct RecordingSubmitter {
    pub requests: Mutex<Vec<DownloadRequest>>,
    pub cancelled: Mutex<Vec<i64>>,
}

#[async_trait]
impl DownloadSubmitter for RecordingSubmitter {
    async fn submit(&self, request: DownloadRequest) -> Result<()> {
        self.requests.lock().push(request);
        Ok(())
    }

    fn cancel(&self, download_id: i64) -> bool {
        self.cancelled.lock().push(download_id);
        true
    }
}
