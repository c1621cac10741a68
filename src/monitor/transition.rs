//! 远程状态到本地状态的映射表

use crate::debrid::RemoteStatus;
use crate::storage::{InternalStatus, Torrent, TorrentStatus};

/// 状态更新之外需要执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// 远程选择全部文件
    Accept,
    /// 解析链接、创建下载记录并提交下载
    CreateDownloads,
    /// 远程与本地一起删除
    Delete,
}

/// 单个种子在一次轮询中的状态迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: Option<TorrentStatus>,
    pub internal: Option<InternalStatus>,
    pub action: Action,
    /// 本轮不再执行后续处理
    pub stop: bool,
}

impl Transition {
    const fn keep() -> Self {
        Self {
            status: None,
            internal: None,
            action: Action::None,
            stop: false,
        }
    }

    const fn status(status: TorrentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::keep()
        }
    }

    /// 写入种子，返回是否有字段变化
    pub fn apply(&self, torrent: &mut Torrent) -> bool {
        let mut changed = false;
        if let Some(status) = self.status {
            if torrent.status != status {
                torrent.status = status;
                changed = true;
            }
        }
        if let Some(internal) = self.internal {
            if torrent.internal_status != internal {
                torrent.internal_status = internal;
                changed = true;
            }
        }
        changed
    }
}

/// 根据远程状态和当前内部状态计算迁移
pub fn transition(remote: RemoteStatus, internal: InternalStatus) -> Transition {
    match remote {
        RemoteStatus::WaitingFilesSelection => Transition {
            internal: Some(InternalStatus::WaitingForDownload),
            action: Action::Accept,
            ..Transition::keep()
        },
        RemoteStatus::Downloaded => match internal {
            InternalStatus::Waiting
            | InternalStatus::WaitingForDownload
            | InternalStatus::Downloading => Transition {
                action: Action::CreateDownloads,
                ..Transition::status(TorrentStatus::Downloaded)
            },
            InternalStatus::Downloaded => Transition::status(TorrentStatus::Downloaded),
            // 本地下载失败，保留 error 状态
            InternalStatus::Error => Transition::keep(),
        },
        RemoteStatus::Dead => Transition {
            action: Action::Delete,
            stop: true,
            ..Transition::keep()
        },
        RemoteStatus::Downloading => Transition {
            internal: Some(InternalStatus::Downloading),
            stop: true,
            ..Transition::keep()
        },
        RemoteStatus::Queued => Transition::status(TorrentStatus::Queued),
        RemoteStatus::Uploading => Transition::status(TorrentStatus::CheckingUp),
        RemoteStatus::Unknown => Transition::status(TorrentStatus::Unknown),
    }
}
