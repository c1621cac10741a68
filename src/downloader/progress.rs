//! 下载进度模型

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// 进度快照
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Progress {
    /// 已下载字节数
    pub downloaded: u64,
    /// 总字节数
    pub total: u64,
    /// 百分比 0-100
    pub percent: f64,
    /// 速度（字节/秒）
    pub speed: f64,
    /// 预计剩余时间，速度为 0 时未知
    pub remaining: Option<Duration>,
}

impl Progress {
    /// 根据已下载量和耗时计算进度
    ///
    /// 速度按 downloaded / elapsed 计算，剩余时间为 (total - downloaded) / speed
    pub fn compute(downloaded: u64, total: u64, elapsed: Duration) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            (downloaded as f64 / total as f64 * 100.0).min(100.0)
        };

        let secs = elapsed.as_secs_f64();
        let speed = if secs > 0.0 {
            downloaded as f64 / secs
        } else {
            0.0
        };

        let left = total.saturating_sub(downloaded);
        let remaining = if left == 0 {
            Some(Duration::ZERO)
        } else if speed > 0.0 {
            Some(Duration::from_secs_f64(left as f64 / speed))
        } else {
            None
        };

        Self {
            downloaded,
            total,
            percent,
            speed,
            remaining,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.total
    }
}

/// 整个文件的进度汇总
///
/// 各分片只上报新增字节，这里累加原始字节数，
/// ETA 使用汇总速率而不是各分片 ETA 相加
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    downloaded: AtomicU64,
    started_at: Instant,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            downloaded: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// 累加字节，返回累加后的总量
    pub fn add(&self, bytes: u64) -> u64 {
        self.downloaded.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Progress {
        Progress::compute(self.downloaded(), self.total, self.started_at.elapsed())
    }
}
