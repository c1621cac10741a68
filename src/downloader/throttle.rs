//! 分片限速
//!
//! 被动限速：每读完一个缓冲块后测量瞬时速度，超过上限时按本块大小休眠

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// 读取缓冲大小 32KiB
pub const READ_BUFFER_SIZE: usize = 32 * 1024;

/// 单分片限速器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedLimiter {
    /// 上限（字节/秒）
    limit_bytes_per_sec: u64,
}

impl SpeedLimiter {
    /// 0 表示不限速，返回 None
    pub fn from_kbps(limit_kbps: u64) -> Option<Self> {
        if limit_kbps == 0 {
            None
        } else {
            Some(Self {
                limit_bytes_per_sec: limit_kbps * 1024,
            })
        }
    }

    pub fn limit_bytes_per_sec(&self) -> u64 {
        self.limit_bytes_per_sec
    }

    /// 测得速度超过上限时返回下一次读取前需要等待的时长：
    /// block_bytes / limit 秒
    pub fn delay_for(&self, block_bytes: usize, measured_speed: f64) -> Option<Duration> {
        if measured_speed <= self.limit_bytes_per_sec as f64 {
            return None;
        }
        let nanos = (block_bytes as u64).saturating_mul(1_000_000_000) / self.limit_bytes_per_sec;
        Some(Duration::from_nanos(nanos))
    }

    /// 按需休眠，取消时提前返回 false
    pub async fn throttle(
        &self,
        block_bytes: usize,
        measured_speed: f64,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(delay) = self.delay_for(block_bytes, measured_speed) else {
            return true;
        };

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
