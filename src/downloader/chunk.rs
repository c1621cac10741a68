use anyhow::{Context, Result};
use futures::TryStreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::progress::Progress;
use super::throttle::{SpeedLimiter, READ_BUFFER_SIZE};

/// 分片信息，字节范围为闭区间 [start, end]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// 分片索引
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

/// 单次缓冲写入后上报的分片进度
#[derive(Debug, Clone, Copy)]
pub struct ChunkEvent {
    pub index: usize,
    /// 本次新增字节
    pub delta: u64,
    /// 分片内进度
    pub progress: Progress,
}

/// 分片下载所需的共享上下文
#[derive(Debug, Clone)]
pub struct ChunkContext {
    pub client: Client,
    pub url: String,
    pub total_size: u64,
    pub save_dir: PathBuf,
    pub file_name: String,
    pub limiter: Option<SpeedLimiter>,
    pub cancel: CancellationToken,
}

impl Chunk {
    /// 分片大小
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Range 请求头
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// 分片临时文件路径：{save_dir}/{file_name}.part{index}
    pub fn part_path(&self, save_dir: &Path, file_name: &str) -> PathBuf {
        part_path(save_dir, file_name, self.index)
    }

    /// 下载分片（流式读取，每个缓冲块回调一次进度）
    ///
    /// 失败时临时文件保留在原处
    pub async fn download<F>(&self, ctx: &ChunkContext, on_event: F) -> Result<u64>
    where
        F: Fn(ChunkEvent) + Send + Sync,
    {
        if ctx.cancel.is_cancelled() {
            anyhow::bail!("cancelled");
        }

        debug!(
            "下载分片 #{}: {} ({})",
            self.index,
            self.range_header(),
            ctx.file_name
        );

        let request = ctx
            .client
            .get(&ctx.url)
            .header(reqwest::header::RANGE, self.range_header())
            .send();
        let resp = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => anyhow::bail!("cancelled"),
            resp = request => resp.context("发送HTTP请求失败")?,
        };

        // 只有覆盖整个文件的 Range 才接受 200
        let covers_whole_file = self.start == 0 && self.end + 1 == ctx.total_size;
        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK if covers_whole_file => {}
            status => anyhow::bail!("HTTP错误: {} (分片 #{})", status, self.index),
        }

        let path = self.part_path(&ctx.save_dir, &ctx.file_name);
        let mut file = File::create(&path)
            .await
            .with_context(|| format!("创建分片文件失败: {:?}", path))?;

        let stream = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let mut reader = StreamReader::new(stream);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let started_at = Instant::now();
        let mut downloaded = 0u64;

        loop {
            let n = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => anyhow::bail!("cancelled"),
                read = reader.read(&mut buf) => read.context("读取数据流失败")?,
            };
            if n == 0 {
                break;
            }

            file.write_all(&buf[..n]).await.context("写入文件失败")?;
            downloaded += n as u64;

            let progress = Progress::compute(downloaded, self.size(), started_at.elapsed());
            on_event(ChunkEvent {
                index: self.index,
                delta: n as u64,
                progress,
            });

            if let Some(limiter) = &ctx.limiter {
                if !limiter.throttle(n, progress.speed, &ctx.cancel).await {
                    anyhow::bail!("cancelled");
                }
            }
        }

        file.flush().await.context("刷新文件缓冲失败")?;

        if downloaded != self.size() {
            anyhow::bail!(
                "分片 #{} 数据不完整: 实际 {} bytes, 期望 {} bytes",
                self.index,
                downloaded,
                self.size()
            );
        }

        debug!("分片 #{} 下载完成，大小: {} bytes", self.index, downloaded);
        Ok(downloaded)
    }
}

pub fn part_path(save_dir: &Path, file_name: &str, index: usize) -> PathBuf {
    save_dir.join(format!("{}.part{}", file_name, index))
}

/// 名称是否为单个普通路径组件（不含分隔符、`.`、`..`、根或盘符）
pub fn is_single_component(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// 把远程或客户端提供的名称收敛为单个路径组件
///
/// 分隔符替换为 `_`；空名称、`.` 和 `..` 返回 None
pub fn sanitize_component(name: &str) -> Option<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    is_single_component(&cleaned).then_some(cleaned)
}

/// 按分片数切分文件
///
/// 每片大小为 total_size / chunk_count，最后一片吸收余数（end = total_size - 1）。
/// 分片数大于文件大小时退化为每字节一片；空文件不产生分片
pub fn split_ranges(total_size: u64, chunk_count: usize) -> Vec<Chunk> {
    if total_size == 0 {
        return Vec::new();
    }

    let count = (chunk_count.max(1) as u64).min(total_size);
    let chunk_size = total_size / count;

    (0..count)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i == count - 1 {
                total_size - 1
            } else {
                start + chunk_size - 1
            };
            Chunk {
                index: i as usize,
                start,
                end,
            }
        })
        .collect()
}

/// 按索引顺序合并分片文件，合并成功后删除分片
pub async fn merge_parts(save_dir: &Path, file_name: &str, chunk_count: usize) -> Result<PathBuf> {
    let output_path = save_dir.join(file_name);
    let mut output = File::create(&output_path)
        .await
        .with_context(|| format!("创建目标文件失败: {:?}", output_path))?;

    for index in 0..chunk_count {
        let path = part_path(save_dir, file_name, index);
        let mut part = File::open(&path)
            .await
            .with_context(|| format!("打开分片文件失败: {:?}", path))?;
        tokio::io::copy(&mut part, &mut output)
            .await
            .with_context(|| format!("合并分片失败: {:?}", path))?;
    }

    output.flush().await.context("刷新文件缓冲失败")?;

    for index in 0..chunk_count {
        let path = part_path(save_dir, file_name, index);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("删除分片文件失败: {:?}, 错误: {}", path, e);
        }
    }

    Ok(output_path)
}
