// 分片下载引擎

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::chunk::{is_single_component, merge_parts, split_ranges, ChunkContext};
use super::progress::{Progress, ProgressTracker};
use super::throttle::SpeedLimiter;
use crate::config::DownloaderConfig;

/// 进度回调的最小间隔
const UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// 取消时写入快照的错误信息
pub const CANCELLED: &str = "cancelled";

/// 提交给引擎的下载请求
///
/// `download_id` 是调用方记录的关联 ID，回调中原样带回
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub download_id: i64,
    pub url: String,
    pub file_name: String,
    pub file_size: u64,
    pub save_path: PathBuf,
}

/// 回调中传递的下载状态
#[derive(Debug, Clone)]
pub struct DownloadSnapshot {
    pub download_id: i64,
    pub file_name: String,
    pub progress: Progress,
    /// 失败原因，成功时为 None
    pub error: Option<String>,
}

impl DownloadSnapshot {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// 生命周期回调
///
/// on_start 与 on_finish 每个下载各调用一次，on_update 调用零次或多次。
/// 多个下载会并发调用同一个实现
pub trait DownloadHooks: Send + Sync {
    fn on_start(&self, _snapshot: &DownloadSnapshot) {}
    fn on_update(&self, _snapshot: &DownloadSnapshot) {}
    fn on_finish(&self, _snapshot: &DownloadSnapshot) {}
}

/// 空回调
pub struct NoopHooks;

impl DownloadHooks for NoopHooks {}

/// 调度器向下载引擎提交任务的接口
#[async_trait]
pub trait DownloadSubmitter: Send + Sync {
    /// 提交下载；并发已满时等待空闲槽位
    async fn submit(&self, request: DownloadRequest) -> Result<()>;

    /// 取消进行中的下载，返回是否找到该下载
    fn cancel(&self, download_id: i64) -> bool;
}

/// 引擎参数
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub chunk_count: usize,
    pub speed_limit_kbps: u64,
    pub max_concurrent_downloads: usize,
}

impl From<&DownloaderConfig> for EngineOptions {
    fn from(config: &DownloaderConfig) -> Self {
        Self {
            chunk_count: config.chunk_count.max(1),
            speed_limit_kbps: config.speed_limit_kbps,
            max_concurrent_downloads: config.max_concurrent_downloads.max(1),
        }
    }
}

/// 等待下载结束的句柄
pub struct DownloadHandle {
    pub download_id: i64,
    join: JoinHandle<DownloadSnapshot>,
}

impl DownloadHandle {
    pub async fn wait(self) -> Result<DownloadSnapshot> {
        self.join.await.context("下载任务异常退出")
    }
}

struct EngineInner {
    client: Client,
    options: EngineOptions,
    /// 全局并发槽位
    semaphore: Arc<Semaphore>,
    hooks: Arc<dyn DownloadHooks>,
    /// 进行中的下载
    active: DashMap<i64, CancellationToken>,
    /// 所有下载令牌的父令牌
    root_cancel: CancellationToken,
}

/// 下载引擎
#[derive(Clone)]
pub struct DownloadEngine {
    inner: Arc<EngineInner>,
}

impl DownloadEngine {
    pub fn new(config: &DownloaderConfig, hooks: Arc<dyn DownloadHooks>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(config.chunk_count.max(1) * 2)
            .build()
            .context("创建下载 HTTP 客户端失败")?;
        Ok(Self::with_client(client, EngineOptions::from(config), hooks))
    }

    pub fn with_client(client: Client, options: EngineOptions, hooks: Arc<dyn DownloadHooks>) -> Self {
        info!(
            "下载引擎初始化: 分片数={}, 单分片限速={} KB/s, 最大同时下载={}",
            options.chunk_count, options.speed_limit_kbps, options.max_concurrent_downloads
        );
        Self {
            inner: Arc::new(EngineInner {
                client,
                options,
                semaphore: Arc::new(Semaphore::new(options.max_concurrent_downloads)),
                hooks,
                active: DashMap::new(),
                root_cancel: CancellationToken::new(),
            }),
        }
    }

    /// 提交下载
    ///
    /// 只在获取并发槽位时阻塞，之后在后台执行；cancel_all 之后立即返回错误
    pub async fn start(&self, request: DownloadRequest) -> Result<DownloadHandle> {
        if !is_single_component(&request.file_name) {
            anyhow::bail!("非法文件名: {:?}", request.file_name);
        }
        if self.inner.active.contains_key(&request.download_id) {
            anyhow::bail!("下载 #{} 已在进行中", request.download_id);
        }

        let permit = tokio::select! {
            biased;
            _ = self.inner.root_cancel.cancelled() => anyhow::bail!(CANCELLED),
            permit = self.inner.semaphore.clone().acquire_owned() => {
                permit.context("下载槽位已关闭")?
            }
        };

        // 等待槽位期间可能有同 ID 的下载抢先开始
        let token = match self.inner.active.entry(request.download_id) {
            Entry::Occupied(_) => anyhow::bail!("下载 #{} 已在进行中", request.download_id),
            Entry::Vacant(slot) => {
                let token = self.inner.root_cancel.child_token();
                slot.insert(token.clone());
                token
            }
        };

        let started = DownloadSnapshot {
            download_id: request.download_id,
            file_name: request.file_name.clone(),
            progress: Progress::compute(0, request.file_size, Duration::ZERO),
            error: None,
        };
        self.inner.hooks.on_start(&started);

        info!(
            "开始下载 #{}: {} ({} bytes)",
            request.download_id, request.file_name, request.file_size
        );

        let download_id = request.download_id;
        let engine = self.clone();
        let join = tokio::spawn(async move { engine.execute(request, token, permit).await });

        Ok(DownloadHandle { download_id, join })
    }

    /// 取消下载
    pub fn cancel(&self, download_id: i64) -> bool {
        match self.inner.active.get(&download_id) {
            Some(token) => {
                token.cancel();
                info!("已请求取消下载 #{}", download_id);
                true
            }
            None => false,
        }
    }

    /// 取消全部下载（关闭服务时调用）
    pub fn cancel_all(&self) {
        self.inner.root_cancel.cancel();
    }

    /// 进行中的下载数量
    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    async fn execute(
        &self,
        request: DownloadRequest,
        token: CancellationToken,
        permit: OwnedSemaphorePermit,
    ) -> DownloadSnapshot {
        let tracker = Arc::new(ProgressTracker::new(request.file_size));
        let result = self.download_file(&request, &token, &tracker).await;

        let snapshot = DownloadSnapshot {
            download_id: request.download_id,
            file_name: request.file_name.clone(),
            progress: tracker.snapshot(),
            error: result.as_ref().err().map(|e| {
                if token.is_cancelled() {
                    CANCELLED.to_string()
                } else {
                    format!("{:#}", e)
                }
            }),
        };

        match &snapshot.error {
            None => info!("✓ 下载完成 #{}: {}", request.download_id, request.file_name),
            Some(e) => error!("✗ 下载失败 #{}: {}: {}", request.download_id, request.file_name, e),
        }

        self.inner.active.remove(&request.download_id);
        // 槽位在完成回调之后释放
        self.inner.hooks.on_finish(&snapshot);
        drop(permit);

        snapshot
    }

    async fn download_file(
        &self,
        request: &DownloadRequest,
        token: &CancellationToken,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&request.save_path)
            .await
            .with_context(|| format!("创建保存目录失败: {:?}", request.save_path))?;

        let chunks = split_ranges(request.file_size, self.inner.options.chunk_count);
        if chunks.is_empty() {
            let path = request.save_path.join(&request.file_name);
            tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("创建空文件失败: {:?}", path))?;
            return Ok(());
        }

        let ctx = Arc::new(ChunkContext {
            client: self.inner.client.clone(),
            url: request.url.clone(),
            total_size: request.file_size,
            save_dir: request.save_path.clone(),
            file_name: request.file_name.clone(),
            limiter: SpeedLimiter::from_kbps(self.inner.options.speed_limit_kbps),
            cancel: token.clone(),
        });

        debug!("下载 #{} 切分为 {} 个分片", request.download_id, chunks.len());

        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
        let mut handles = Vec::with_capacity(chunks.len());

        for chunk in chunks.iter().copied() {
            if token.is_cancelled() {
                warn!("下载 #{} 已取消，停止创建新的分片任务", request.download_id);
                break;
            }
            let ctx = ctx.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                chunk
                    .download(&ctx, move |event| {
                        let _ = tx.send(event.delta);
                    })
                    .await
            }));
        }
        drop(tx);

        // 汇总字节数并节流转发 on_update，所有分片结束后通道关闭
        let mut last_update = Instant::now();
        while let Some(delta) = rx.recv().await {
            let downloaded = tracker.add(delta);
            if last_update.elapsed() >= UPDATE_INTERVAL || downloaded >= request.file_size {
                last_update = Instant::now();
                self.inner.hooks.on_update(&DownloadSnapshot {
                    download_id: request.download_id,
                    file_name: request.file_name.clone(),
                    progress: tracker.snapshot(),
                    error: None,
                });
            }
        }

        // 等待全部分片，单个分片失败不影响其他分片
        let spawned = handles.len();
        let mut first_error: Option<anyhow::Error> = None;
        for (index, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("分片任务异常退出: {}", e)),
            };
            if let Err(e) = outcome {
                warn!("下载 #{} 分片 #{} 失败: {:#}", request.download_id, index, e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if spawned < chunks.len() || token.is_cancelled() {
            anyhow::bail!(CANCELLED);
        }

        let output = merge_parts(&request.save_path, &request.file_name, chunks.len()).await?;
        verify_file_size(&output, request.file_size).await
    }
}

#[async_trait]
impl DownloadSubmitter for DownloadEngine {
    async fn submit(&self, request: DownloadRequest) -> Result<()> {
        self.start(request).await.map(|_| ())
    }

    fn cancel(&self, download_id: i64) -> bool {
        DownloadEngine::cancel(self, download_id)
    }
}

/// 校验文件大小
async fn verify_file_size(path: &Path, expected_size: u64) -> Result<()> {
    let actual_size = tokio::fs::metadata(path)
        .await
        .context("获取文件元数据失败")?
        .len();

    if actual_size != expected_size {
        anyhow::bail!(
            "文件大小不匹配: 实际 {} bytes, 期望 {} bytes",
            actual_size,
            expected_size
        );
    }

    debug!("文件大小校验通过: {:?} {} bytes", path, actual_size);
    Ok(())
}
