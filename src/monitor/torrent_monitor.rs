//! 种子同步服务
//!
//! 按固定间隔轮询 debrid 服务，对比远程与本地状态，
//! 驱动状态机并在远程就绪时提交文件下载

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::transition::{transition, Action};
use crate::config::AppConfig;
use crate::debrid::{DebridClient, RemoteTorrentInfo};
use crate::downloader::{sanitize_component, DownloadRequest, DownloadSubmitter};
use crate::storage::{InternalStatus, NewDownload, Torrent, TorrentRepository, TorrentStatus};

/// 同步服务配置
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// 轮询间隔
    pub interval: Duration,
    /// 下载根目录
    pub save_root: PathBuf,
    /// 远程查询连续失败多少次后删除
    pub max_query_failures: u32,
}

impl From<&AppConfig> for MonitorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.scheduler.refresh_interval_secs.max(1)),
            save_root: config.downloader.save_path.clone(),
            max_query_failures: config.scheduler.max_query_failures.max(1),
        }
    }
}

/// 单轮统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub processed: usize,
    pub deleted: usize,
    pub submitted: usize,
}

/// 创建下载的结果
#[derive(Debug, Default)]
struct CreateOutcome {
    submitted: usize,
    skipped: usize,
    failed: usize,
    /// 因停止服务中断，剩余链接留给重启后的恢复流程
    interrupted: bool,
}

/// 种子同步服务
pub struct TorrentMonitor {
    repo: Arc<dyn TorrentRepository>,
    client: Arc<dyn DebridClient>,
    submitter: Arc<dyn DownloadSubmitter>,
    config: MonitorConfig,
    /// 同一时间只允许一轮同步
    tick_lock: tokio::sync::Mutex<()>,
    /// 远程查询连续失败次数（按种子 ID）
    query_failures: Mutex<HashMap<i64, u32>>,
    running: AtomicBool,
    /// stop 之后取消，当前一轮在种子之间检查
    shutdown: CancellationToken,
}

impl TorrentMonitor {
    pub fn new(
        repo: Arc<dyn TorrentRepository>,
        client: Arc<dyn DebridClient>,
        submitter: Arc<dyn DownloadSubmitter>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            repo,
            client,
            submitter,
            config,
            tick_lock: tokio::sync::Mutex::new(()),
            query_failures: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// 启动恢复
    ///
    /// 删除所有未完成的下载记录，并把 downloading 的种子重置为 waiting_for_download；
    /// 重复执行没有副作用。返回被重置的种子数量
    pub fn run_startup_recovery(&self) -> Result<usize> {
        let cleared = self.repo.clear_pending_downloads()?;
        let reset = self.repo.reset_downloading_torrents()?;
        info!(
            "启动恢复完成: 清理未完成下载 {} 条, 重置种子 {} 个",
            cleared, reset
        );
        Ok(reset)
    }

    /// 启动轮询循环，直到调用 stop
    pub async fn start(&self) {
        if self.shutdown.is_cancelled() {
            warn!("种子同步服务已停止，不再启动");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("种子同步服务已在运行");
            return;
        }

        info!("种子同步服务已启动，间隔 {:?}", self.config.interval);

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.cancelled() => {
                    info!("种子同步服务收到停止信号");
                    break;
                }
            }

            match self.tick().await {
                Ok(stats) => debug!("同步完成: {:?}", stats),
                Err(e) => error!("同步失败: {:#}", e),
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("种子同步服务已停止");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    /// 执行一轮同步
    ///
    /// 持有 tick 锁，重叠的调用会等待上一轮结束
    pub async fn tick(&self) -> Result<TickStats> {
        let _guard = self.tick_lock.lock().await;

        let torrents = self.repo.find_not_terminal()?;
        let mut stats = TickStats::default();

        for torrent in torrents {
            if self.shutdown.is_cancelled() {
                info!("同步服务停止中，跳过剩余种子");
                break;
            }
            stats.processed += 1;
            let id = torrent.id;
            if let Err(e) = self.reconcile(torrent, &mut stats).await {
                error!("同步种子 #{} 失败: {:#}", id, e);
            }
        }

        Ok(stats)
    }

    async fn reconcile(&self, mut torrent: Torrent, stats: &mut TickStats) -> Result<()> {
        // 1. 无效记录
        if torrent.rd_id.trim().is_empty() {
            debug!("删除无效种子 #{}（rd_id 为空）", torrent.id);
            self.repo.delete(torrent.id)?;
            stats.deleted += 1;
            return Ok(());
        }

        // 2. 本地下载未结束时不查询远程
        if self.repo.has_pending_downloads(torrent.id)? {
            if !matches!(
                torrent.internal_status,
                InternalStatus::WaitingForDownload | InternalStatus::Downloading
            ) {
                torrent.internal_status = InternalStatus::WaitingForDownload;
                self.repo.save(&torrent)?;
            }
            return Ok(());
        }

        let has_downloads = self.repo.has_downloads(torrent.id)?;

        // 3. 本地下载已全部结束
        if has_downloads && torrent.internal_status == InternalStatus::Downloading {
            if self.repo.all_downloads_complete(torrent.id)? {
                self.repo.mark_torrent_downloaded(torrent.id)?;
                info!("✓ 种子 {} 下载完成", torrent.name);
                return Ok(());
            }
            if self.repo.has_failed_downloads(torrent.id)? {
                torrent.status = TorrentStatus::Error;
                torrent.internal_status = InternalStatus::Error;
                self.repo.save(&torrent)?;
                warn!("✗ 种子 {} 存在下载失败的文件", torrent.name);
                return Ok(());
            }
        }

        let mut dirty = false;

        // 4. 自愈：标记完成却没有任何文件
        if !has_downloads
            && torrent.internal_status == InternalStatus::Downloaded
            && torrent.status == TorrentStatus::Downloaded
        {
            info!("种子 {} 标记为已完成但没有文件，重新等待下载", torrent.rd_id);
            torrent.internal_status = InternalStatus::WaitingForDownload;
            dirty = true;
        }

        // 5. 查询远程
        let info = match self.client.get_torrent_info(&torrent.rd_id).await {
            Ok(info) => {
                self.query_failures.lock().remove(&torrent.id);
                info
            }
            Err(e) if e.is_not_found() => {
                warn!("远程种子 {} 不存在，删除本地记录", torrent.rd_id);
                self.remove_everywhere(&torrent).await?;
                stats.deleted += 1;
                return Ok(());
            }
            Err(e) => {
                let failures = {
                    let mut map = self.query_failures.lock();
                    let count = map.entry(torrent.id).or_insert(0);
                    *count += 1;
                    *count
                };
                if failures >= self.config.max_query_failures {
                    warn!(
                        "远程种子 {} 连续查询失败 {} 次，删除: {}",
                        torrent.rd_id, failures, e
                    );
                    self.remove_everywhere(&torrent).await?;
                    stats.deleted += 1;
                } else {
                    warn!(
                        "查询远程种子 {} 失败 ({}/{}): {}",
                        torrent.rd_id, failures, self.config.max_query_failures, e
                    );
                    if dirty {
                        self.repo.save(&torrent)?;
                    }
                }
                return Ok(());
            }
        };

        // 6. 同步远程元数据
        dirty |= mirror_metadata(&mut torrent, &info);

        // 7. 状态迁移
        let step = transition(info.status, torrent.internal_status);
        dirty |= step.apply(&mut torrent);

        let mut mark_downloaded = false;
        match step.action {
            Action::None => {}
            Action::Accept => {
                info!("接受远程种子 {}（选择全部文件）", torrent.rd_id);
                if let Err(e) = self.client.accept_torrent(&torrent.rd_id).await {
                    warn!("接受远程种子 {} 失败: {}", torrent.rd_id, e);
                }
            }
            Action::Delete => {
                warn!("远程种子 {} 已失效，删除", torrent.rd_id);
                self.remove_everywhere(&torrent).await?;
                stats.deleted += 1;
                return Ok(());
            }
            Action::CreateDownloads => {
                // 先落盘 downloading，完成回调随后写入的 downloaded 不会被覆盖
                let previous = torrent.internal_status;
                torrent.internal_status = InternalStatus::Downloading;
                self.repo.save(&torrent)?;

                let outcome = self.create_downloads(&torrent, &info).await?;
                stats.submitted += outcome.submitted;
                if outcome.submitted > 0 || outcome.interrupted {
                    return Ok(());
                }
                if outcome.failed > 0 {
                    torrent.status = TorrentStatus::Error;
                    torrent.internal_status = InternalStatus::Error;
                    dirty = true;
                } else if outcome.skipped > 0 {
                    mark_downloaded = true;
                    dirty = false;
                } else {
                    // 没有可下载的链接
                    torrent.internal_status = previous;
                    dirty = true;
                }
            }
        }

        if step.stop {
            debug!("种子 {} 远程仍在下载，本轮跳过后续检查", torrent.rd_id);
        }

        // 8. 持久化
        if dirty {
            self.repo.save(&torrent)?;
        }
        if mark_downloaded {
            self.repo.mark_torrent_downloaded(torrent.id)?;
            info!("✓ 种子 {} 的文件均已下载", torrent.name);
        }

        Ok(())
    }

    /// 解析链接并提交下载，跳过已完成的链接
    async fn create_downloads(
        &self,
        torrent: &Torrent,
        info: &RemoteTorrentInfo,
    ) -> Result<CreateOutcome> {
        let completed: HashSet<String> = self
            .repo
            .completed_source_links(torrent.id)?
            .into_iter()
            .collect();
        let save_path = self.save_path_for(torrent);
        let mut outcome = CreateOutcome::default();

        for link in &info.links {
            if self.shutdown.is_cancelled() {
                warn!("同步服务停止中，种子 {} 剩余链接下次再处理", torrent.rd_id);
                outcome.interrupted = true;
                break;
            }
            if completed.contains(link) {
                outcome.skipped += 1;
                continue;
            }

            let resolved = match self.client.resolve_download_link(link).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    error!("解析下载链接失败 {}: {}", link, e);
                    let id = self.repo.create_download(&NewDownload {
                        torrent_id: torrent.id,
                        source_link: link.clone(),
                        file_name: link_file_name(link),
                        file_size: 0,
                        url: String::new(),
                        save_path: save_path.to_string_lossy().to_string(),
                    })?;
                    self.repo.mark_download_failed(id, &e.to_string())?;
                    outcome.failed += 1;
                    continue;
                }
            };

            let file_name = sanitize_component(&resolved.filename).unwrap_or_else(|| {
                warn!("远程文件名不可用 {:?}，改用链接名", resolved.filename);
                link_file_name(link)
            });

            let download_id = self.repo.create_download(&NewDownload {
                torrent_id: torrent.id,
                source_link: link.clone(),
                file_name: file_name.clone(),
                file_size: resolved.file_size,
                url: resolved.url.clone(),
                save_path: save_path.to_string_lossy().to_string(),
            })?;

            info!("开始下载 {}", file_name);

            let request = DownloadRequest {
                download_id,
                url: resolved.url,
                file_name,
                file_size: resolved.file_size,
                save_path: save_path.clone(),
            };

            match self.submitter.submit(request).await {
                Ok(()) => outcome.submitted += 1,
                Err(_) if self.shutdown.is_cancelled() => {
                    warn!("同步服务停止中，下载 #{} 留待下次启动", download_id);
                    outcome.interrupted = true;
                    break;
                }
                Err(e) => {
                    error!("提交下载失败 #{}: {:#}", download_id, e);
                    self.repo.mark_download_failed(download_id, &format!("{:#}", e))?;
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// 文件保存目录：{save_root}/{category}/{name}
    pub fn save_path_for(&self, torrent: &Torrent) -> PathBuf {
        torrent_dir(&self.config.save_root, torrent)
    }

    /// 远程删除失败不影响本地删除
    async fn remove_everywhere(&self, torrent: &Torrent) -> Result<()> {
        if let Err(e) = self.client.delete_torrent(&torrent.rd_id).await {
            warn!("远程删除种子 {} 失败（忽略）: {}", torrent.rd_id, e);
        }
        self.repo.delete(torrent.id)?;
        self.query_failures.lock().remove(&torrent.id);
        Ok(())
    }
}

/// 种子文件目录
///
/// 分类和名称各自收敛为单个路径组件，结果总在 save_root 之下
pub fn torrent_dir(save_root: &std::path::Path, torrent: &Torrent) -> PathBuf {
    let mut path = save_root.to_path_buf();
    if let Some(category) = sanitize_component(&torrent.category) {
        path.push(category);
    }
    let name = sanitize_component(&torrent.name)
        .or_else(|| sanitize_component(&torrent.rd_id))
        .unwrap_or_else(|| format!("torrent-{}", torrent.id));
    path.push(name);
    path
}

/// 从链接末段推导文件名
fn link_file_name(link: &str) -> String {
    link.rsplit('/')
        .find_map(sanitize_component)
        .unwrap_or_else(|| "download".to_string())
}

/// 同步远程元数据，只在有变化时返回 true
fn mirror_metadata(torrent: &mut Torrent, info: &RemoteTorrentInfo) -> bool {
    let mut changed = false;

    if torrent.progress != info.progress {
        torrent.progress = info.progress;
        changed = true;
    }
    if let Some(seeders) = info.seeders {
        if torrent.seeders != seeders {
            torrent.seeders = seeders;
            changed = true;
        }
    }
    if let Some(speed) = info.speed {
        if torrent.speed != speed {
            torrent.speed = speed;
            changed = true;
        }
    }
    if !info.filename.is_empty() && torrent.name != info.filename {
        torrent.name = info.filename.clone();
        changed = true;
    }
    if info.bytes > 0 && torrent.size != info.bytes {
        torrent.size = info.bytes;
        changed = true;
    }
    if !info.hash.is_empty() && torrent.hash != info.hash {
        torrent.hash = info.hash.clone();
        changed = true;
    }
    if torrent.split != info.split {
        torrent.split = info.split;
        changed = true;
    }
    if !info.host.is_empty() && torrent.host != info.host {
        torrent.host = info.host.clone();
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{is_single_component, DownloadHooks, DownloadSnapshot, Progress};
    use crate::monitor::RepositoryHooks;
    use crate::storage::SqliteRepository;
    use crate::test_support::{self, FakeDebrid, RecordingSubmitter, Reply};

    struct Fixture {
        repo: Arc<SqliteRepository>,
        debrid: Arc<FakeDebrid>,
        submitter: Arc<RecordingSubmitter>,
        monitor: Arc<TorrentMonitor>,
    }

    fn build_monitor(
        repo: &Arc<SqliteRepository>,
        debrid: &Arc<FakeDebrid>,
        submitter: Arc<dyn DownloadSubmitter>,
    ) -> Arc<TorrentMonitor> {
        Arc::new(TorrentMonitor::new(
            repo.clone(),
            debrid.clone(),
            submitter,
            MonitorConfig {
                interval: Duration::from_millis(20),
                save_root: PathBuf::from("/data"),
                max_query_failures: 3,
            },
        ))
    }

    fn fixture_with(debrid: FakeDebrid) -> Fixture {
        let repo = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let debrid = Arc::new(debrid);
        let submitter = Arc::new(RecordingSubmitter::default());
        let monitor = build_monitor(&repo, &debrid, submitter.clone());
        Fixture {
            repo,
            debrid,
            submitter,
            monitor,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeDebrid::default())
    }

    fn remote(status: &str, links: &[&str]) -> RemoteTorrentInfo {
        test_support::remote("ABC123", status, links)
    }

    fn insert(repo: &SqliteRepository, rd_id: &str, internal: InternalStatus) -> i64 {
        let mut torrent = Torrent::new(rd_id, "movies");
        torrent.internal_status = internal;
        repo.create_torrent(&torrent).unwrap()
    }

    #[tokio::test]
    async fn test_downloaded_creates_and_submits_downloads() {
        let f = fixture();
        let id = insert(&f.repo, "ABC123", InternalStatus::WaitingForDownload);
        f.debrid.reply(
            "ABC123",
            Reply::Info(remote("downloaded", &["https://rd/d/one", "https://rd/d/two"])),
        );

        let stats = f.monitor.tick().await.unwrap();
        assert_eq!(stats.submitted, 2);

        let downloads = f.repo.list_downloads(id).unwrap();
        assert_eq!(downloads.len(), 2);
        assert!(downloads.iter().all(|d| d.is_pending()));

        let requests = f.submitter.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].download_id, downloads[0].id);
        assert_eq!(requests[0].file_name, "one.mkv");
        assert_eq!(requests[0].save_path, PathBuf::from("/data/movies/Some.Movie"));

        let torrent = f.repo.get_torrent(id).unwrap().unwrap();
        assert_eq!(torrent.status, TorrentStatus::Downloaded);
        assert_eq!(torrent.internal_status, InternalStatus::Downloading);
        assert_eq!(torrent.seeders, 3);
        assert_eq!(torrent.name, "Some.Movie");
    }

    #[tokio::test]
    async fn test_not_found_deletes_even_if_remote_delete_fails() {
        let f = fixture_with(FakeDebrid {
            fail_remote_delete: true,
            ..Default::default()
        });
        let id = insert(&f.repo, "ABC123", InternalStatus::Waiting);
        f.debrid.reply("ABC123", Reply::NotFound);

        let stats = f.monitor.tick().await.unwrap();

        assert_eq!(stats.deleted, 1);
        assert!(f.repo.get_torrent(id).unwrap().is_none());
        assert_eq!(*f.debrid.deleted.lock(), vec!["ABC123".to_string()]);
    }

    #[tokio::test]
    async fn test_transient_failures_delete_after_threshold() {
        let f = fixture();
        let id = insert(&f.repo, "ABC123", InternalStatus::Waiting);
        f.debrid.reply("ABC123", Reply::Transient);

        f.monitor.tick().await.unwrap();
        f.monitor.tick().await.unwrap();
        assert!(f.repo.get_torrent(id).unwrap().is_some());

        // 成功一次后计数清零
        f.debrid.reply("ABC123", Reply::Info(remote("queue", &[])));
        f.monitor.tick().await.unwrap();
        f.debrid.reply("ABC123", Reply::Transient);
        f.monitor.tick().await.unwrap();
        f.monitor.tick().await.unwrap();
        assert!(f.repo.get_torrent(id).unwrap().is_some());

        f.monitor.tick().await.unwrap();
        assert!(f.repo.get_torrent(id).unwrap().is_none());
        assert_eq!(f.debrid.deleted.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_rd_id_is_purged() {
        let f = fixture();
        let id = insert(&f.repo, "", InternalStatus::Waiting);

        let stats = f.monitor.tick().await.unwrap();

        assert_eq!(stats.deleted, 1);
        assert!(f.repo.get_torrent(id).unwrap().is_none());
        assert!(f.debrid.queries.lock().is_empty());
    }

    #[tokio::test]
    async fn test_pending_downloads_skip_remote_query() {
        let f = fixture();
        let id = insert(&f.repo, "ABC123", InternalStatus::Waiting);
        f.repo
            .create_download(&NewDownload {
                torrent_id: id,
                source_link: "l1".to_string(),
                file_name: "a.mkv".to_string(),
                file_size: 10,
                url: String::new(),
                save_path: String::new(),
            })
            .unwrap();

        f.monitor.tick().await.unwrap();

        assert!(f.debrid.queries.lock().is_empty());
        let torrent = f.repo.get_torrent(id).unwrap().unwrap();
        assert_eq!(torrent.internal_status, InternalStatus::WaitingForDownload);
    }

    #[tokio::test]
    async fn test_self_heal_downloaded_without_files() {
        let f = fixture();
        let id = insert(&f.repo, "ABC123", InternalStatus::Waiting);
        f.repo.mark_torrent_downloaded(id).unwrap();
        f.debrid
            .reply("ABC123", Reply::Info(remote("downloaded", &["https://rd/d/one"])));

        f.monitor.tick().await.unwrap();

        assert_eq!(f.submitter.requests.lock().len(), 1);
        let torrent = f.repo.get_torrent(id).unwrap().unwrap();
        assert_eq!(torrent.internal_status, InternalStatus::Downloading);
    }

    #[tokio::test]
    async fn test_recovery_is_idempotent_and_does_not_duplicate() {
        let f = fixture();
        let id = insert(&f.repo, "ABC123", InternalStatus::Downloading);
        let new_row = |link: &str| NewDownload {
            torrent_id: id,
            source_link: link.to_string(),
            file_name: format!("{}.mkv", link),
            file_size: 1000,
            url: String::new(),
            save_path: String::new(),
        };
        let done = f.repo.create_download(&new_row("https://rd/d/one")).unwrap();
        f.repo.create_download(&new_row("https://rd/d/two")).unwrap();
        f.repo.mark_download_complete(done).unwrap();

        // 模拟重启
        assert_eq!(f.monitor.run_startup_recovery().unwrap(), 1);
        assert_eq!(f.monitor.run_startup_recovery().unwrap(), 0);
        let torrent = f.repo.get_torrent(id).unwrap().unwrap();
        assert_eq!(torrent.internal_status, InternalStatus::WaitingForDownload);

        f.debrid.reply(
            "ABC123",
            Reply::Info(remote("downloaded", &["https://rd/d/one", "https://rd/d/two"])),
        );
        f.monitor.tick().await.unwrap();

        // 只重新提交未完成的链接
        let requests = f.submitter.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].file_name, "two.mkv");

        let downloads = f.repo.list_downloads(id).unwrap();
        assert_eq!(downloads.len(), 2);
        assert_eq!(downloads.iter().filter(|d| d.downloaded).count(), 1);
    }

    #[tokio::test]
    async fn test_all_links_already_complete_marks_downloaded() {
        let f = fixture();
        let id = insert(&f.repo, "ABC123", InternalStatus::WaitingForDownload);
        let done = f
            .repo
            .create_download(&NewDownload {
                torrent_id: id,
                source_link: "https://rd/d/one".to_string(),
                file_name: "one.mkv".to_string(),
                file_size: 1000,
                url: String::new(),
                save_path: String::new(),
            })
            .unwrap();
        f.repo.mark_download_complete(done).unwrap();
        f.debrid
            .reply("ABC123", Reply::Info(remote("downloaded", &["https://rd/d/one"])));

        f.monitor.tick().await.unwrap();

        assert!(f.submitter.requests.lock().is_empty());
        let torrent = f.repo.get_torrent(id).unwrap().unwrap();
        assert_eq!(torrent.internal_status, InternalStatus::Downloaded);
    }

    #[tokio::test]
    async fn test_waiting_files_selection_accepts() {
        let f = fixture();
        let id = insert(&f.repo, "ABC123", InternalStatus::Waiting);
        f.debrid
            .reply("ABC123", Reply::Info(remote("waiting_files_selection", &[])));

        f.monitor.tick().await.unwrap();

        assert_eq!(*f.debrid.accepted.lock(), vec!["ABC123".to_string()]);
        let torrent = f.repo.get_torrent(id).unwrap().unwrap();
        assert_eq!(torrent.internal_status, InternalStatus::WaitingForDownload);
    }

    #[tokio::test]
    async fn test_dead_deletes_remote_and_local() {
        let f = fixture();
        let id = insert(&f.repo, "ABC123", InternalStatus::Waiting);
        f.debrid.reply("ABC123", Reply::Info(remote("dead", &[])));

        f.monitor.tick().await.unwrap();

        assert!(f.repo.get_torrent(id).unwrap().is_none());
        assert_eq!(*f.debrid.deleted.lock(), vec!["ABC123".to_string()]);
    }

    #[tokio::test]
    async fn test_finished_downloads_resolve_torrent_state() {
        let f = fixture();
        let ok_id = insert(&f.repo, "OK", InternalStatus::Downloading);
        let bad_id = insert(&f.repo, "BAD", InternalStatus::Downloading);
        for (torrent_id, link) in [(ok_id, "a"), (bad_id, "b")] {
            let d = f
                .repo
                .create_download(&NewDownload {
                    torrent_id,
                    source_link: link.to_string(),
                    file_name: link.to_string(),
                    file_size: 1,
                    url: String::new(),
                    save_path: String::new(),
                })
                .unwrap();
            if torrent_id == ok_id {
                f.repo.mark_download_complete(d).unwrap();
            } else {
                f.repo.mark_download_failed(d, "boom").unwrap();
            }
        }

        f.monitor.tick().await.unwrap();

        assert!(f.debrid.queries.lock().is_empty());
        let ok = f.repo.get_torrent(ok_id).unwrap().unwrap();
        assert_eq!(ok.internal_status, InternalStatus::Downloaded);
        let bad = f.repo.get_torrent(bad_id).unwrap().unwrap();
        assert_eq!(bad.status, TorrentStatus::Error);
        assert_eq!(bad.internal_status, InternalStatus::Error);
    }

    #[tokio::test]
    async fn test_start_and_stop_loop() {
        let f = fixture();
        insert(&f.repo, "ABC123", InternalStatus::Waiting);
        f.debrid.reply("ABC123", Reply::Info(remote("queue", &[])));

        let monitor = f.monitor.clone();
        let handle = tokio::spawn(async move { monitor.start().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.monitor.is_running());
        f.monitor.stop();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("监听循环应及时退出")
            .unwrap();
        assert!(f.debrid.queries.lock().len() >= 2);
    }

    /// 提交总是失败
    struct RejectingSubmitter;

    #[async_trait::async_trait]
    impl DownloadSubmitter for RejectingSubmitter {
        async fn submit(&self, _request: DownloadRequest) -> Result<()> {
            anyhow::bail!("磁盘已满")
        }

        fn cancel(&self, _download_id: i64) -> bool {
            false
        }
    }

    /// 提交时立即触发完成回调，模拟极小文件
    struct InstantSubmitter {
        hooks: RepositoryHooks,
    }

    #[async_trait::async_trait]
    impl DownloadSubmitter for InstantSubmitter {
        async fn submit(&self, request: DownloadRequest) -> Result<()> {
            self.hooks.on_finish(&DownloadSnapshot {
                download_id: request.download_id,
                file_name: request.file_name,
                progress: Progress::default(),
                error: None,
            });
            Ok(())
        }

        fn cancel(&self, _download_id: i64) -> bool {
            false
        }
    }

    /// 槽位已满：一直等到引擎被取消
    #[derive(Default)]
    struct SaturatedSubmitter {
        calls: Mutex<Vec<i64>>,
        engine_cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl DownloadSubmitter for SaturatedSubmitter {
        async fn submit(&self, request: DownloadRequest) -> Result<()> {
            self.calls.lock().push(request.download_id);
            self.engine_cancel.cancelled().await;
            anyhow::bail!("cancelled")
        }

        fn cancel(&self, _download_id: i64) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_failed_downloads_keep_error_across_ticks() {
        let f = fixture();
        let id = insert(&f.repo, "ABC123", InternalStatus::Downloading);
        let d = f
            .repo
            .create_download(&NewDownload {
                torrent_id: id,
                source_link: "https://rd/d/one".to_string(),
                file_name: "one.mkv".to_string(),
                file_size: 1,
                url: String::new(),
                save_path: String::new(),
            })
            .unwrap();
        f.repo.mark_download_failed(d, "boom").unwrap();
        f.debrid
            .reply("ABC123", Reply::Info(remote("downloaded", &["https://rd/d/one"])));

        for _ in 0..3 {
            f.monitor.tick().await.unwrap();
            let torrent = f.repo.get_torrent(id).unwrap().unwrap();
            assert_eq!(torrent.status, TorrentStatus::Error);
            assert_eq!(torrent.internal_status, InternalStatus::Error);
        }
        assert!(f.submitter.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_submits_keep_error_across_ticks() {
        let repo = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let debrid = Arc::new(FakeDebrid::default());
        let monitor = build_monitor(&repo, &debrid, Arc::new(RejectingSubmitter));
        let id = insert(&repo, "ABC123", InternalStatus::WaitingForDownload);
        debrid.reply("ABC123", Reply::Info(remote("downloaded", &["https://rd/d/one"])));

        monitor.tick().await.unwrap();
        monitor.tick().await.unwrap();

        let torrent = repo.get_torrent(id).unwrap().unwrap();
        assert_eq!(torrent.status, TorrentStatus::Error);
        assert_eq!(torrent.internal_status, InternalStatus::Error);
        let downloads = repo.list_downloads(id).unwrap();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].error.as_deref(), Some("磁盘已满"));
    }

    #[tokio::test]
    async fn test_instant_finish_is_not_overwritten() {
        let repo = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let debrid = Arc::new(FakeDebrid::default());
        let submitter = Arc::new(InstantSubmitter {
            hooks: RepositoryHooks::new(repo.clone()),
        });
        let monitor = build_monitor(&repo, &debrid, submitter);
        let id = insert(&repo, "ABC123", InternalStatus::WaitingForDownload);
        debrid.reply("ABC123", Reply::Info(remote("downloaded", &["https://rd/d/one"])));

        let stats = monitor.tick().await.unwrap();
        assert_eq!(stats.submitted, 1);

        let torrent = repo.get_torrent(id).unwrap().unwrap();
        assert_eq!(torrent.status, TorrentStatus::Downloaded);
        assert_eq!(torrent.internal_status, InternalStatus::Downloaded);
        assert_eq!(torrent.name, "Some.Movie");
    }

    #[tokio::test]
    async fn test_stop_interrupts_tick_waiting_for_slot() {
        let repo = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let debrid = Arc::new(FakeDebrid::default());
        let submitter = Arc::new(SaturatedSubmitter::default());
        let monitor = build_monitor(&repo, &debrid, submitter.clone());
        let id = insert(&repo, "ABC123", InternalStatus::WaitingForDownload);
        insert(&repo, "XYZ789", InternalStatus::WaitingForDownload);
        let links = ["https://rd/d/one", "https://rd/d/two"];
        debrid.reply("ABC123", Reply::Info(remote("downloaded", &links)));
        debrid.reply("XYZ789", Reply::Info(test_support::remote("XYZ789", "downloaded", &links)));

        let tick = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.tick().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(submitter.calls.lock().len(), 1);

        monitor.stop();
        submitter.engine_cancel.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(2), tick)
            .await
            .expect("停止后本轮应立即结束")
            .unwrap()
            .unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(submitter.calls.lock().len(), 1);
        assert_eq!(*debrid.queries.lock(), vec!["ABC123".to_string()]);

        // 中断的下载不记为失败，重启恢复会清理
        let torrent = repo.get_torrent(id).unwrap().unwrap();
        assert_eq!(torrent.internal_status, InternalStatus::Downloading);
        let downloads = repo.list_downloads(id).unwrap();
        assert_eq!(downloads.len(), 1);
        assert!(downloads[0].is_pending());

        // 停止后不再启动
        tokio::time::timeout(Duration::from_secs(1), monitor.start())
            .await
            .unwrap();
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_remote_names_cannot_escape_save_root() {
        let f = fixture_with(FakeDebrid {
            resolved_name: Some("../../escaped.bin".to_string()),
            ..Default::default()
        });
        let mut torrent = Torrent::new("ABC123", "../movies");
        torrent.internal_status = InternalStatus::WaitingForDownload;
        let id = f.repo.create_torrent(&torrent).unwrap();
        let mut info = remote("downloaded", &["https://rd/d/one"]);
        info.filename = "../../etc".to_string();
        f.debrid.reply("ABC123", Reply::Info(info));

        f.monitor.tick().await.unwrap();

        let requests = f.submitter.requests.lock();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert!(is_single_component(&request.file_name), "{:?}", request.file_name);
        assert!(request.save_path.starts_with("/data"));
        assert!(request
            .save_path
            .components()
            .all(|c| !matches!(c, std::path::Component::ParentDir)));
        assert_eq!(request.save_path, PathBuf::from("/data/.._movies/.._.._etc"));
        assert_eq!(f.repo.list_downloads(id).unwrap()[0].file_name, request.file_name);
    }

    #[test]
    fn test_torrent_dir() {
        let mut torrent = Torrent::new("ABC123", "");
        assert_eq!(
            torrent_dir(std::path::Path::new("/data"), &torrent),
            PathBuf::from("/data/ABC123")
        );
        torrent.category = "tv".to_string();
        torrent.name = "Show".to_string();
        assert_eq!(
            torrent_dir(std::path::Path::new("/data"), &torrent),
            PathBuf::from("/data/tv/Show")
        );

        torrent.category = "..".to_string();
        torrent.name = "/etc".to_string();
        assert_eq!(
            torrent_dir(std::path::Path::new("/data"), &torrent),
            PathBuf::from("/data/_etc")
        );
        torrent.name = "..".to_string();
        torrent.rd_id = "../x".to_string();
        assert_eq!(
            torrent_dir(std::path::Path::new("/data"), &torrent),
            PathBuf::from("/data/.._x")
        );
    }
}
