// 种子API处理器

use crate::monitor::torrent_dir;
use crate::server::AppState;
use crate::storage::{Download, InternalStatus, Torrent, TorrentStatus};
use axum::{
    extract::{Multipart, Query, State},
    response::{IntoResponse, Json, Response},
    Form,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{fails, ok};

// ============================================
// 响应结构
// ============================================

/// 种子列表项（字段名与 qBittorrent 一致）
#[derive(Debug, Serialize)]
pub struct TorrentInfo {
    pub added_on: i64,
    pub amount_left: i64,
    pub auto_tmm: bool,
    pub availability: f64,
    pub category: String,
    pub completed: i64,
    pub completion_on: i64,
    pub content_path: String,
    pub dl_limit: i64,
    pub dlspeed: i64,
    pub downloaded: i64,
    /// 剩余时间（秒）
    pub eta: i64,
    pub hash: String,
    pub last_activity: i64,
    pub magnet_uri: String,
    pub name: String,
    pub num_complete: i64,
    pub num_seeds: i64,
    pub priority: i64,
    /// 进度 0-1
    pub progress: f64,
    pub ratio: f64,
    pub save_path: String,
    pub size: i64,
    pub state: &'static str,
    pub tags: String,
    pub total_size: i64,
    pub tracker: String,
    pub upspeed: i64,
}

/// 种子属性
#[derive(Debug, Serialize)]
pub struct TorrentProperties {
    pub addition_date: i64,
    pub comment: String,
    pub completion_date: i64,
    pub created_by: String,
    pub creation_date: i64,
    pub dl_limit: i64,
    pub dl_speed: i64,
    pub dl_speed_avg: i64,
    pub eta: i64,
    pub last_seen: i64,
    pub nb_connections: i64,
    pub nb_connections_limit: i64,
    pub peers: i64,
    pub peers_total: i64,
    pub pieces_have: usize,
    pub pieces_num: usize,
    pub piece_size: i64,
    pub save_path: String,
    pub seeding_time: i64,
    pub seeds: i64,
    pub seeds_total: i64,
    pub share_ratio: f64,
    pub time_elapsed: i64,
    pub total_downloaded: i64,
    pub total_size: i64,
    pub total_uploaded: i64,
    pub total_wasted: i64,
    pub up_limit: i64,
    pub up_speed: i64,
}

// ============================================
// 请求参数
// ============================================

#[derive(Debug, Default, Deserialize)]
pub struct InfoParams {
    #[serde(default)]
    pub category: Option<String>,
    /// 以 | 分隔的哈希过滤
    #[serde(default)]
    pub hashes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HashParams {
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub hashes: String,
    #[serde(default, rename = "deleteFiles")]
    pub delete_files: bool,
}

// ============================================
// 状态映射
// ============================================

/// 本地状态映射到 qBittorrent 状态名
pub fn qbittorrent_state(torrent: &Torrent) -> &'static str {
    match (torrent.status, torrent.internal_status) {
        (TorrentStatus::Downloading, _) => "downloading",
        (TorrentStatus::Downloaded, InternalStatus::Downloading) => "downloading",
        (TorrentStatus::Downloaded, InternalStatus::Downloaded) => "pausedUP",
        (TorrentStatus::Error, _) => "error",
        (TorrentStatus::Queued, _) if torrent.seeders == 0 => "stalledDL",
        _ => "paused",
    }
}

/// 对外进度（0-1）
///
/// 远程完成、本地下载中时使用本地文件进度
fn effective_progress(torrent: &Torrent, downloads: &[Download]) -> f64 {
    match (torrent.status, torrent.internal_status) {
        (TorrentStatus::Downloaded, InternalStatus::Downloaded) => 1.0,
        (TorrentStatus::Downloaded, InternalStatus::Downloading) if !downloads.is_empty() => {
            let total: u64 = downloads.iter().map(|d| d.file_size).sum();
            if total == 0 {
                return 0.0;
            }
            let done: u64 = downloads
                .iter()
                .map(|d| if d.downloaded { d.file_size } else { d.downloaded_bytes })
                .sum();
            (done as f64 / total as f64).clamp(0.0, 1.0)
        }
        _ => (torrent.progress / 100.0).clamp(0.0, 1.0),
    }
}

/// 按添加以来的平均速度估算剩余秒数，无法估算时为 0
pub fn estimate_eta(size: i64, progress: f64, elapsed_secs: i64) -> i64 {
    if size <= 0 || progress <= 0.0 || progress >= 1.0 {
        return 0;
    }
    let done = size as f64 * progress;
    let speed = done / elapsed_secs.max(1) as f64;
    if speed <= 0.0 {
        return 0;
    }
    ((size as f64 - done) / speed).round() as i64
}

fn public_hash(torrent: &Torrent) -> String {
    if torrent.hash.is_empty() {
        torrent.rd_id.to_lowercase()
    } else {
        torrent.hash.to_lowercase()
    }
}

fn build_info(state: &AppState, torrent: &Torrent, downloads: &[Download], now: i64) -> TorrentInfo {
    let progress = effective_progress(torrent, downloads);
    let state_name = qbittorrent_state(torrent);
    let size = torrent.size.max(0);
    let completed = (size as f64 * progress) as i64;

    TorrentInfo {
        added_on: torrent.created_at,
        amount_left: size - completed,
        auto_tmm: false,
        availability: 0.0,
        category: torrent.category.clone(),
        completed,
        completion_on: if state_name == "pausedUP" { torrent.updated_at } else { 0 },
        content_path: torrent_dir(&state.save_root(), torrent)
            .to_string_lossy()
            .to_string(),
        dl_limit: -1,
        dlspeed: torrent.speed,
        downloaded: completed,
        eta: estimate_eta(size, progress, now - torrent.created_at),
        hash: public_hash(torrent),
        last_activity: torrent.updated_at,
        magnet_uri: String::new(),
        name: torrent.name.clone(),
        num_complete: torrent.seeders,
        num_seeds: torrent.seeders,
        priority: 0,
        progress,
        ratio: 0.0,
        save_path: state
            .category_dir(&torrent.category)
            .to_string_lossy()
            .to_string(),
        size,
        state: state_name,
        tags: String::new(),
        total_size: size,
        tracker: String::new(),
        upspeed: 0,
    }
}

// ============================================
// 查询
// ============================================

/// GET /api/v2/torrents/info?category=xxx
pub async fn torrents_info_query(State(state): State<AppState>, Query(params): Query<InfoParams>) -> Response {
    torrents_info(&state, &params)
}

/// POST /api/v2/torrents/info
pub async fn torrents_info_form(State(state): State<AppState>, Form(params): Form<InfoParams>) -> Response {
    torrents_info(&state, &params)
}

fn torrents_info(state: &AppState, params: &InfoParams) -> Response {
    let category = params.category.as_deref().unwrap_or("");
    let torrents = match state.repo.find_by_category(category) {
        Ok(torrents) => torrents,
        Err(e) => {
            error!("查询种子列表失败: {:#}", e);
            return fails();
        }
    };

    let filter: Option<Vec<String>> = params
        .hashes
        .as_deref()
        .filter(|h| !h.is_empty() && *h != "all")
        .map(|h| h.split('|').map(|s| s.to_lowercase()).collect());

    let now = chrono::Utc::now().timestamp();
    let mut infos = Vec::with_capacity(torrents.len());
    for torrent in &torrents {
        if let Some(filter) = &filter {
            let hash = public_hash(torrent);
            let rd_id = torrent.rd_id.to_lowercase();
            if !filter.iter().any(|h| *h == hash || *h == rd_id) {
                continue;
            }
        }
        let downloads = match state.repo.list_downloads(torrent.id) {
            Ok(downloads) => downloads,
            Err(e) => {
                error!("查询种子 #{} 的下载记录失败: {:#}", torrent.id, e);
                return fails();
            }
        };
        infos.push(build_info(state, torrent, &downloads, now));
    }

    Json(infos).into_response()
}

/// GET /api/v2/torrents/properties?hash=xxx
pub async fn properties_query(State(state): State<AppState>, Query(params): Query<HashParams>) -> Response {
    properties(&state, &params.hash)
}

/// POST /api/v2/torrents/properties
pub async fn properties_form(State(state): State<AppState>, Form(params): Form<HashParams>) -> Response {
    properties(&state, &params.hash)
}

fn properties(state: &AppState, hash: &str) -> Response {
    let Some((torrent, downloads)) = lookup(state, hash) else {
        return fails();
    };

    let now = chrono::Utc::now().timestamp();
    let progress = effective_progress(&torrent, &downloads);
    let done = downloads.iter().filter(|d| d.downloaded).count();

    Json(TorrentProperties {
        addition_date: torrent.created_at,
        comment: "qbrdt".to_string(),
        completion_date: if qbittorrent_state(&torrent) == "pausedUP" {
            torrent.updated_at
        } else {
            -1
        },
        created_by: "qbrdt".to_string(),
        creation_date: torrent.created_at,
        dl_limit: -1,
        dl_speed: torrent.speed,
        dl_speed_avg: torrent.speed,
        eta: estimate_eta(torrent.size, progress, now - torrent.created_at),
        last_seen: torrent.updated_at,
        nb_connections: 0,
        nb_connections_limit: 100,
        peers: torrent.seeders,
        peers_total: torrent.seeders,
        pieces_have: done,
        pieces_num: downloads.len(),
        piece_size: 0,
        save_path: state
            .category_dir(&torrent.category)
            .to_string_lossy()
            .to_string(),
        seeding_time: 0,
        seeds: torrent.seeders,
        seeds_total: torrent.seeders,
        share_ratio: 0.0,
        time_elapsed: (now - torrent.created_at).max(0),
        total_downloaded: (torrent.size as f64 * progress) as i64,
        total_size: torrent.size,
        total_uploaded: 0,
        total_wasted: 0,
        up_limit: -1,
        up_speed: 0,
    })
    .into_response()
}

fn lookup(state: &AppState, hash: &str) -> Option<(Torrent, Vec<Download>)> {
    if hash.is_empty() {
        return None;
    }
    let torrent = match state.repo.find_by_hash(hash) {
        Ok(Some(torrent)) => torrent,
        Ok(None) => {
            warn!("种子不存在: {}", hash);
            return None;
        }
        Err(e) => {
            error!("查询种子失败 {}: {:#}", hash, e);
            return None;
        }
    };
    match state.repo.list_downloads(torrent.id) {
        Ok(downloads) => Some((torrent, downloads)),
        Err(e) => {
            error!("查询种子 #{} 的下载记录失败: {:#}", torrent.id, e);
            None
        }
    }
}

// ============================================
// 添加
// ============================================

/// 待添加的来源
enum Source {
    Magnet(String),
    File(Vec<u8>),
}

/// POST /api/v2/torrents/add
///
/// multipart 字段：urls（换行分隔的磁力链接）、torrents（种子文件）、category
pub async fn add_torrents(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut sources = Vec::new();
    let mut category = String::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                error!("解析表单失败: {}", e);
                return fails();
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "urls" => match field.text().await {
                Ok(text) => {
                    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                        if line.starts_with("magnet:") {
                            sources.push(Source::Magnet(line.to_string()));
                        } else {
                            warn!("不支持的链接，已忽略: {}", line);
                        }
                    }
                }
                Err(e) => {
                    error!("读取 urls 字段失败: {}", e);
                    return fails();
                }
            },
            "torrents" => match field.bytes().await {
                Ok(bytes) => sources.push(Source::File(bytes.to_vec())),
                Err(e) => {
                    error!("读取种子文件失败: {}", e);
                    return fails();
                }
            },
            "category" => match field.text().await {
                Ok(text) => category = text.trim().to_string(),
                Err(e) => {
                    error!("读取 category 字段失败: {}", e);
                    return fails();
                }
            },
            // 其余字段（savepath、paused 等）忽略
            _ => {}
        }
    }

    if sources.is_empty() {
        warn!("添加种子: 没有可用的磁力链接或种子文件");
        return fails();
    }

    for source in sources {
        if let Err(e) = add_one(&state, source, &category).await {
            error!("添加种子失败: {:#}", e);
            return fails();
        }
    }

    ok()
}

async fn add_one(state: &AppState, source: Source, category: &str) -> anyhow::Result<()> {
    let added = match source {
        Source::Magnet(magnet) => state.debrid.add_magnet(&magnet).await?,
        Source::File(content) => state.debrid.add_torrent_file(content).await?,
    };

    if state.repo.find_by_external_id(&added.id)?.is_some() {
        info!("种子 {} 已存在，跳过", added.id);
        return Ok(());
    }

    let remote = state.debrid.get_torrent_info(&added.id).await?;

    let mut torrent = Torrent::new(added.id.clone(), category);
    torrent.status = TorrentStatus::Downloading;
    torrent.name = remote.filename;
    torrent.hash = remote.hash;
    torrent.size = remote.bytes;
    torrent.split = remote.split;
    torrent.host = remote.host;
    torrent.progress = remote.progress;
    torrent.speed = remote.speed.unwrap_or(0);
    torrent.seeders = remote.seeders.unwrap_or(0);

    let id = state.repo.create_torrent(&torrent)?;
    info!("✓ 添加种子 #{}: {} ({})", id, torrent.name, added.id);
    Ok(())
}

// ============================================
// 删除
// ============================================

/// GET /api/v2/torrents/delete?hashes=a|b&deleteFiles=true
pub async fn delete_query(State(state): State<AppState>, Query(params): Query<DeleteParams>) -> Response {
    delete_torrents(&state, &params).await
}

/// POST /api/v2/torrents/delete
pub async fn delete_form(State(state): State<AppState>, Form(params): Form<DeleteParams>) -> Response {
    delete_torrents(&state, &params).await
}

async fn delete_torrents(state: &AppState, params: &DeleteParams) -> Response {
    if params.hashes.is_empty() {
        return fails();
    }

    let targets: Vec<Torrent> = if params.hashes == "all" {
        match state.repo.find_by_category("") {
            Ok(torrents) => torrents,
            Err(e) => {
                error!("查询种子列表失败: {:#}", e);
                return fails();
            }
        }
    } else {
        let mut targets = Vec::new();
        for hash in params.hashes.split('|').filter(|h| !h.is_empty()) {
            match state.repo.find_by_hash(hash) {
                Ok(Some(torrent)) => targets.push(torrent),
                Ok(None) => {
                    warn!("删除种子: {} 不存在", hash);
                    return fails();
                }
                Err(e) => {
                    error!("查询种子失败 {}: {:#}", hash, e);
                    return fails();
                }
            }
        }
        targets
    };

    for torrent in targets {
        if let Err(e) = delete_one(state, &torrent, params.delete_files).await {
            error!("删除种子 {} 失败: {:#}", torrent.rd_id, e);
            return fails();
        }
    }

    ok()
}

async fn delete_one(state: &AppState, torrent: &Torrent, delete_files: bool) -> anyhow::Result<()> {
    // 先取消进行中的下载
    for download in state.repo.list_downloads(torrent.id)? {
        if download.is_pending() && state.downloads.cancel(download.id) {
            info!("已取消下载 #{}: {}", download.id, download.file_name);
        }
    }

    if delete_files {
        let dir = torrent_dir(&state.save_root(), torrent);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => info!("已删除文件目录: {:?}", dir),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!("删除目录失败: {:?}", dir)));
            }
        }
    }

    if let Err(e) = state.debrid.delete_torrent(&torrent.rd_id).await {
        warn!("远程删除种子 {} 失败（忽略）: {}", torrent.rd_id, e);
    }

    state.repo.delete(torrent.id)?;
    info!("✓ 删除种子: {} ({})", torrent.name, torrent.rd_id);
    Ok(())
}
