// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

/// 默认配置文件路径（可通过 CONFIG_FILE 环境变量覆盖）
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
///
/// 启动时构造一次，之后以引用或克隆的形式传入各个组件，运行期间不会被修改
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// Real-Debrid 配置
    #[serde(default)]
    pub realdebrid: RealDebridConfig,
    /// 下载配置
    #[serde(default)]
    pub downloader: DownloaderConfig,
    /// 同步调度配置
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置（qBittorrent 兼容接口）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 登录用户名
    #[serde(default = "default_username")]
    pub username: String,
    /// 登录密码
    #[serde(default = "default_password")]
    pub password: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "adminadmin".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
        }
    }
}

/// Real-Debrid 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealDebridConfig {
    /// API Token
    #[serde(default)]
    pub token: String,
    /// API 地址
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    "https://api.real-debrid.com/rest/1.0".to_string()
}

impl Default for RealDebridConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: default_api_base(),
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// 下载根目录，实际文件保存在 {save_path}/{category}/{name}
    #[serde(default = "default_save_path")]
    pub save_path: PathBuf,
    /// 单文件分片数（并发 Range 请求数）
    #[serde(default = "default_chunk_count")]
    pub chunk_count: usize,
    /// 单分片限速（KB/s），0 表示不限速
    #[serde(default)]
    pub speed_limit_kbps: u64,
    /// 同时进行的文件下载数上限
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
}

fn default_save_path() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_chunk_count() -> usize {
    4
}

fn default_max_concurrent_downloads() -> usize {
    2
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            save_path: default_save_path(),
            chunk_count: default_chunk_count(),
            speed_limit_kbps: 0,
            max_concurrent_downloads: default_max_concurrent_downloads(),
        }
    }
}

/// 同步调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 轮询间隔（秒）
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// 远程查询连续失败多少次后删除本地记录
    #[serde(default = "default_max_query_failures")]
    pub max_query_failures: u32,
}

fn default_refresh_interval_secs() -> u64 {
    10
}

fn default_max_query_failures() -> u32 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            max_query_failures: default_max_query_failures(),
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("config/qbrdt.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 配置文件路径：优先读取 CONFIG_FILE 环境变量
    pub fn config_path() -> String {
        std::env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("读取配置文件失败")?;

        let config: AppConfig = toml::from_str(&content).context("解析配置文件失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("创建配置目录失败")?;
            }
        }

        fs::write(path, content)
            .await
            .context("写入配置文件失败")?;

        info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                if let Err(e) = default_config.save_to_file(path).await {
                    warn!("保存默认配置失败: {:#}", e);
                }

                default_config
            }
        }
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// 使用给定的查找函数应用覆盖项，便于测试时不依赖进程环境
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("REALDEBRID_TOKEN") {
            self.realdebrid.token = token;
        }
        if let Some(username) = lookup("QB_USERNAME") {
            self.server.username = username;
        }
        if let Some(password) = lookup("QB_PASSWORD") {
            self.server.password = password;
        }
        if let Some(path) = lookup("DOWNLOADER_SAVE_PATH") {
            self.downloader.save_path = PathBuf::from(path);
        }

        override_number(&lookup, "QB_PORT", &mut self.server.port);
        override_number(&lookup, "DOWNLOADER_CHUNK", &mut self.downloader.chunk_count);
        override_number(
            &lookup,
            "DOWNLOADER_SPEED_LIMIT",
            &mut self.downloader.speed_limit_kbps,
        );
        override_number(
            &lookup,
            "DOWNLOADER_MAX_DOWNLOADS",
            &mut self.downloader.max_concurrent_downloads,
        );
        override_number(
            &lookup,
            "REFRESH_INTERVAL",
            &mut self.scheduler.refresh_interval_secs,
        );
    }

    /// 校验配置取值范围
    pub fn validate(&self) -> Result<()> {
        if self.downloader.chunk_count < 1 {
            anyhow::bail!("downloader.chunk_count 必须大于等于 1");
        }
        if self.downloader.max_concurrent_downloads < 1 {
            anyhow::bail!("downloader.max_concurrent_downloads 必须大于等于 1");
        }
        if self.scheduler.refresh_interval_secs < 1 {
            anyhow::bail!("scheduler.refresh_interval_secs 必须大于等于 1");
        }
        if self.scheduler.max_query_failures < 1 {
            anyhow::bail!("scheduler.max_query_failures 必须大于等于 1");
        }
        Ok(())
    }
}

fn override_number<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!("环境变量 {} 的值无效，已忽略: {}", key, raw),
        }
    }
}
