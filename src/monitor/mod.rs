// 种子同步模块

pub mod hooks;
pub mod torrent_monitor;
pub mod transition;

pub use hooks::RepositoryHooks;
pub use torrent_monitor::{torrent_dir, MonitorConfig, TickStats, TorrentMonitor};
pub use transition::{transition, Action, Transition};
