//! SQLite 仓库实现

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use super::models::{Download, InternalStatus, NewDownload, Torrent, TorrentStatus};
use super::TorrentRepository;

const TORRENT_COLUMNS: &str = "id, rd_id, hash, name, category, status, internal_status, \
     progress, size, speed, seeders, split, host, created_at, updated_at";

const DOWNLOAD_COLUMNS: &str = "id, torrent_id, source_link, file_name, file_size, url, \
     save_path, downloaded, downloaded_bytes, progress, error";

/// SQLite 种子仓库
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// 打开（或创建）数据库文件
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("创建数据库目录失败")?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("打开数据库失败: {:?}", db_path))?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_tables()?;

        info!("数据库已打开: {:?}", db_path);
        Ok(repo)
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory() -> Result<Self> {
        let repo = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        repo.init_tables()?;
        Ok(repo)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("获取数据库锁失败: {}", e))
    }

    fn init_tables(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS torrents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rd_id TEXT NOT NULL UNIQUE,
                hash TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                internal_status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                size INTEGER NOT NULL DEFAULT 0,
                speed INTEGER NOT NULL DEFAULT 0,
                seeders INTEGER NOT NULL DEFAULT 0,
                split INTEGER NOT NULL DEFAULT 0,
                host TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                torrent_id INTEGER NOT NULL REFERENCES torrents(id) ON DELETE CASCADE,
                source_link TEXT NOT NULL DEFAULT '',
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                url TEXT NOT NULL,
                save_path TEXT NOT NULL,
                downloaded INTEGER NOT NULL DEFAULT 0,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                progress REAL NOT NULL DEFAULT 0,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_downloads_torrent ON downloads(torrent_id, downloaded);
            CREATE INDEX IF NOT EXISTS idx_torrents_internal ON torrents(internal_status);
            "#,
        )?;

        Ok(())
    }

    fn map_torrent(row: &Row<'_>) -> rusqlite::Result<Torrent> {
        let status: String = row.get(5)?;
        let internal: String = row.get(6)?;
        Ok(Torrent {
            id: row.get(0)?,
            rd_id: row.get(1)?,
            hash: row.get(2)?,
            name: row.get(3)?,
            category: row.get(4)?,
            status: TorrentStatus::from_db(&status),
            internal_status: InternalStatus::from_db(&internal),
            progress: row.get(7)?,
            size: row.get(8)?,
            speed: row.get(9)?,
            seeders: row.get(10)?,
            split: row.get(11)?,
            host: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn map_download(row: &Row<'_>) -> rusqlite::Result<Download> {
        let file_size: i64 = row.get(4)?;
        let downloaded: i64 = row.get(7)?;
        let downloaded_bytes: i64 = row.get(8)?;
        Ok(Download {
            id: row.get(0)?,
            torrent_id: row.get(1)?,
            source_link: row.get(2)?,
            file_name: row.get(3)?,
            file_size: file_size.max(0) as u64,
            url: row.get(5)?,
            save_path: row.get(6)?,
            downloaded: downloaded != 0,
            downloaded_bytes: downloaded_bytes.max(0) as u64,
            progress: row.get(9)?,
            error: row.get(10)?,
        })
    }

    fn query_torrents(&self, where_clause: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Torrent>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM torrents t {} ORDER BY id",
            TORRENT_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, Self::map_torrent)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn query_one_torrent(&self, where_clause: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Option<Torrent>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM torrents t {} LIMIT 1",
            TORRENT_COLUMNS, where_clause
        );
        let torrent = conn
            .query_row(&sql, args, Self::map_torrent)
            .optional()?;
        Ok(torrent)
    }

    fn exists(&self, sql: &str, torrent_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let found: bool = conn.query_row(sql, params![torrent_id], |row| row.get(0))?;
        Ok(found)
    }
}

impl TorrentRepository for SqliteRepository {
    fn find_not_terminal(&self) -> Result<Vec<Torrent>> {
        self.query_torrents(
            "WHERE t.internal_status != 'downloaded' \
             OR NOT EXISTS (SELECT 1 FROM downloads d WHERE d.torrent_id = t.id)",
            &[],
        )
    }

    fn find_by_external_id(&self, rd_id: &str) -> Result<Option<Torrent>> {
        self.query_one_torrent("WHERE t.rd_id = ?1", &[&rd_id])
    }

    fn find_by_hash(&self, hash: &str) -> Result<Option<Torrent>> {
        self.query_one_torrent(
            "WHERE UPPER(t.hash) = UPPER(?1) OR UPPER(t.rd_id) = UPPER(?1)",
            &[&hash],
        )
    }

    fn find_by_category(&self, category: &str) -> Result<Vec<Torrent>> {
        if category.is_empty() {
            self.query_torrents("", &[])
        } else {
            self.query_torrents("WHERE t.category = ?1", &[&category])
        }
    }

    fn get_torrent(&self, id: i64) -> Result<Option<Torrent>> {
        self.query_one_torrent("WHERE t.id = ?1", &[&id])
    }

    fn create_torrent(&self, torrent: &Torrent) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO torrents (
                rd_id, hash, name, category, status, internal_status,
                progress, size, speed, seeders, split, host, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                torrent.rd_id,
                torrent.hash,
                torrent.name,
                torrent.category,
                torrent.status.as_str(),
                torrent.internal_status.as_str(),
                torrent.progress,
                torrent.size,
                torrent.speed,
                torrent.seeders,
                torrent.split,
                torrent.host,
                torrent.created_at,
                torrent.updated_at,
            ],
        )
        .with_context(|| format!("创建种子记录失败: {}", torrent.rd_id))?;
        Ok(conn.last_insert_rowid())
    }

    fn save(&self, torrent: &Torrent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE torrents SET
                rd_id = ?2, hash = ?3, name = ?4, category = ?5, status = ?6,
                internal_status = ?7, progress = ?8, size = ?9, speed = ?10,
                seeders = ?11, split = ?12, host = ?13, updated_at = ?14
            WHERE id = ?1
            "#,
            params![
                torrent.id,
                torrent.rd_id,
                torrent.hash,
                torrent.name,
                torrent.category,
                torrent.status.as_str(),
                torrent.internal_status.as_str(),
                torrent.progress,
                torrent.size,
                torrent.speed,
                torrent.seeders,
                torrent.split,
                torrent.host,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM torrents WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn has_downloads(&self, torrent_id: i64) -> Result<bool> {
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM downloads WHERE torrent_id = ?1)",
            torrent_id,
        )
    }

    fn has_pending_downloads(&self, torrent_id: i64) -> Result<bool> {
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM downloads \
             WHERE torrent_id = ?1 AND downloaded = 0 AND error IS NULL)",
            torrent_id,
        )
    }

    fn has_failed_downloads(&self, torrent_id: i64) -> Result<bool> {
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM downloads \
             WHERE torrent_id = ?1 AND downloaded = 0 AND error IS NOT NULL)",
            torrent_id,
        )
    }

    fn all_downloads_complete(&self, torrent_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let (total, done): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(downloaded), 0) FROM downloads WHERE torrent_id = ?1",
            params![torrent_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(total > 0 && total == done)
    }

    fn list_downloads(&self, torrent_id: i64) -> Result<Vec<Download>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM downloads WHERE torrent_id = ?1 ORDER BY id",
            DOWNLOAD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![torrent_id], Self::map_download)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn get_download(&self, id: i64) -> Result<Option<Download>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM downloads WHERE id = ?1", DOWNLOAD_COLUMNS);
        let download = conn
            .query_row(&sql, params![id], Self::map_download)
            .optional()?;
        Ok(download)
    }

    fn completed_source_links(&self, torrent_id: i64) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_link FROM downloads WHERE torrent_id = ?1 AND downloaded = 1",
        )?;
        let links = stmt
            .query_map(params![torrent_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(links)
    }

    fn create_download(&self, download: &NewDownload) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO downloads (torrent_id, source_link, file_name, file_size, url, save_path)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                download.torrent_id,
                download.source_link,
                download.file_name,
                download.file_size as i64,
                download.url,
                download.save_path,
            ],
        )
        .with_context(|| format!("创建下载记录失败: {}", download.file_name))?;
        Ok(conn.last_insert_rowid())
    }

    fn update_download_progress(&self, id: i64, downloaded_bytes: u64, progress: f64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE downloads SET downloaded_bytes = ?2, progress = ?3 WHERE id = ?1 AND downloaded = 0",
            params![id, downloaded_bytes as i64, progress],
        )?;
        Ok(())
    }

    fn mark_download_complete(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE downloads SET downloaded = 1, progress = 100, downloaded_bytes = file_size, error = NULL \
             WHERE id = ?1 AND downloaded = 0",
            params![id],
        )?;
        Ok(changed > 0)
    }

    fn mark_download_failed(&self, id: i64, error: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE downloads SET error = ?2 WHERE id = ?1 AND downloaded = 0",
            params![id, error],
        )?;
        Ok(())
    }

    fn mark_torrent_downloaded(&self, torrent_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE torrents SET status = ?2, internal_status = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                torrent_id,
                TorrentStatus::Downloaded.as_str(),
                InternalStatus::Downloaded.as_str(),
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    fn clear_pending_downloads(&self) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM downloads WHERE downloaded = 0", [])?;
        Ok(removed)
    }

    fn reset_downloading_torrents(&self) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE torrents SET internal_status = ?1 WHERE internal_status = ?2",
            params![
                InternalStatus::WaitingForDownload.as_str(),
                InternalStatus::Downloading.as_str(),
            ],
        )?;
        Ok(changed)
    }
}
