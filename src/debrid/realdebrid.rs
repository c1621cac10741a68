// Real-Debrid REST 客户端

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::types::{AddedTorrent, RawTorrentInfo, RawUnrestrictedLink};
use super::{DebridClient, DebridError, DebridResult, RemoteTorrentInfo, ResolvedLink};
use crate::config::RealDebridConfig;

/// Real-Debrid 客户端
#[derive(Debug, Clone)]
pub struct RealDebridClient {
    client: Client,
    api_base: String,
    token: String,
}

impl RealDebridClient {
    pub fn new(config: &RealDebridConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(15))
            .build()
            .context("创建 Real-Debrid HTTP 客户端失败")?;

        if config.token.is_empty() {
            tracing::warn!("⚠️ 未配置 Real-Debrid Token，远程请求将返回认证失败");
        }

        info!("Real-Debrid 客户端初始化完成: {}", config.api_base);

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// 按状态码分类错误
    async fn check(resp: Response, resource: &str) -> DebridResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(DebridError::NotFound(resource.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(DebridError::Unauthorized(message))
            }
            _ => Err(DebridError::Http {
                status: status.as_u16(),
                message,
            }),
        }
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> DebridResult<T> {
        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| DebridError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DebridClient for RealDebridClient {
    async fn get_torrent_info(&self, rd_id: &str) -> DebridResult<RemoteTorrentInfo> {
        let resp = self
            .client
            .get(self.url(&format!("/torrents/info/{}", rd_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let resp = Self::check(resp, rd_id).await?;
        let raw: RawTorrentInfo = Self::decode(resp).await?;
        debug!("远程种子 {} 状态: {}", rd_id, raw.status);
        Ok(raw.into())
    }

    async fn accept_torrent(&self, rd_id: &str) -> DebridResult<()> {
        let resp = self
            .client
            .post(self.url(&format!("/torrents/selectFiles/{}", rd_id)))
            .bearer_auth(&self.token)
            .form(&[("files", "all")])
            .send()
            .await?;
        Self::check(resp, rd_id).await?;
        Ok(())
    }

    async fn delete_torrent(&self, rd_id: &str) -> DebridResult<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/torrents/delete/{}", rd_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(resp, rd_id).await?;
        Ok(())
    }

    async fn resolve_download_link(&self, link: &str) -> DebridResult<ResolvedLink> {
        let resp = self
            .client
            .post(self.url("/unrestrict/link"))
            .bearer_auth(&self.token)
            .form(&[("link", link)])
            .send()
            .await?;
        let resp = Self::check(resp, link).await?;
        let raw: RawUnrestrictedLink = Self::decode(resp).await?;
        Ok(raw.into())
    }

    async fn add_magnet(&self, magnet: &str) -> DebridResult<AddedTorrent> {
        let resp = self
            .client
            .post(self.url("/torrents/addMagnet"))
            .bearer_auth(&self.token)
            .form(&[("magnet", magnet)])
            .send()
            .await?;
        let resp = Self::check(resp, "addMagnet").await?;
        Self::decode(resp).await
    }

    async fn add_torrent_file(&self, content: Vec<u8>) -> DebridResult<AddedTorrent> {
        let resp = self
            .client
            .put(self.url("/torrents/addTorrent"))
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/x-bittorrent")
            .body(content)
            .send()
            .await?;
        let resp = Self::check(resp, "addTorrent").await?;
        Self::decode(resp).await
    }
}
