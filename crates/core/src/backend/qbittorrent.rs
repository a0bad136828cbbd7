//! qBittorrent WebUI backend implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::QbConfig;

use super::{Backend, BackendError, GlobalStats, Transfer, TransferFile, TransferStatus};

/// qBittorrent backend implementation.
pub struct QbBackend {
    client: Client,
    config: QbConfig,
    /// Set once a login succeeded; cleared when the session expires.
    session: RwLock<bool>,
}

impl QbBackend {
    /// Connect to the WebUI and verify it answers.
    pub async fn connect(config: QbConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .cookie_store(true)
            .build()
            .expect("Failed to create HTTP client");

        let backend = Self {
            client,
            config,
            session: RwLock::new(false),
        };

        backend.ensure_authenticated().await?;
        let version = backend.get("/api/v2/app/version").await?;
        debug!(version = %version.trim(), "Connected to qBittorrent");

        Ok(backend)
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    /// Login and mark the cookie session as live. Skipped entirely when no
    /// username is configured (WebUI with local auth bypass).
    async fn login(&self) -> Result<(), BackendError> {
        let Some(username) = self.config.username.as_deref() else {
            let mut session = self.session.write().await;
            *session = true;
            return Ok(());
        };
        let password = self.config.password.as_deref().unwrap_or_default();

        let url = format!("{}/api/v2/auth/login", self.base_url());
        let params = [("username", username), ("password", password)];

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if body.contains("Ok.") {
            debug!("qBittorrent login successful");
            // Session cookie is held by the cookie jar.
            let mut session = self.session.write().await;
            *session = true;
            Ok(())
        } else if body.contains("Fails.") || status.as_u16() == 403 {
            Err(BackendError::Auth("Invalid credentials".to_string()))
        } else {
            Err(BackendError::Auth(format!(
                "Unexpected login response: {}",
                body.chars().take(100).collect::<String>()
            )))
        }
    }

    async fn ensure_authenticated(&self) -> Result<(), BackendError> {
        if *self.session.read().await {
            return Ok(());
        }
        self.login().await
    }

    /// Make an authenticated GET request, re-logging-in once on 403.
    async fn get(&self, endpoint: &str) -> Result<String, BackendError> {
        self.ensure_authenticated().await?;

        let url = format!("{}{}", self.base_url(), endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status().as_u16() == 403 {
            warn!("qBittorrent session expired, re-authenticating");
            {
                let mut session = self.session.write().await;
                *session = false;
            }
            self.login().await?;

            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            return read_body(response).await;
        }

        read_body(response).await
    }

    /// Make an authenticated POST request with form data, re-logging-in once
    /// on 403.
    async fn post_form(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<String, BackendError> {
        self.ensure_authenticated().await?;

        let url = format!("{}{}", self.base_url(), endpoint);
        let response = self
            .client
            .post(&url)
            .form(params)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status().as_u16() == 403 {
            warn!("qBittorrent session expired, re-authenticating");
            {
                let mut session = self.session.write().await;
                *session = false;
            }
            self.login().await?;

            let response = self
                .client
                .post(&url)
                .form(params)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            return read_body(response).await;
        }

        read_body(response).await
    }

    async fn list_filtered(
        &self,
        filter: &str,
        window: Option<(u32, u32)>,
    ) -> Result<Vec<Transfer>, BackendError> {
        let mut endpoint = format!("/api/v2/torrents/info?filter={}", filter);
        if let Some((offset, count)) = window {
            endpoint.push_str(&format!("&offset={}&limit={}", offset, count));
        }
        let response = self.get(&endpoint).await?;
        let torrents: Vec<QbTorrentInfo> = serde_json::from_str(&response)
            .map_err(|e| BackendError::Rpc(format!("Failed to parse response: {}", e)))?;
        Ok(torrents.into_iter().map(|t| t.into_transfer()).collect())
    }
}

fn map_reqwest_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else if e.is_connect() {
        BackendError::Connection(e.to_string())
    } else {
        BackendError::Transport(e.to_string())
    }
}

async fn read_body(response: reqwest::Response) -> Result<String, BackendError> {
    let status = response.status();
    if status.as_u16() == 403 {
        return Err(BackendError::Auth(format!("HTTP {}", status)));
    }
    if !status.is_success() {
        return Err(BackendError::Rpc(format!("HTTP {}", status)));
    }
    response
        .text()
        .await
        .map_err(|e| BackendError::Transport(e.to_string()))
}

/// qBittorrent torrent info response (subset).
#[derive(Debug, Deserialize)]
struct QbTorrentInfo {
    hash: String,
    name: String,
    state: String,
    size: i64,
    downloaded: i64,
    dlspeed: i64,
    upspeed: i64,
    save_path: String,
}

impl QbTorrentInfo {
    fn into_transfer(self) -> Transfer {
        Transfer {
            id: self.hash.to_lowercase(),
            status: parse_qb_state(&self.state),
            metadata_name: if self.name.is_empty() {
                None
            } else {
                Some(self.name)
            },
            // The info endpoint does not carry the file list.
            files: Vec::new(),
            save_dir: self.save_path,
            total_bytes: self.size.max(0) as u64,
            completed_bytes: self.downloaded.max(0) as u64,
            download_speed: self.dlspeed.max(0) as u64,
            upload_speed: self.upspeed.max(0) as u64,
        }
    }
}

/// Collapse qBittorrent's state zoo onto the shared status set.
fn parse_qb_state(state: &str) -> TransferStatus {
    match state {
        "downloading" | "forcedDL" | "metaDL" | "allocating" | "uploading" | "forcedUP"
        | "stalledDL" | "stalledUP" | "checkingDL" | "checkingUP" | "checkingResumeData"
        | "moving" => TransferStatus::Active,
        "pausedDL" | "pausedUP" | "stoppedDL" | "stoppedUP" => TransferStatus::Paused,
        "queuedDL" | "queuedUP" => TransferStatus::Waiting,
        "missingFiles" => TransferStatus::Error,
        s if s.starts_with("error") => TransferStatus::Error,
        _ => TransferStatus::Error,
    }
}

/// qBittorrent transfer/info response (subset).
#[derive(Debug, Deserialize)]
struct QbTransferInfo {
    dl_info_speed: i64,
    up_info_speed: i64,
}

#[async_trait]
impl Backend for QbBackend {
    fn name(&self) -> &str {
        "qbittorrent"
    }

    async fn list_active(&self) -> Result<Vec<Transfer>, BackendError> {
        self.list_filtered("active", None).await
    }

    async fn list_waiting(&self, offset: u32, count: u32) -> Result<Vec<Transfer>, BackendError> {
        self.list_filtered("queued", Some((offset, count))).await
    }

    async fn pause_all(&self) -> Result<(), BackendError> {
        self.post_form("/api/v2/torrents/stop", &[("hashes", "all")])
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        let hash = id.to_lowercase();
        self.post_form(
            "/api/v2/torrents/delete",
            &[("hashes", hash.as_str()), ("deleteFiles", "true")],
        )
        .await?;
        Ok(())
    }

    async fn purge_results(&self) -> Result<(), BackendError> {
        self.post_form(
            "/api/v2/torrents/delete",
            &[("hashes", "all"), ("deleteFiles", "true")],
        )
        .await?;
        Ok(())
    }

    async fn global_stats(&self) -> Result<GlobalStats, BackendError> {
        let response = self.get("/api/v2/transfer/info").await?;
        let info: QbTransferInfo = serde_json::from_str(&response)
            .map_err(|e| BackendError::Rpc(format!("Failed to parse response: {}", e)))?;
        Ok(GlobalStats {
            download_speed: info.dl_info_speed.max(0) as u64,
            upload_speed: info.up_info_speed.max(0) as u64,
        })
    }

    async fn set_option(&self, _id: &str, _key: &str, _value: &str) -> Result<(), BackendError> {
        // Option propagation targets the RPC engine only.
        Err(BackendError::Unsupported("qbittorrent"))
    }

    async fn set_global_option(&self, _key: &str, _value: &str) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("qbittorrent"))
    }

    async fn close(&self) -> Result<(), BackendError> {
        if let Err(e) = self.post_form("/api/v2/auth/logout", &[]).await {
            debug!(error = %e, "qBittorrent logout failed");
        }
        Ok(())
    }
}
