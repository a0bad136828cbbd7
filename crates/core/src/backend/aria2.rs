//! aria2 JSON-RPC backend implementation.
//!
//! Drives a long-lived local aria2 daemon through its `/jsonrpc` endpoint.
//! aria2 reports every numeric counter as a JSON string; anything that does
//! not parse is coerced to zero rather than surfaced as an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Aria2Config;

use super::{Backend, BackendError, GlobalStats, Transfer, TransferFile, TransferStatus};

/// aria2 backend implementation.
pub struct Aria2Backend {
    client: Client,
    endpoint: String,
    secret: String,
}

impl Aria2Backend {
    /// Connect to the daemon and verify it answers.
    pub async fn connect(config: &Aria2Config) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .expect("Failed to create HTTP client");

        let backend = Self {
            client,
            endpoint: config.endpoint(),
            secret: format!("token:{}", config.secret),
        };

        // Probe so an unreachable daemon fails at initiate time, not on
        // first use.
        let version = backend.call("aria2.getVersion", vec![]).await?;
        debug!(
            version = version
                .get("version")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown"),
            "Connected to aria2"
        );

        Ok(backend)
    }

    async fn call(&self, method: &str, mut params: Vec<Value>) -> Result<Value, BackendError> {
        params.insert(0, Value::String(self.secret.clone()));
        let body = json!({
            "jsonrpc": "2.0",
            "id": "towline",
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else if e.is_connect() {
                    BackendError::Connection(e.to_string())
                } else {
                    BackendError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if let Some(error) = payload.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error")
                .to_string();
            if message.to_lowercase().contains("not found") {
                return Err(BackendError::NotFound(message));
            }
            if message.to_lowercase().contains("unauthorized") {
                return Err(BackendError::Auth(message));
            }
            return Err(BackendError::Rpc(message));
        }

        if !status.is_success() {
            return Err(BackendError::Rpc(format!("HTTP {}", status)));
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| BackendError::Rpc("Response carried no result".to_string()))
    }

    async fn call_downloads(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Transfer>, BackendError> {
        let result = self.call(method, params).await?;
        let downloads: Vec<Aria2Download> = serde_json::from_value(result)
            .map_err(|e| BackendError::Rpc(format!("Failed to parse response: {}", e)))?;
        Ok(downloads.into_iter().map(|d| d.into_transfer()).collect())
    }
}

/// aria2 download descriptor. Counters are strings on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Aria2Download {
    gid: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    total_length: String,
    #[serde(default)]
    completed_length: String,
    #[serde(default)]
    download_speed: String,
    #[serde(default)]
    upload_speed: String,
    #[serde(default)]
    dir: String,
    #[serde(default)]
    files: Vec<Aria2File>,
    #[serde(default)]
    bittorrent: Option<Aria2Bittorrent>,
}

#[derive(Debug, Deserialize)]
struct Aria2File {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct Aria2Bittorrent {
    #[serde(default)]
    info: Option<Aria2BtInfo>,
}

#[derive(Debug, Deserialize)]
struct Aria2BtInfo {
    #[serde(default)]
    name: Option<String>,
}

impl Aria2Download {
    fn into_transfer(self) -> Transfer {
        Transfer {
            id: self.gid,
            status: parse_aria2_status(&self.status),
            metadata_name: self.bittorrent.and_then(|bt| bt.info).and_then(|i| i.name),
            files: self
                .files
                .into_iter()
                .map(|f| TransferFile { path: f.path })
                .collect(),
            save_dir: self.dir,
            total_bytes: parse_counter(&self.total_length),
            completed_bytes: parse_counter(&self.completed_length),
            download_speed: parse_counter(&self.download_speed),
            upload_speed: parse_counter(&self.upload_speed),
        }
    }
}

fn parse_aria2_status(status: &str) -> TransferStatus {
    match status {
        "active" => TransferStatus::Active,
        "waiting" => TransferStatus::Waiting,
        "paused" => TransferStatus::Paused,
        "complete" => TransferStatus::Complete,
        "removed" => TransferStatus::Removed,
        _ => TransferStatus::Error,
    }
}

/// aria2 counters come back as decimal strings; garbage counts as zero.
fn parse_counter(raw: &str) -> u64 {
    raw.parse().unwrap_or(0)
}

#[async_trait]
impl Backend for Aria2Backend {
    fn name(&self) -> &str {
        "aria2"
    }

    async fn list_active(&self) -> Result<Vec<Transfer>, BackendError> {
        self.call_downloads("aria2.tellActive", vec![]).await
    }

    async fn list_waiting(&self, offset: u32, count: u32) -> Result<Vec<Transfer>, BackendError> {
        self.call_downloads("aria2.tellWaiting", vec![json!(offset), json!(count)])
            .await
    }

    async fn pause_all(&self) -> Result<(), BackendError> {
        self.call("aria2.forcePauseAll", vec![]).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        self.call("aria2.forceRemove", vec![json!(id)]).await?;
        Ok(())
    }

    async fn purge_results(&self) -> Result<(), BackendError> {
        self.call("aria2.purgeDownloadResult", vec![]).await?;
        Ok(())
    }

    async fn global_stats(&self) -> Result<GlobalStats, BackendError> {
        let result = self.call("aria2.getGlobalStat", vec![]).await?;
        let download_speed = result
            .get("downloadSpeed")
            .and_then(Value::as_str)
            .map(parse_counter)
            .unwrap_or(0);
        let upload_speed = result
            .get("uploadSpeed")
            .and_then(Value::as_str)
            .map(parse_counter)
            .unwrap_or(0);
        Ok(GlobalStats {
            download_speed,
            upload_speed,
        })
    }

    async fn set_option(&self, id: &str, key: &str, value: &str) -> Result<(), BackendError> {
        self.call("aria2.changeOption", vec![json!(id), json!({ key: value })])
            .await?;
        Ok(())
    }

    async fn set_global_option(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.call("aria2.changeGlobalOption", vec![json!({ key: value })])
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        // Plain HTTP transport; nothing to tear down beyond dropping the
        // connection pool.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter("100"), 100);
        assert_eq!(parse_counter("0"), 0);
        assert_eq!(parse_counter("abc"), 0);
        assert_eq!(parse_counter(""), 0);
        assert_eq!(parse_counter("-5"), 0);
    }

    #[test]
    fn test_parse_aria2_status() {
        assert_eq!(parse_aria2_status("active"), TransferStatus::Active);
        assert_eq!(parse_aria2_status("waiting"), TransferStatus::Waiting);
        assert_eq!(parse_aria2_status("paused"), TransferStatus::Paused);
        assert_eq!(parse_aria2_status("complete"), TransferStatus::Complete);
        assert_eq!(parse_aria2_status("removed"), TransferStatus::Removed);
        assert_eq!(parse_aria2_status("error"), TransferStatus::Error);
        assert_eq!(parse_aria2_status("garbled"), TransferStatus::Error);
    }

    #[test]
    fn test_download_conversion() {
        let raw = serde_json::json!({
            "gid": "2089b05ecca3d829",
            "status": "active",
            "totalLength": "34896138",
            "completedLength": "34896138",
            "downloadSpeed": "1000",
            "uploadSpeed": "not-a-number",
            "dir": "/downloads",
            "files": [{"path": "/downloads/file.iso"}],
            "bittorrent": {"info": {"name": "file.iso"}}
        });
        let download: Aria2Download = serde_json::from_value(raw).unwrap();
        let transfer = download.into_transfer();

        assert_eq!(transfer.id, "2089b05ecca3d829");
        assert_eq!(transfer.status, TransferStatus::Active);
        assert_eq!(transfer.metadata_name.as_deref(), Some("file.iso"));
        assert_eq!(transfer.save_dir, "/downloads");
        assert_eq!(transfer.total_bytes, 34896138);
        assert_eq!(transfer.download_speed, 1000);
        assert_eq!(transfer.upload_speed, 0);
        assert_eq!(transfer.files.len(), 1);
    }

    #[test]
    fn test_download_conversion_minimal() {
        let raw = serde_json::json!({ "gid": "abcd" });
        let download: Aria2Download = serde_json::from_value(raw).unwrap();
        let transfer = download.into_transfer();

        assert_eq!(transfer.id, "abcd");
        assert_eq!(transfer.status, TransferStatus::Error);
        assert!(transfer.metadata_name.is_none());
        assert!(transfer.files.is_empty());
        assert_eq!(transfer.total_bytes, 0);
    }
}
