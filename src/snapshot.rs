//! Configuration snapshot loader.
//!
//! The snapshot is a small JSON document listing the tunnel records the
//! portal knows about:
//!
//! ```json
//! { "cloudflareTunnels": [ { "name": "cloud", "address": "https://a.example" } ] }
//! ```
//!
//! Every load is a fresh, cache-busted read. Failures are reported to the
//! caller and never retried here; the rediscovery loop owns retry cadence.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One named tunnel address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRecord {
    pub name: String,
    #[serde(default)]
    pub address: String,
}

/// Ordered set of tunnel records, superseded wholesale by the next load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(rename = "cloudflareTunnels", alias = "tunnels", default)]
    tunnels: Vec<TunnelRecord>,
}

impl ConfigSnapshot {
    pub fn new(tunnels: Vec<TunnelRecord>) -> Self {
        Self { tunnels }
    }

    /// Parse the snapshot document. Unknown top-level fields are ignored.
    pub fn from_json(body: &str) -> Result<Self, FetchError> {
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    /// First record carrying `name`.
    pub fn find(&self, name: &str) -> Option<&TunnelRecord> {
        self.tunnels.iter().find(|t| t.name == name)
    }

    pub fn records(&self) -> &[TunnelRecord] {
        &self.tunnels
    }
}

/// Why a snapshot could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("configuration request failed: {0}")]
    Request(String),
    #[error("configuration request returned HTTP {0}")]
    Status(u16),
    #[error("configuration document is malformed: {0}")]
    Malformed(String),
}

/// Source of configuration snapshots.
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    async fn load(&self) -> Result<ConfigSnapshot, FetchError>;
}

/// Loads the snapshot over HTTP, bypassing every cache layer.
pub struct HttpSnapshotLoader {
    http: reqwest::Client,
    url: Url,
}

impl HttpSnapshotLoader {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::Request(format!("{url}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self { http, url })
    }

    /// The request URL with a fresh `t=<epoch millis>` cache-buster.
    pub fn busted_url(&self) -> Url {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("t", &millis.to_string());
        url
    }
}

#[async_trait]
impl SnapshotLoader for HttpSnapshotLoader {
    async fn load(&self) -> Result<ConfigSnapshot, FetchError> {
        let url = self.busted_url();
        debug!("Snapshot: GET {url}");
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::PRAGMA, "no-cache")
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        ConfigSnapshot::from_json(&body)
    }
}

/// Loads the snapshot from a local file; re-read on every call.
pub struct FileSnapshotLoader {
    path: PathBuf,
}

impl FileSnapshotLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotLoader for FileSnapshotLoader {
    async fn load(&self) -> Result<ConfigSnapshot, FetchError> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| FetchError::Request(format!("{}: {e}", self.path.display())))?;
        ConfigSnapshot::from_json(&body)
    }
}

/// Pick a loader for `source`: `http(s)://` URLs go over the network,
/// anything else is treated as a local path.
pub fn loader_for(source: &str, timeout: Duration) -> Result<Arc<dyn SnapshotLoader>, FetchError> {
    if source.starts_with("http://") || source.starts_with("https://") {
        Ok(Arc::new(HttpSnapshotLoader::new(source, timeout)?))
    } else {
        let path = source.strip_prefix("file://").unwrap_or(source);
        Ok(Arc::new(FileSnapshotLoader::new(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tunnel_list_in_order() {
        let snapshot = ConfigSnapshot::from_json(
            r#"{
                "github": { "clientId": "x" },
                "cloudflareTunnels": [
                    { "name": "cloud", "address": "https://a.example/" },
                    { "name": "staging-cloud", "address": "https://b.example" },
                    { "name": "cloud", "address": "https://c.example" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(snapshot.records().len(), 3);
        assert_eq!(snapshot.find("cloud").unwrap().address, "https://a.example/");
        assert!(snapshot.find("test-cloud").is_none());
    }

    #[test]
    fn missing_tunnel_list_is_empty() {
        let snapshot = ConfigSnapshot::from_json("{}").unwrap();
        assert!(snapshot.records().is_empty());
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            ConfigSnapshot::from_json("{ nope"),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn cache_buster_is_appended() {
        let loader =
            HttpSnapshotLoader::new("https://host.example/config.json?v=2", Duration::from_secs(1))
                .unwrap();
        let url = loader.busted_url();
        let pairs: Vec<_> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert_eq!(pairs, vec!["v".to_string(), "t".to_string()]);
        assert_eq!(url.path(), "/config.json");
    }

    #[tokio::test]
    async fn file_loader_rereads_each_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"cloudflareTunnels":[{"name":"cloud","address":"https://one.example"}]}"#,
        )
        .unwrap();
        let loader = FileSnapshotLoader::new(&path);
        let first = loader.load().await.unwrap();
        assert_eq!(first.find("cloud").unwrap().address, "https://one.example");

        std::fs::write(
            &path,
            r#"{"cloudflareTunnels":[{"name":"cloud","address":"https://two.example"}]}"#,
        )
        .unwrap();
        let second = loader.load().await.unwrap();
        assert_eq!(second.find("cloud").unwrap().address, "https://two.example");
    }

    #[tokio::test]
    async fn missing_file_is_request_error() {
        let loader = FileSnapshotLoader::new("/definitely/not/here.json");
        assert!(matches!(loader.load().await, Err(FetchError::Request(_))));
    }

    #[tokio::test]
    async fn http_loader_bypasses_caches() {
        use std::collections::HashMap;

        use axum::extract::Query;
        use axum::http::{header, HeaderMap, StatusCode};
        use axum::{routing::get, Router};

        async fn config(
            Query(params): Query<HashMap<String, String>>,
            headers: HeaderMap,
        ) -> (StatusCode, String) {
            let busted = params.contains_key("t");
            let no_cache = headers
                .get(header::CACHE_CONTROL)
                .is_some_and(|v| v == "no-cache");
            if busted && no_cache {
                (
                    StatusCode::OK,
                    r#"{"cloudflareTunnels":[{"name":"cloud","address":"https://c.example"}]}"#
                        .to_string(),
                )
            } else {
                (StatusCode::BAD_REQUEST, String::new())
            }
        }

        let app = Router::new()
            .route("/config.json", get(config))
            .route("/missing.json", get(|| async { StatusCode::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let loader = loader_for(&format!("http://{addr}/config.json"), Duration::from_secs(2)).unwrap();
        let snapshot = loader.load().await.unwrap();
        assert_eq!(snapshot.find("cloud").unwrap().address, "https://c.example");

        let missing = loader_for(&format!("http://{addr}/missing.json"), Duration::from_secs(2)).unwrap();
        assert_eq!(missing.load().await.unwrap_err(), FetchError::Status(404));
    }
}
