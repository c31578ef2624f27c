//! Checkpoint persistence + HTTP client utilities for hdrwatch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "hdrwatch-storage";

/// Default location of the checkpoint file, relative to the working directory.
pub const DEFAULT_CHECKPOINT_PATH: &str = "lastcheck.txt";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint at {path} holds an invalid timestamp {raw:?}: {reason}")]
    Corrupt {
        path: PathBuf,
        raw: String,
        reason: String,
    },
}

/// Renders a timestamp the way the checkpoint file stores it (RFC 3339, UTC, millis).
pub fn format_checkpoint(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_checkpoint(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw.trim()).map(|ts| ts.with_timezone(&Utc))
}

/// File-backed store for the single "last checked" timestamp.
///
/// There is exactly one writer (the scheduler loop), so no locking is done.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn load(&self) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_err(err)),
        };
        let raw = String::from_utf8(bytes).map_err(|err| CheckpointError::Corrupt {
            path: self.path.clone(),
            raw: String::from_utf8_lossy(err.as_bytes()).trim().to_string(),
            reason: err.to_string(),
        })?;
        parse_checkpoint(&raw)
            .map(Some)
            .map_err(|err| CheckpointError::Corrupt {
                path: self.path.clone(),
                raw: raw.trim().to_string(),
                reason: err.to_string(),
            })
    }

    /// Returns the stored timestamp, creating the checkpoint at "now" when absent.
    pub async fn read(&self) -> Result<DateTime<Utc>, CheckpointError> {
        if let Some(ts) = self.load().await? {
            return Ok(ts);
        }
        let now = Utc::now().trunc_subsecs(3);
        info!(path = %self.path.display(), checkpoint = %format_checkpoint(now), "initializing checkpoint");
        self.persist(now).await?;
        Ok(now)
    }

    /// Stores `ts` at millisecond precision and returns exactly the persisted value.
    ///
    /// The stored value never moves backwards: an older `ts` (clock skew) keeps
    /// the current value. An unreadable or corrupt existing value is overwritten;
    /// only a failure to persist the new value is an error.
    pub async fn write(&self, ts: DateTime<Utc>) -> Result<DateTime<Utc>, CheckpointError> {
        let ts = ts.trunc_subsecs(3);
        let current = match self.load().await {
            Ok(current) => current,
            Err(err) => {
                warn!(error = %err, "overwriting unreadable checkpoint");
                None
            }
        };

        let next = match current {
            Some(current) if ts < current => {
                warn!(
                    requested = %format_checkpoint(ts),
                    stored = %format_checkpoint(current),
                    "refusing to move checkpoint backwards"
                );
                current
            }
            _ => ts,
        };

        self.persist(next).await?;
        debug!(path = %self.path.display(), checkpoint = %format_checkpoint(next), "checkpoint written");
        Ok(next)
    }

    /// Atomic temp-file write followed by rename over the checkpoint path.
    async fn persist(&self, ts: DateTime<Utc>) -> Result<(), CheckpointError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(|err| self.io_err(err))?;

        let temp_path = parent.join(format!(".checkpoint.{}.tmp", Uuid::new_v4()));
        let result = async {
            let mut file = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp_path)
                .await?;
            file.write_all(format_checkpoint(ts).as_bytes()).await?;
            file.flush().await?;
            drop(file);
            fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(self.io_err(err));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub proxy: Option<ProxyConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            proxy: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status).ok(),
            FetchError::Request(err) => err.status(),
            FetchError::Decode { .. } => None,
        }
    }
}

/// Thin reqwest wrapper shared by the media-service adapters and the notifier.
///
/// Non-2xx responses become [`FetchError::HttpStatus`]; no retries are attempted.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        // Only the configured proxy is used; ambient HTTP_PROXY variables are ignored.
        builder = match &config.proxy {
            Some(proxy) => builder.proxy(
                reqwest::Proxy::all(proxy.url())
                    .with_context(|| format!("configuring proxy {}", proxy.url()))?,
            ),
            None => builder.no_proxy(),
        };

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: HeaderMap,
    ) -> Result<T, FetchError> {
        let span = info_span!("http_get", url);
        async {
            let resp = self
                .client
                .get(url)
                .query(query)
                .headers(headers)
                .send()
                .await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await?;
            debug!(status = status.as_u16(), bytes = body.len(), "response received");
            serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
                url: final_url,
                source,
            })
        }
        .instrument(span)
        .await
    }

    pub async fn post_text(
        &self,
        url: &str,
        body: String,
        headers: HeaderMap,
    ) -> Result<StatusCode, FetchError> {
        let span = info_span!("http_post", url);
        async {
            let resp = self
                .client
                .post(url)
                .headers(headers)
                .body(body)
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: resp.url().to_string(),
                });
            }
            Ok(status)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 24, h, m, 0).single().expect("ts")
    }

    #[tokio::test]
    async fn missing_checkpoint_is_created_at_now() {
        let dir = tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path().join("lastcheck.txt"));

        let before = Utc::now();
        let read = store.read().await.expect("read");
        let after = Utc::now();

        // stored at millisecond precision
        assert!(read >= before - chrono::Duration::milliseconds(1));
        assert!(read <= after);
        assert!(store.path().exists());

        let on_disk = std::fs::read_to_string(store.path()).expect("contents");
        assert_eq!(on_disk, format_checkpoint(read));
        assert_eq!(store.read().await.expect("second read"), read);
    }

    #[tokio::test]
    async fn write_then_read_returns_written_value() {
        let dir = tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path().join("state").join("lastcheck.txt"));

        store.write(ts(12, 0)).await.expect("write");
        assert_eq!(store.read().await.expect("read"), ts(12, 0));

        let stored = store.write(ts(12, 5)).await.expect("advance");
        assert_eq!(stored, ts(12, 5));
        assert_eq!(store.read().await.expect("read"), ts(12, 5));
    }

    #[tokio::test]
    async fn write_never_moves_backwards() {
        let dir = tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path().join("lastcheck.txt"));

        store.write(ts(12, 5)).await.expect("write");
        let stored = store.write(ts(11, 0)).await.expect("stale write");

        assert_eq!(stored, ts(12, 5));
        assert_eq!(store.read().await.expect("read"), ts(12, 5));
    }

    #[tokio::test]
    async fn corrupt_checkpoint_fails_read_but_is_replaced_by_write() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("lastcheck.txt");
        std::fs::write(&path, "not a timestamp").expect("seed");
        let store = CheckpointStore::new(&path);

        let err = store.read().await.expect_err("corrupt");
        assert!(matches!(err, CheckpointError::Corrupt { .. }));

        store.write(ts(9, 30)).await.expect("overwrite");
        assert_eq!(store.read().await.expect("read"), ts(9, 30));
    }

    #[tokio::test]
    async fn write_returns_the_persisted_millisecond_value() {
        let dir = tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path().join("lastcheck.txt"));
        let precise = ts(12, 0) + chrono::Duration::microseconds(1500);

        let stored = store.write(precise).await.expect("write");

        assert_eq!(format_checkpoint(stored), "2026-02-24T12:00:00.001Z");
        assert_eq!(store.read().await.expect("read"), stored);
    }

    #[tokio::test]
    async fn write_of_current_time_round_trips_through_read() {
        let dir = tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path().join("lastcheck.txt"));

        let stored = store.write(Utc::now()).await.expect("write");
        assert_eq!(store.read().await.expect("read"), stored);

        // a later sub-millisecond "now" never lands below the stored value
        let again = store.write(Utc::now()).await.expect("second write");
        assert!(again >= stored);
        assert_eq!(store.read().await.expect("read"), again);
    }

    #[tokio::test]
    async fn non_utf8_checkpoint_is_corrupt_and_replaced_by_write() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("lastcheck.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).expect("seed");
        let store = CheckpointStore::new(&path);

        let err = store.read().await.expect_err("invalid utf-8");
        assert!(matches!(err, CheckpointError::Corrupt { .. }));

        let stored = store.write(ts(10, 0)).await.expect("overwrite");
        assert_eq!(stored, ts(10, 0));
        assert_eq!(store.read().await.expect("recovered"), ts(10, 0));
    }

    #[tokio::test]
    async fn accepts_checkpoint_with_trailing_newline_and_offset() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("lastcheck.txt");
        std::fs::write(&path, "2026-02-24T14:00:00.000+02:00\n").expect("seed");
        let store = CheckpointStore::new(&path);

        assert_eq!(store.read().await.expect("read"), ts(12, 0));
    }

    #[test]
    fn checkpoint_format_matches_iso_millis() {
        assert_eq!(format_checkpoint(ts(12, 0)), "2026-02-24T12:00:00.000Z");
    }

    #[test]
    fn proxy_config_renders_http_url() {
        let proxy = ProxyConfig {
            host: "192.168.1.208".into(),
            port: 8676,
        };
        assert_eq!(proxy.url(), "http://192.168.1.208:8676");

        let fetcher = HttpFetcher::new(HttpClientConfig {
            proxy: Some(proxy),
            ..Default::default()
        });
        assert!(fetcher.is_ok());
    }

    #[test]
    fn http_status_error_exposes_status() {
        let err = FetchError::HttpStatus {
            status: 503,
            url: "http://radarr/api/v3/movie/1".into(),
        };
        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(err.to_string(), "http status 503 for http://radarr/api/v3/movie/1");
    }
}
