//! Change-signal sources feeding the hot reload coordinator.
//!
//! # Responsibilities
//! - Detect that an external configuration document changed
//! - Load and parse that document on demand
//!
//! # Design Decisions
//! - Sources only emit raw signals; debouncing belongs to the coordinator
//! - File sources re-read the file when the debounce fires, so a burst of
//!   writes always loads the final content
//! - Remote sources attach the fetched document to the signal and report
//!   `None` from `load` when its checksum is unchanged

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::error::{CoreError, CoreResult};
use crate::resilience::backoff::calculate_backoff;
use crate::sync::version::checksum;

/// Where a change signal came from.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOrigin {
    File {
        path: PathBuf,
        size: u64,
        mtime: Option<DateTime<Utc>>,
    },
    Remote {
        source: String,
    },
    Manual,
}

/// A raw "something changed" notification for one debounce key.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSignal {
    pub key: String,
    pub origin: SignalOrigin,
    /// Document already fetched by the source; `None` means load on fire.
    pub candidate: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeSignal {
    pub fn new(key: impl Into<String>, origin: SignalOrigin) -> Self {
        Self {
            key: key.into(),
            origin,
            candidate: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_candidate(mut self, candidate: Value) -> Self {
        self.candidate = Some(candidate);
        self
    }
}

/// External origin of configuration changes.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Debounce key (file path or remote source name).
    fn key(&self) -> String;

    /// Emit signals until `shutdown` fires.
    async fn watch(
        &self,
        signals: mpsc::UnboundedSender<ChangeSignal>,
        shutdown: broadcast::Receiver<()>,
    ) -> CoreResult<()>;

    /// Current document, or `None` when nothing changed since the last load.
    async fn load(&self) -> CoreResult<Option<Value>>;
}

/// Parse a configuration document, choosing the format by file extension.
pub fn parse_document(path: &Path, content: &str) -> CoreResult<Value> {
    let origin = || path.display().to_string();
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str::<Value>(content).map_err(|e| CoreError::Parse {
            origin: origin(),
            message: e.to_string(),
        }),
        Some("json") => serde_json::from_str::<Value>(content).map_err(|e| CoreError::Parse {
            origin: origin(),
            message: e.to_string(),
        }),
        other => Err(CoreError::Parse {
            origin: origin(),
            message: format!("unsupported format {:?}, expected .toml or .json", other.unwrap_or("")),
        }),
    }
}

/// Read and parse a configuration file.
pub async fn load_document(path: &Path) -> CoreResult<Value> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::transient(format!("read {}", path.display()), e))?;
    parse_document(path, &content)
}

/// Watches one file through the platform notifier.
#[derive(Debug, Clone)]
pub struct FileChangeSource {
    path: PathBuf,
}

impl FileChangeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn file_origin(path: &Path) -> SignalOrigin {
    let metadata = std::fs::metadata(path).ok();
    SignalOrigin::File {
        path: path.to_path_buf(),
        size: metadata.as_ref().map_or(0, |m| m.len()),
        mtime: metadata
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from),
    }
}

#[async_trait]
impl ChangeSource for FileChangeSource {
    fn key(&self) -> String {
        self.path.display().to_string()
    }

    async fn watch(
        &self,
        signals: mpsc::UnboundedSender<ChangeSignal>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> CoreResult<()> {
        let key = self.key();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::debug!(path = %path.display(), "Config file change detected");
                        let _ = signals.send(ChangeSignal::new(key.clone(), file_origin(&path)));
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| CoreError::transient("create file watcher", e))?;

        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|e| CoreError::transient(format!("watch {}", self.path.display()), e))?;
        tracing::info!(path = %self.path.display(), "Config file watcher started");

        // The watcher stops when dropped.
        let _ = shutdown.recv().await;
        drop(watcher);
        tracing::debug!(path = %self.path.display(), "Config file watcher stopped");
        Ok(())
    }

    async fn load(&self) -> CoreResult<Option<Value>> {
        load_document(&self.path).await.map(Some)
    }
}

/// Polls a JSON document over HTTP.
pub struct RemoteChangeSource {
    name: String,
    url: String,
    poll_interval: Duration,
    client: reqwest::Client,
    last_checksum: Mutex<Option<String>>,
}

impl RemoteChangeSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            poll_interval,
            client: reqwest::Client::new(),
            last_checksum: Mutex::new(None),
        }
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots, default headers).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn fetch(&self) -> CoreResult<Value> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.poll_interval.max(Duration::from_secs(1)))
            .send()
            .await
            .map_err(|e| CoreError::transient(format!("fetch {}", self.name), e))?
            .error_for_status()
            .map_err(|e| CoreError::transient(format!("fetch {}", self.name), e))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| CoreError::Parse {
                origin: self.url.clone(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl ChangeSource for RemoteChangeSource {
    fn key(&self) -> String {
        self.name.clone()
    }

    async fn watch(
        &self,
        signals: mpsc::UnboundedSender<ChangeSignal>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> CoreResult<()> {
        const BACKOFF_BASE_MS: u64 = 1_000;
        let max_backoff_ms = u64::try_from(self.poll_interval.as_millis())
            .unwrap_or(u64::MAX)
            .saturating_mul(4);

        tracing::info!(source = %self.name, url = %self.url, "Remote config polling started");
        let mut failures = 0u32;
        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.load().await {
                Ok(Some(document)) => {
                    failures = 0;
                    let signal = ChangeSignal::new(
                        self.name.clone(),
                        SignalOrigin::Remote {
                            source: self.name.clone(),
                        },
                    )
                    .with_candidate(document);
                    if signals.send(signal).is_err() {
                        break;
                    }
                    delay = self.poll_interval;
                }
                Ok(None) => {
                    failures = 0;
                    delay = self.poll_interval;
                }
                Err(e) => {
                    failures += 1;
                    delay = calculate_backoff(failures, BACKOFF_BASE_MS, max_backoff_ms).max(self.poll_interval);
                    tracing::warn!(
                        source = %self.name,
                        error = %e,
                        attempt = failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "Remote config poll failed"
                    );
                }
            }
        }
        tracing::debug!(source = %self.name, "Remote config polling stopped");
        Ok(())
    }

    async fn load(&self) -> CoreResult<Option<Value>> {
        let document = self.fetch().await?;
        let sum = checksum(&document);
        let mut last = self.last_checksum.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_deref() == Some(sum.as_str()) {
            return Ok(None);
        }
        *last = Some(sum);
        Ok(Some(document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_by_extension() {
        let toml = parse_document(Path::new("app.toml"), "[server]\nport = 8080\n").unwrap();
        assert_eq!(toml, json!({"server": {"port": 8080}}));

        let json = parse_document(Path::new("app.json"), r#"{"server": {"port": 8080}}"#).unwrap();
        assert_eq!(json, toml);

        assert!(matches!(
            parse_document(Path::new("app.yaml"), "a: 1"),
            Err(CoreError::Parse { .. })
        ));
        assert!(matches!(
            parse_document(Path::new("app.json"), "{"),
            Err(CoreError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_source_loads_current_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.json");
        std::fs::write(&path, r#"{"feature": {"enabled": true}}"#).unwrap();

        let source = FileChangeSource::new(&path);
        assert_eq!(source.key(), path.display().to_string());
        assert_eq!(
            source.load().await.unwrap(),
            Some(json!({"feature": {"enabled": true}}))
        );

        let missing = FileChangeSource::new(dir.path().join("absent.json"));
        assert!(missing.load().await.unwrap_err().is_transient());
    }

    #[test]
    fn test_file_origin_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, "{}").unwrap();
        match file_origin(&path) {
            SignalOrigin::File { size, mtime, .. } => {
                assert_eq!(size, 2);
                assert!(mtime.is_some());
            }
            other => panic!("unexpected origin {other:?}"),
        }
    }
}
