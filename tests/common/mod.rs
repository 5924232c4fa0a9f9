//! Shared fakes for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use live_config::audit::{AuditEntry, PersistentStore};
use live_config::error::{CoreError, CoreResult};
use live_config::hot_reload::{ChangeSignal, ChangeSource, SignalOrigin};
use live_config::runtime::{RuntimeConfigurationManager, ValidationIssue, ValidationResult};
use live_config::settings::ManagerSettings;

/// Validator that rejects every candidate.
pub fn reject_all(_candidate: &Value) -> ValidationResult {
    ValidationResult::from_issues(vec![ValidationIssue::new("", "rejected by test validator")], Vec::new())
}

pub fn manager(initial: Value) -> Arc<RuntimeConfigurationManager> {
    Arc::new(RuntimeConfigurationManager::new(initial, &ManagerSettings::default()))
}

/// Change source driven by the test through [`FakeChangeSource::emit`].
pub struct FakeChangeSource {
    key: String,
    sender: Mutex<Option<mpsc::UnboundedSender<ChangeSignal>>>,
    document: Mutex<Option<Value>>,
}

impl FakeChangeSource {
    pub fn new(key: &str) -> Arc<Self> {
        Arc::new(Self {
            key: key.to_string(),
            sender: Mutex::new(None),
            document: Mutex::new(None),
        })
    }

    /// Emit a file-style signal carrying `candidate`. Returns false until
    /// the coordinator has started watching.
    pub fn emit(&self, candidate: Value) -> bool {
        let sender = self.sender.lock().unwrap();
        let Some(tx) = sender.as_ref() else {
            return false;
        };
        let origin = SignalOrigin::File {
            path: self.key.clone().into(),
            size: candidate.to_string().len() as u64,
            mtime: None,
        };
        tx.send(ChangeSignal::new(self.key.clone(), origin).with_candidate(candidate))
            .is_ok()
    }

    pub fn set_document(&self, document: Value) {
        *self.document.lock().unwrap() = Some(document);
    }

    pub fn is_watching(&self) -> bool {
        self.sender.lock().unwrap().is_some()
    }
}

#[async_trait]
impl ChangeSource for FakeChangeSource {
    fn key(&self) -> String {
        self.key.clone()
    }

    async fn watch(
        &self,
        signals: mpsc::UnboundedSender<ChangeSignal>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> CoreResult<()> {
        *self.sender.lock().unwrap() = Some(signals);
        let _ = shutdown.recv().await;
        *self.sender.lock().unwrap() = None;
        Ok(())
    }

    async fn load(&self) -> CoreResult<Option<Value>> {
        Ok(self.document.lock().unwrap().clone())
    }
}

/// Store whose every operation fails.
pub struct FailingStore;

#[async_trait]
impl PersistentStore for FailingStore {
    async fn save(&self, _entries: &[AuditEntry]) -> CoreResult<()> {
        Err(CoreError::TransientIo {
            operation: "save".into(),
            message: "disk full".into(),
        })
    }

    async fn load(&self) -> CoreResult<Option<Vec<AuditEntry>>> {
        Err(CoreError::TransientIo {
            operation: "load".into(),
            message: "disk unavailable".into(),
        })
    }

    async fn clear(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Serve JSON documents over plain HTTP/1.1. Each request gets the next
/// document; the last one repeats.
pub async fn start_document_server(documents: Vec<Value>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let documents = Arc::new(Mutex::new(documents));

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let documents = Arc::clone(&documents);
                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        let _ = socket.read(&mut buf).await;
                        let body = {
                            let mut docs = documents.lock().unwrap();
                            if docs.len() > 1 {
                                docs.remove(0)
                            } else {
                                docs.first().cloned().unwrap_or_else(|| json!({}))
                            }
                        }
                        .to_string();
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
