//! OS signal handling.
//!
//! # Responsibilities
//! - Translate SIGINT/SIGTERM into a graceful shutdown
//! - Translate SIGHUP into an immediate reload of every change source
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP bypasses the debounce; it is an explicit operator request

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::hot_reload::HotReloadCoordinator;
use crate::lifecycle::Shutdown;

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Trigger `shutdown` when the process receives a shutdown signal.
pub fn spawn_shutdown_listener(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    })
}

/// Reload every registered source on SIGHUP until `shutdown` fires.
#[cfg(unix)]
pub fn spawn_reload_listener(hot_reload: Arc<HotReloadCoordinator>, shutdown: Shutdown) -> JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler");
                return;
            }
        };
        let mut stop = shutdown.subscribe();
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    tracing::info!("SIGHUP received, reloading configuration sources");
                    for key in hot_reload.source_keys() {
                        let event = hot_reload.trigger_reload(&key).await;
                        tracing::info!(key = %key, event = ?event, "Manual reload finished");
                    }
                }
            }
        }
    })
}

#[cfg(not(unix))]
pub fn spawn_reload_listener(_hot_reload: Arc<HotReloadCoordinator>, shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move { shutdown.wait().await })
}
