use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use live_config::admin::setup_admin_router;
use live_config::lifecycle::signals::{spawn_reload_listener, spawn_shutdown_listener};
use live_config::observability::{init_logging, init_metrics};
use live_config::settings::{load_settings, CoreSettings};
use live_config::ConfigCore;

#[derive(Parser)]
#[command(name = "live-config")]
#[command(about = "Live configuration core with hot reload, sync and audit", long_about = None)]
struct Args {
    /// Settings file (TOML). Defaults are used when omitted.
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Configuration document to manage, overriding `config_path`.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => load_settings(path)?,
        None => CoreSettings::default(),
    };
    if args.config.is_some() {
        settings.config_path = args.config;
    }

    init_logging(&settings.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        instance_id = %settings.instance_id,
        "live-config starting"
    );

    if settings.observability.metrics_enabled {
        match settings.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let core = Arc::new(ConfigCore::bootstrap(settings).await?);
    core.start().await?;

    let shutdown = core.shutdown.clone();
    spawn_shutdown_listener(shutdown.clone());
    spawn_reload_listener(Arc::clone(&core.hot_reload), shutdown.clone());

    if core.settings.admin.enabled {
        let listener = TcpListener::bind(&core.settings.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let app = setup_admin_router(Arc::clone(&core));
        let wait = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { wait.wait().await })
            .await?;
    } else {
        shutdown.wait().await;
    }

    core.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
