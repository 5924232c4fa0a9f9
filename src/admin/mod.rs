//! Admin HTTP API.
//!
//! Every route sits behind the bearer-token middleware in `auth.rs`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::ConfigCore;

#[derive(Clone)]
pub struct AdminState {
    pub core: Arc<ConfigCore>,
}

pub fn setup_admin_router(core: Arc<ConfigCore>) -> Router {
    let state = AdminState { core };
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/config", get(get_config).patch(patch_config))
        .route("/admin/snapshots", get(get_snapshots))
        .route("/admin/snapshots/{id}/rollback", post(rollback))
        .route("/admin/reload", post(reload))
        .route("/admin/audit", get(get_audit))
        .route("/admin/audit/export", get(export_audit))
        .route("/admin/sync", get(get_sync))
        .route("/admin/peers", get(get_peers))
        .route("/admin/cache", get(get_cache))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
