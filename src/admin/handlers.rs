use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::admin::AdminState;
use crate::audit::{AuditEntry, AuditFilter, ExportFormat};
use crate::cache::CacheStatistics;
use crate::hot_reload::{HotReloadEvent, HotReloadStatus};
use crate::runtime::{ConfigurationSnapshot, RuntimeStatistics, UpdateOptions, UpdateResult};
use crate::sync::{Peer, SyncStatus};

/// Source tag for changes made through the admin API.
pub const ADMIN_SOURCE: &str = "admin";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub instance_id: String,
    pub runtime: RuntimeStatistics,
    pub hot_reload: HotReloadStatus,
    pub audit_entries: usize,
    pub sync_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    #[serde(default = "default_format")]
    pub format: ExportFormat,
}

fn default_format() -> ExportFormat {
    ExportFormat::Json
}

fn error_body(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let core = &state.core;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        instance_id: core.settings.instance_id.clone(),
        runtime: core.manager.get_runtime_statistics(),
        hot_reload: core.hot_reload.get_status(),
        audit_entries: core.audit.len(),
        sync_enabled: core.sync.is_some(),
    })
}

pub async fn get_config(State(state): State<AdminState>) -> Json<Value> {
    Json(state.core.manager.get_current_configuration())
}

/// Deep-merge the request body into the live configuration.
pub async fn patch_config(State(state): State<AdminState>, Json(partial): Json<Value>) -> Response {
    match state
        .core
        .manager
        .update_configuration(partial, UpdateOptions::from_source(ADMIN_SOURCE))
        .await
    {
        Ok(result) if result.success => Json(result).into_response(),
        Ok(result) => (StatusCode::UNPROCESSABLE_ENTITY, Json(result)).into_response(),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn get_snapshots(State(state): State<AdminState>) -> Json<Vec<ConfigurationSnapshot>> {
    Json(state.core.manager.list_snapshots())
}

pub async fn rollback(State(state): State<AdminState>, Path(id): Path<String>) -> (StatusCode, Json<UpdateResult>) {
    let result = state.core.manager.rollback_to_snapshot(&id).await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (status, Json(result))
}

pub async fn reload(State(state): State<AdminState>) -> Json<Vec<HotReloadEvent>> {
    let hot_reload = &state.core.hot_reload;
    let mut events = Vec::new();
    for key in hot_reload.source_keys() {
        events.push(hot_reload.trigger_reload(&key).await);
    }
    Json(events)
}

pub async fn get_audit(State(state): State<AdminState>, Query(filter): Query<AuditFilter>) -> Json<Vec<AuditEntry>> {
    let entries = state
        .core
        .audit
        .query_audit_log(&filter)
        .iter()
        .map(|e| e.as_ref().clone())
        .collect();
    Json(entries)
}

pub async fn export_audit(
    State(state): State<AdminState>,
    Query(params): Query<ExportParams>,
    Query(filter): Query<AuditFilter>,
) -> Response {
    match state.core.audit.export_audit_log(params.format, &filter) {
        Ok(body) => {
            let content_type = match params.format {
                ExportFormat::Json => "application/json",
                ExportFormat::Csv => "text/csv",
            };
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn get_sync(State(state): State<AdminState>) -> Result<Json<SyncStatus>, Response> {
    match &state.core.sync {
        Some(sync) => Ok(Json(sync.get_sync_status())),
        None => Err(error_body(StatusCode::NOT_FOUND, "sync is disabled")),
    }
}

pub async fn get_peers(State(state): State<AdminState>) -> Json<Vec<Peer>> {
    Json(state.core.sync.as_ref().map(|s| s.get_peers()).unwrap_or_default())
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheStatistics> {
    Json(state.core.cache.get_statistics())
}
