//! Administrative cleanup handlers

use crate::error::Result;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use invoq::storage::StorageUsage;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SweepResponse {
  pub files_removed: usize,
  pub bytes_removed: u64,
  pub affected_tasks: Vec<String>,
}

/// POST /api/cleanup/files
///
/// Forces one sweep round outside the periodic cadence.
pub async fn trigger_sweep(State(state): State<AppState>) -> Result<Json<SweepResponse>> {
  let report = state.scheduler.run_sweep_once().await?;
  tracing::info!(
    files = report.files_removed,
    bytes = report.bytes_removed,
    "manual sweep triggered"
  );
  Ok(Json(SweepResponse {
    files_removed: report.files_removed,
    bytes_removed: report.bytes_removed,
    affected_tasks: report.affected_tasks,
  }))
}

/// GET /api/cleanup/storage
pub async fn storage_usage(State(state): State<AppState>) -> Json<StorageUsage> {
  Json(state.storage.usage())
}
