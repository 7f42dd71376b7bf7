//! Task lifecycle handlers: status, progress, list, start, cancel, retry,
//! delete, statistics and queue stats

use crate::error::Result;
use crate::handlers::fetch_owned;
use crate::session::SessionId;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use invoq::scheduler::CancelOutcome;
use invoq::task::{QueueSnapshot, SessionStats, TaskRecord, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;

/// Status projection of one task record
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusResponse {
  pub task_id: String,
  pub status: TaskStatus,
  pub progress: u8,
  pub stage: String,
  pub file_count: usize,
  pub retry_count: u32,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error_kind: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub download_urls: Option<Vec<String>>,
}

impl TaskStatusResponse {
  fn from_record(record: TaskRecord) -> Self {
    let download_urls = if record.status == TaskStatus::Completed {
      Some(
        record
          .output_refs
          .iter()
          .filter_map(|path| {
            std::path::Path::new(path)
              .file_name()
              .and_then(|name| name.to_str())
              .map(|name| format!("/api/download/{}/{}", record.task_id, name))
          })
          .collect(),
      )
    } else {
      None
    };
    Self {
      task_id: record.task_id,
      status: record.status,
      progress: record.progress,
      stage: record.stage,
      file_count: record.file_count,
      retry_count: record.retry_count,
      created_at: record.created_at,
      updated_at: record.updated_at,
      completed_at: record.completed_at,
      error_kind: record.error_kind,
      error_message: record.error_message,
      download_urls,
    }
  }
}

/// GET /api/task/:task_id/status
pub async fn task_status(
  State(state): State<AppState>,
  session: SessionId,
  Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>> {
  let record = fetch_owned(&state, session.as_str(), &task_id).await?;
  Ok(Json(TaskStatusResponse::from_record(record)))
}

/// Rich progress projection with estimates
#[derive(Debug, Serialize)]
pub struct TaskProgressResponse {
  pub task_id: String,
  pub status: TaskStatus,
  pub progress: u8,
  pub stage: String,
  pub progress_rate_per_minute: Option<f64>,
  pub estimated_remaining_seconds: Option<u64>,
  pub estimated_completion_at: Option<DateTime<Utc>>,
}

/// GET /api/task/:task_id/progress
pub async fn task_progress(
  State(state): State<AppState>,
  session: SessionId,
  Path(task_id): Path<String>,
) -> Result<Json<TaskProgressResponse>> {
  let record = fetch_owned(&state, session.as_str(), &task_id).await?;
  // The live view exists only while a worker holds the task; the record is
  // the fallback for queued and terminal states
  let live = state.scheduler.live_progress(&task_id);
  let (rate, remaining, eta) = match live {
    Some(snapshot) => (
      snapshot.progress_rate_per_minute,
      snapshot.estimated_remaining_seconds,
      snapshot.estimated_completion_at,
    ),
    None => (None, None, None),
  };
  Ok(Json(TaskProgressResponse {
    task_id: record.task_id,
    status: record.status,
    progress: record.progress,
    stage: record.stage,
    progress_rate_per_minute: rate,
    estimated_remaining_seconds: remaining,
    estimated_completion_at: eta,
  }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
  pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
  pub tasks: Vec<TaskStatusResponse>,
  pub total_count: usize,
  pub session_id: String,
}

/// GET /api/task/
pub async fn list_tasks(
  State(state): State<AppState>,
  session: SessionId,
  Query(query): Query<ListQuery>,
) -> Result<Json<TaskListResponse>> {
  let filter = match query.status.as_deref() {
    Some(raw) => Some(TaskStatus::from_str(raw).map_err(invoq::error::Error::bad_request)?),
    None => None,
  };
  let records = state.registry.list(session.as_str()).await?;
  let tasks: Vec<TaskStatusResponse> = records
    .into_iter()
    .filter(|record| filter.map(|status| record.status == status).unwrap_or(true))
    .map(TaskStatusResponse::from_record)
    .collect();
  Ok(Json(TaskListResponse {
    total_count: tasks.len(),
    tasks,
    session_id: session.0,
  }))
}

/// POST /api/task/:task_id/start
///
/// Re-attaches a queued task to the queue (useful after a restart when the
/// in-process queue was lost).
pub async fn start_task(
  State(state): State<AppState>,
  session: SessionId,
  Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
  let record = fetch_owned(&state, session.as_str(), &task_id).await?;
  state.scheduler.ensure_enqueued(&record)?;
  Ok(Json(json!({ "status": "processing" })))
}

/// POST /api/task/:task_id/cancel
pub async fn cancel_task(
  State(state): State<AppState>,
  session: SessionId,
  Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
  let record = fetch_owned(&state, session.as_str(), &task_id).await?;
  match state.scheduler.cancel(&record).await? {
    CancelOutcome::Cancelled => Ok(Json(json!({ "status": "cancelled" }))),
    CancelOutcome::NoOp(status) => Ok(Json(json!({
      "status": status.as_str(),
      "no_op": true,
    }))),
  }
}

/// POST /api/task/:task_id/retry
pub async fn retry_task(
  State(state): State<AppState>,
  session: SessionId,
  Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
  let record = fetch_owned(&state, session.as_str(), &task_id).await?;
  let reset = state.scheduler.retry(&record).await?;
  Ok(Json(json!({
    "status": "queued",
    "retry_count": reset.retry_count,
  })))
}

/// DELETE /api/task/:task_id
///
/// Purges both the record and every storage object of the task. An in-flight
/// task is signalled first.
pub async fn delete_task(
  State(state): State<AppState>,
  session: SessionId,
  Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
  let record = fetch_owned(&state, session.as_str(), &task_id).await?;
  if !record.status.is_terminal() {
    let _ = state.scheduler.cancel(&record).await;
  }
  state.storage.purge(session.as_str(), &task_id)?;
  state.registry.delete(&task_id).await?;
  tracing::info!(%task_id, "task deleted");
  Ok(Json(json!({ "files_cleaned": true })))
}

/// GET /api/task/statistics
pub async fn task_statistics(
  State(state): State<AppState>,
  session: SessionId,
) -> Result<Json<SessionStats>> {
  Ok(Json(state.registry.statistics(session.as_str()).await?))
}

/// GET /api/task/queue/stats
pub async fn queue_stats(State(state): State<AppState>) -> Json<QueueSnapshot> {
  Json(state.scheduler.queue_snapshot())
}
