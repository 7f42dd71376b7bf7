//! Batch upload handler
//!
//! A multipart batch yields exactly one task. Files are validated by magic
//! bytes, not by the declared MIME type, and nothing is kept on disk when
//! admission fails.

use crate::error::{Error, Result};
use crate::session::SessionId;
use crate::state::AppState;
use axum::extract::{Multipart, State};
use axum::Json;
use chrono::{DateTime, Utc};
use invoq::task::TaskRecord;
use serde::Serialize;

/// One validated part of the batch
struct UploadedFile {
  name: String,
  data: Vec<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
  pub task_id: String,
  pub status: &'static str,
  pub file_count: usize,
  pub created_at: DateTime<Utc>,
}

/// POST /api/upload/
pub async fn upload_files(
  State(state): State<AppState>,
  session: SessionId,
  mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
  // Refuse before reading bodies so a full queue retains nothing
  state.scheduler.admit()?;

  let mut files: Vec<UploadedFile> = Vec::new();
  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|error| Error::Multipart(error.to_string()))?
  {
    let Some(file_name) = field.file_name().map(|name| name.to_string()) else {
      // Non-file form fields are ignored
      continue;
    };
    let data = field
      .bytes()
      .await
      .map_err(|error| Error::Multipart(error.to_string()))?;
    validate_file(&file_name, &data, state.config.max_file_size)?;
    files.push(UploadedFile {
      name: file_name,
      data: data.to_vec(),
    });
  }

  if files.is_empty() {
    return Err(Error::from(invoq::error::Error::bad_request(
      "no files provided",
    )));
  }

  let record = TaskRecord::new(session.as_str());
  let mut input_refs = Vec::with_capacity(files.len());
  for (ordinal, file) in files.iter().enumerate() {
    let path = state.storage.store_upload(
      session.as_str(),
      &record.task_id,
      ordinal,
      &file.name,
      &file.data,
    )?;
    input_refs.push(path.to_string_lossy().into_owned());
  }
  let record = record.with_inputs(input_refs);
  let task_id = record.task_id.clone();
  let created_at = record.created_at;
  let file_count = record.file_count;

  if let Err(error) = state.scheduler.submit(record).await {
    // Admission lost a race; nothing of the batch survives
    if let Err(purge_error) = state.storage.purge(session.as_str(), &task_id) {
      tracing::warn!(%task_id, %purge_error, "failed to discard refused upload");
    }
    return Err(error.into());
  }

  tracing::info!(%task_id, file_count, session_id = session.as_str(), "batch accepted");
  Ok(Json(UploadResponse {
    task_id,
    status: "queued",
    file_count,
    created_at,
  }))
}

#[derive(Debug, Serialize)]
pub struct UploadLimits {
  pub max_file_size: u64,
  pub allowed_extensions: Vec<&'static str>,
  pub allowed_types: Vec<&'static str>,
}

/// GET /api/upload/limits
pub async fn upload_limits(State(state): State<AppState>) -> Json<UploadLimits> {
  Json(UploadLimits {
    max_file_size: state.config.max_file_size,
    allowed_extensions: vec![".pdf", ".zip"],
    allowed_types: vec!["application/pdf", "application/zip"],
  })
}

/// Per-file validation: non-empty, magic bytes, size cap
fn validate_file(name: &str, data: &[u8], max_file_size: u64) -> Result<()> {
  if data.is_empty() {
    return Err(Error::from(invoq::error::Error::bad_request(format!(
      "empty file: {name}"
    ))));
  }
  if data.len() as u64 > max_file_size {
    return Err(Error::from(invoq::error::Error::PayloadTooLarge {
      size: data.len() as u64,
      limit: max_file_size,
    }));
  }
  let is_pdf = data.starts_with(b"%PDF-");
  let is_zip = data.starts_with(b"PK\x03\x04");
  if !is_pdf && !is_zip {
    return Err(Error::from(invoq::error::Error::UnsupportedMediaType {
      name: name.to_string(),
    }));
  }
  Ok(())
}
