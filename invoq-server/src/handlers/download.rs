//! Download handlers
//!
//! Bytes are served only after the joint record-ownership and
//! path-confinement check. Download routes additionally accept the session
//! id as a `?session=` query parameter so inline previews inside iframes
//! can authenticate.

use crate::error::{Error, Result};
use crate::handlers::fetch_owned;
use crate::session::SESSION_HEADER;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use invoq::session::validate_session_id;
use invoq::task::TaskStatus;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
  pub session: Option<String>,
  pub inline: Option<bool>,
}

/// GET /api/download/:task_id/:file_name
///
/// `Content-Disposition` is `attachment` by default and `inline` with
/// `?inline=true`. Responses always carry no-cache headers. A HEAD request
/// on the same route returns the headers without a body.
pub async fn download_file(
  State(state): State<AppState>,
  headers: HeaderMap,
  Path((task_id, file_name)): Path<(String, String)>,
  Query(query): Query<DownloadQuery>,
) -> Result<Response> {
  let session_id = resolve_session(&headers, query.session.as_deref())?;
  let record = fetch_owned(&state, &session_id, &task_id).await?;

  match record.status {
    TaskStatus::Completed => {}
    // The record outlived its files; tell the client why the bytes are gone
    TaskStatus::Expired => return Err(Error::FilesExpired),
    _ => {
      return Err(Error::from(invoq::error::Error::TaskNotFound {
        id: task_id.clone(),
      }))
    }
  }

  let path = state.storage.open_for_read(&session_id, &task_id, &file_name)?;
  let bytes = std::fs::read(&path).map_err(invoq::error::Error::from)?;

  let disposition = if query.inline.unwrap_or(false) {
    format!("inline; filename=\"{file_name}\"")
  } else {
    format!("attachment; filename=\"{file_name}\"")
  };
  tracing::info!(%task_id, file = %file_name, size = bytes.len(), "serving download");

  let response = (
    StatusCode::OK,
    [
      (header::CONTENT_TYPE, "application/pdf".to_string()),
      (header::CONTENT_DISPOSITION, disposition),
      (
        header::CACHE_CONTROL,
        "no-cache, no-store, must-revalidate".to_string(),
      ),
      (header::PRAGMA, "no-cache".to_string()),
    ],
    bytes,
  )
    .into_response();
  Ok(response)
}

/// Session from the header, falling back to the query parameter
fn resolve_session(headers: &HeaderMap, query_session: Option<&str>) -> Result<String> {
  let raw = headers
    .get(SESSION_HEADER)
    .and_then(|value| value.to_str().ok())
    .or(query_session)
    .ok_or(invoq::error::Error::MissingSession)?;
  Ok(validate_session_id(raw)?.to_string())
}
