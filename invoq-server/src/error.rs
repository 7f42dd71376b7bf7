//! Error types for invoq-server
//!
//! Maps core errors onto HTTP statuses and the wire error format
//! `{"error": true, "code": ..., "message": ...}`. Internal details never
//! reach the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type for invoq-server handlers
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for invoq-server
#[derive(Error, Debug)]
pub enum Error {
  /// Core service error
  #[error(transparent)]
  Core(#[from] invoq::error::Error),

  /// Completed task whose files were swept away
  #[error("Files for this task have expired and were cleaned up")]
  FilesExpired,

  /// Malformed multipart payload
  #[error("Invalid multipart payload: {0}")]
  Multipart(String),
}

impl Error {
  /// Stable wire code for the error payload
  pub fn code(&self) -> &'static str {
    match self {
      Error::Core(core) => core.error_kind(),
      Error::FilesExpired => "FILES_EXPIRED",
      Error::Multipart(_) => "BAD_REQUEST",
    }
  }

  /// HTTP status for the error
  pub fn status(&self) -> StatusCode {
    use invoq::error::Error as Core;
    match self {
      Error::FilesExpired => StatusCode::NOT_FOUND,
      Error::Multipart(_) => StatusCode::BAD_REQUEST,
      Error::Core(core) => match core {
        Core::MissingSession | Core::InvalidSessionId(_) => StatusCode::UNAUTHORIZED,
        Core::TaskNotFound { .. } => StatusCode::NOT_FOUND,
        Core::BadRequest { .. }
        | Core::TaskExists { .. }
        | Core::StaleState { .. }
        | Core::EmptyBatch => StatusCode::BAD_REQUEST,
        Core::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Core::PayloadTooLarge { .. } | Core::Oversize { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Core::Backpressure | Core::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        Core::Shutdown | Core::StorageFull => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
      },
    }
  }

  /// Message safe to show to the client
  fn public_message(&self) -> String {
    if self.status() == StatusCode::INTERNAL_SERVER_ERROR {
      // Never leak internal detail (paths, backend errors)
      "Internal server error".to_string()
    } else {
      self.to_string()
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
      tracing::error!(error = %self, "request failed");
    } else {
      tracing::debug!(error = %self, code = self.code(), "request rejected");
    }
    let body = Json(json!({
      "error": true,
      "code": self.code(),
      "message": self.public_message(),
    }));
    (status, body).into_response()
  }
}
