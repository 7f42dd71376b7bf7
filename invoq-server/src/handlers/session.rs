//! Session bootstrap handler

use crate::error::Result;
use crate::session::SESSION_HEADER;
use axum::http::HeaderMap;
use axum::Json;
use invoq::session::{bootstrap, SessionTicket};

/// POST /api/session
///
/// Accepts an optional client-supplied id in `X-Session-ID`; generates a
/// fresh one otherwise. Returns the id with its creation time and the
/// advisory expiry.
pub async fn create_session(headers: HeaderMap) -> Result<Json<SessionTicket>> {
  let supplied = headers
    .get(SESSION_HEADER)
    .and_then(|value| value.to_str().ok());
  let ticket = bootstrap(supplied)?;
  tracing::info!(session_id = %ticket.session_id, "session bootstrapped");
  Ok(Json(ticket))
}
