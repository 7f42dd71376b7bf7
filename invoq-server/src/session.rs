//! Session extraction
//!
//! Every handler except session bootstrap and health requires the opaque
//! session identifier in the `X-Session-ID` header. The server never
//! authenticates it; the only protection is the not-found-on-mismatch rule
//! applied by the task handlers.

use crate::error::Error;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use invoq::session::validate_session_id;

/// Header carrying the session identifier
pub const SESSION_HEADER: &str = "x-session-id";

/// Extracted session identifier
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

impl SessionId {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for SessionId
where
  S: Send + Sync,
{
  type Rejection = Error;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    let header = parts
      .headers
      .get(SESSION_HEADER)
      .and_then(|value| value.to_str().ok())
      .ok_or(invoq::error::Error::MissingSession)?;
    let session_id = validate_session_id(header)?;
    Ok(SessionId(session_id.to_string()))
  }
}
