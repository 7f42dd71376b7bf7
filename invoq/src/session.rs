//! 会话模块
//! Session module
//!
//! 会话只是客户端出示的不透明标签，服务端不为其保存状态；
//! 这里只负责生成与形状校验
//! A session is just an opaque tag presented by the client and the server
//! keeps no state for it; this module only generates ids and checks shape

use crate::base::constants::SESSION_ADVISORY_HOURS;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// 会话引导的响应载荷
/// Session bootstrap response payload
#[derive(Debug, Clone, Serialize)]
pub struct SessionTicket {
  pub session_id: String,
  pub created_at: DateTime<Utc>,
  /// 建议有效期，纯粹是给客户端的提示
  /// Advisory lifetime, purely a hint for the client
  pub expires_in_hours: u64,
}

/// 生成一个新的会话标识
/// Generate a fresh session identifier
pub fn generate_session_id() -> String {
  Uuid::new_v4().to_string()
}

/// 校验客户端出示的会话标识
/// Validate a client-presented session identifier
///
/// 接受 UUID 或浏览器端生成的 `session_<suffix>` 形式；
/// 其余字符会破坏存储路径，直接拒绝
/// Accepts UUIDs or the browser-generated `session_<suffix>` form; anything
/// else would break storage paths and is rejected outright
pub fn validate_session_id(session_id: &str) -> Result<&str> {
  let session_id = session_id.trim();
  if session_id.is_empty() {
    return Err(Error::MissingSession);
  }
  if Uuid::parse_str(session_id).is_ok() {
    return Ok(session_id);
  }
  let browser_form = session_id.len() > 8
    && session_id.len() <= 64
    && session_id.starts_with("session_")
    && session_id
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
  if browser_form {
    return Ok(session_id);
  }
  Err(Error::InvalidSessionId(session_id.to_string()))
}

/// 引导一个会话：接受客户端提供的 ID，缺省时生成新的
/// Bootstrap a session: accept a client-supplied ID, generating one when absent
pub fn bootstrap(client_supplied: Option<&str>) -> Result<SessionTicket> {
  let session_id = match client_supplied {
    Some(id) if !id.trim().is_empty() => validate_session_id(id)?.to_string(),
    _ => generate_session_id(),
  };
  Ok(SessionTicket {
    session_id,
    created_at: Utc::now(),
    expires_in_hours: SESSION_ADVISORY_HOURS,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_generated_ids_are_unique_uuids() {
    let a = generate_session_id();
    let b = generate_session_id();
    assert_ne!(a, b);
    assert!(Uuid::parse_str(&a).is_ok());
  }

  #[test]
  fn test_validate_accepts_uuid_and_browser_form() {
    let id = generate_session_id();
    assert!(validate_session_id(&id).is_ok());
    assert!(validate_session_id("session_abc123_1700000000").is_ok());
  }

  #[test]
  fn test_validate_rejects_unsafe_ids() {
    assert!(matches!(validate_session_id(""), Err(Error::MissingSession)));
    assert!(validate_session_id("../../etc").is_err());
    assert!(validate_session_id("session_a/b").is_err());
    assert!(validate_session_id("short").is_err());
  }

  #[test]
  fn test_bootstrap() {
    let fresh = bootstrap(None).unwrap();
    assert!(Uuid::parse_str(&fresh.session_id).is_ok());
    assert_eq!(fresh.expires_in_hours, 72);

    let kept = bootstrap(Some("session_keepme_42")).unwrap();
    assert_eq!(kept.session_id, "session_keepme_42");
  }
}
