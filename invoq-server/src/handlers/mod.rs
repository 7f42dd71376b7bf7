//! Request handlers
//!
//! Stateless JSON-over-HTTP handlers for the job lifecycle. Ownership is
//! enforced on every task-addressed route: a record owned by another session
//! is reported as not found, never as forbidden.

pub mod cleanup;
pub mod download;
pub mod health;
pub mod session;
pub mod tasks;
pub mod upload;

use crate::error::{Error, Result};
use crate::state::AppState;
use invoq::task::TaskRecord;

/// Fetch a record and enforce the session-ownership rule
///
/// Both "no such id" and "not your id" collapse into `NOT_FOUND` so that
/// probing ids reveals nothing.
pub(crate) async fn fetch_owned(
  state: &AppState,
  session_id: &str,
  task_id: &str,
) -> Result<TaskRecord> {
  let record = state
    .registry
    .get(task_id)
    .await?
    .ok_or_else(|| invoq::error::Error::TaskNotFound {
      id: task_id.to_string(),
    })?;
  if record.session_id != session_id {
    return Err(Error::from(invoq::error::Error::TaskNotFound {
      id: task_id.to_string(),
    }));
  }
  Ok(record)
}
