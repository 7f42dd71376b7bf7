//! Liveness handler

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
  pub registry: bool,
  pub storage: bool,
  pub scheduler: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
  pub status: &'static str,
  pub version: &'static str,
  pub services: ServiceHealth,
  pub timestamp: DateTime<Utc>,
}

/// GET /api/health
///
/// Degrades to 503 when any backing service fails its probe.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
  let registry = state.registry.ping().await.is_ok();
  let storage = state.storage.check_writable().is_ok();
  let scheduler = state.scheduler.is_running();

  let healthy = registry && storage && scheduler;
  let response = HealthResponse {
    status: if healthy { "healthy" } else { "degraded" },
    version: invoq::base::constants::VERSION,
    services: ServiceHealth {
      registry,
      storage,
      scheduler,
    },
    timestamp: Utc::now(),
  };
  let code = if healthy {
    StatusCode::OK
  } else {
    StatusCode::SERVICE_UNAVAILABLE
  };
  (code, Json(response))
}
