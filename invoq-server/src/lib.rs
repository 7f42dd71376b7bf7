//! Invoq server library
//!
//! The HTTP surface of the invoice imposition service: an axum router over
//! the core scheduler, registry and storage. The binary in `main.rs` wires
//! it to a listener; tests drive the router directly.

pub mod error;
pub mod handlers;
pub mod session;
pub mod state;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use invoq::config::Config;
use invoq::scheduler::Scheduler;
use invoq::storage::StorageManager;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Assemble the application state from a configuration
pub async fn build_state(config: Config) -> error::Result<AppState> {
  let storage = Arc::new(StorageManager::new(&config)?);
  let registry = invoq::connect_registry(&config).await?;
  let scheduler = Arc::new(Scheduler::new(
    config.clone(),
    Arc::clone(&registry),
    Arc::clone(&storage),
  ));
  Ok(AppState::new(config, registry, storage, scheduler))
}

/// Build the router over the given state
pub fn router(state: AppState) -> Router {
  // Multipart bodies may carry a whole batch; size each request generously
  // relative to the per-file cap
  let body_limit = (state.config.max_file_size as usize).saturating_mul(8);
  Router::new()
    .route("/api/session", post(handlers::session::create_session))
    .route("/api/health", get(handlers::health::health))
    .route("/api/upload/", post(handlers::upload::upload_files))
    .route("/api/upload/limits", get(handlers::upload::upload_limits))
    .route("/api/task/", get(handlers::tasks::list_tasks))
    .route("/api/task/statistics", get(handlers::tasks::task_statistics))
    .route("/api/task/queue/stats", get(handlers::tasks::queue_stats))
    .route("/api/task/:task_id/status", get(handlers::tasks::task_status))
    .route(
      "/api/task/:task_id/progress",
      get(handlers::tasks::task_progress),
    )
    .route("/api/task/:task_id/start", post(handlers::tasks::start_task))
    .route("/api/task/:task_id/cancel", post(handlers::tasks::cancel_task))
    .route("/api/task/:task_id/retry", post(handlers::tasks::retry_task))
    .route("/api/task/:task_id", delete(handlers::tasks::delete_task))
    .route(
      "/api/download/:task_id/:file_name",
      get(handlers::download::download_file),
    )
    .route("/api/cleanup/files", post(handlers::cleanup::trigger_sweep))
    .route("/api/cleanup/storage", get(handlers::cleanup::storage_usage))
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
