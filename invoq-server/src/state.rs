//! Shared application state
//!
//! Handlers are stateless; everything they need hangs off this value.

use invoq::base::Registry;
use invoq::config::Config;
use invoq::scheduler::Scheduler;
use invoq::storage::StorageManager;
use std::sync::Arc;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
  pub config: Arc<Config>,
  pub registry: Arc<dyn Registry>,
  pub storage: Arc<StorageManager>,
  pub scheduler: Arc<Scheduler>,
}

impl AppState {
  /// Assemble the state from already-constructed parts
  pub fn new(
    config: Config,
    registry: Arc<dyn Registry>,
    storage: Arc<StorageManager>,
    scheduler: Arc<Scheduler>,
  ) -> Self {
    Self {
      config: Arc::new(config),
      registry,
      storage,
      scheduler,
    }
  }
}
