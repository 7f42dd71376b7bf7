//! Invoq server binary
//!
//! Parses the environment once, wires storage, registry, scheduler and
//! sweeper together, and serves the HTTP surface until a termination signal
//! arrives. On shutdown the listener stops accepting immediately while the
//! scheduler drains its active workers.

use invoq::config::Config;
use invoq::scheduler::Sweeper;
use invoq_server::{build_state, router};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialize logging
  tracing_subscriber::registry()
    .with(fmt::layer())
    .with(
      EnvFilter::from_default_env()
        .add_directive("invoq=info".parse()?)
        .add_directive("invoq_server=info".parse()?),
    )
    .init();

  let config = Config::from_env()?;
  info!(
    storage_root = %config.storage_root.display(),
    queue_url = %config.queue_url,
    workers = config.max_concurrent_tasks,
    "starting invoq-server"
  );

  let state = build_state(config).await?;
  let scheduler = Arc::clone(&state.scheduler);
  scheduler.start();
  let sweeper_handle = Sweeper::new(Arc::clone(&scheduler)).start();

  let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
  let listener = tokio::net::TcpListener::bind(&addr).await?;
  info!(%addr, "listening");

  let app = router(state);
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!("termination signal received, refusing new requests");
    })
    .await?;

  // Drain the workers up to the configured deadline, then stop the sweeper
  scheduler.shutdown().await;
  sweeper_handle.abort();
  info!("invoq-server stopped");
  Ok(())
}
