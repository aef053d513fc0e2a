pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod excel;
pub mod models;
pub mod services;
pub mod types;
pub mod watcher;

pub use commands::AppState;
pub use config::AppConfig;
pub use error::{CompareError, Result};

use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

pub fn init_logging(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Daemon entry: restore enabled auto-recompare scopes, keep them running until Ctrl-C.
pub async fn run() -> Result<()> {
    let config = AppConfig::from_env();
    init_logging(&config.log_filter);
    tracing::info!(data_dir = %config.data_dir.display(), db = %config.db_path.display(), "starting bid comparison service");

    let db = db::Db::new(config.db_path.clone())?;
    tracing::debug!(schema_version = db.schema_version()?, "database ready");
    let state = AppState::new(Arc::new(db), config.timing());
    let restored = state.auto.restore_persisted_sessions().await?;
    tracing::info!(restored, "watching tender folders; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    state.auto.shutdown().await;
    Ok(())
}
