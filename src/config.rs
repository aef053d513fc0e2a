use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::auto_runner::{AutoTiming, DEFAULT_JOB_TIMEOUT, DEFAULT_POLL_INTERVAL};

const APP_DIR_NAME: &str = "bid-comparison";
const DB_FILE_NAME: &str = "bid_comparison.db";

/// Process configuration. Per-scope auto-run settings live in `AutoConfig`, not here.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    pub log_filter: String,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl AppConfig {
    /// Load `.env` from the data dir (so installed users can drop settings there), then read the environment.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("BID_COMPARISON_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());
        load_dotenv(&data_dir);
        // .env may itself move the data dir
        let data_dir = std::env::var("BID_COMPARISON_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(data_dir);

        Self {
            db_path: std::env::var("BID_COMPARISON_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join(DB_FILE_NAME)),
            poll_interval: env_u64("BID_COMPARISON_POLL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            job_timeout: env_u64("BID_COMPARISON_JOB_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_JOB_TIMEOUT),
            log_filter: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            data_dir,
        }
    }

    pub fn timing(&self) -> AutoTiming {
        AutoTiming {
            poll_interval: self.poll_interval,
            job_timeout: self.job_timeout,
        }
    }
}

fn load_dotenv(data_dir: &Path) {
    let env_path = data_dir.join(".env");
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }
}
