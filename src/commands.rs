use crate::db::KeyValueStore;
use crate::services::auto_runner::{AutoRunner, AutoTiming, ComparisonBackend};
use crate::services::runner::ComparisonRunner;
use crate::types::{
    output_base_name_or_default, AutoConfig, AutoScope, AutoStartResult, AutoStatus,
    DetectionResult, Job, JobFilter, StartInput, StartResult, SuccessResult,
};
use crate::watcher::{NotifyWatcherFactory, WatcherFactory};
use std::path::Path;
use std::sync::Arc;

/// Shared handles behind every command.
pub struct AppState {
    pub runner: ComparisonRunner,
    pub auto: AutoRunner,
}

impl AppState {
    pub fn new(store: Arc<dyn KeyValueStore>, timing: AutoTiming) -> Self {
        Self::with_watchers(store, Arc::new(NotifyWatcherFactory::default()), timing)
    }

    pub fn with_watchers(
        store: Arc<dyn KeyValueStore>,
        watchers: Arc<dyn WatcherFactory>,
        timing: AutoTiming,
    ) -> Self {
        let runner = ComparisonRunner::new();
        let backend: Arc<dyn ComparisonBackend> = Arc::new(runner.clone());
        Self {
            auto: AutoRunner::with_timing(store, backend, watchers, timing),
            runner,
        }
    }
}

pub async fn detect_inputs(
    state: &AppState,
    folder_path: String,
    suppliers: Vec<String>,
    output_base_name: Option<String>,
) -> Result<DetectionResult, String> {
    let base = output_base_name_or_default(output_base_name.as_deref());
    state
        .runner
        .detect_inputs(Path::new(&folder_path), &suppliers, Some(&base))
        .await
        .map_err(|e| e.to_string())
}

pub fn start_comparison(state: &AppState, input: StartInput) -> Result<StartResult, String> {
    state.runner.start(input).map_err(|e| e.to_string())
}

pub fn get_job(state: &AppState, job_id: String) -> Result<Option<Job>, String> {
    Ok(state.runner.get(&job_id))
}

pub fn list_jobs(state: &AppState, filter: Option<JobFilter>) -> Result<Vec<Job>, String> {
    Ok(state.runner.list(&filter.unwrap_or_default()))
}

pub fn cancel_job(state: &AppState, job_id: String) -> Result<SuccessResult, String> {
    Ok(state.runner.cancel(&job_id))
}

pub async fn auto_start(state: &AppState, config: AutoConfig) -> Result<AutoStartResult, String> {
    state.auto.auto_start(config).await.map_err(|e| e.to_string())
}

pub async fn auto_stop(state: &AppState, scope: AutoScope) -> Result<SuccessResult, String> {
    state.auto.auto_stop(&scope).await.map_err(|e| e.to_string())
}

pub async fn auto_status(state: &AppState, scope: AutoScope) -> Result<Option<AutoStatus>, String> {
    state.auto.auto_status(&scope).await.map_err(|e| e.to_string())
}

pub async fn auto_list(state: &AppState) -> Result<Vec<AutoStatus>, String> {
    state.auto.auto_list().await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn rejected_start_is_reported_as_text_and_creates_no_job() {
        let state = AppState::new(Arc::new(MemoryStore::default()), AutoTiming::default());
        let err = start_comparison(
            &state,
            StartInput {
                project_id: None,
                category_id: None,
                folder_path: std::path::PathBuf::from("/t"),
                output_base_name: None,
                selected_files: Vec::new(),
            },
        )
        .expect_err("empty selection");
        assert_eq!(
            err,
            "Exactly one specification file must be selected (found 0). At least one supplier offer must be selected."
        );
        assert!(list_jobs(&state, None).expect("list").is_empty());
        assert!(!cancel_job(&state, "nope".to_string()).expect("cancel").success);
        assert!(auto_list(&state).await.expect("auto list").is_empty());
    }
}
