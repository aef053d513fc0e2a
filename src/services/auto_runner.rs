//! Auto-recompare: one session per (project, category) that watches the tender folder,
//! debounces file churn, runs at most one comparison at a time and persists its config.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::db::KeyValueStore;
use crate::error::{CompareError, Result};
use crate::services::detection::{absolutize, is_generated_output, is_lock_file, is_xlsx};
use crate::services::selection::validate_selection;
use crate::types::{
    AutoConfig, AutoScope, AutoStartResult, AutoState, AutoStatus, DetectedFile, DetectionResult,
    FileRole, Job, JobStatus, PendingReason, RunResult, SelectedFile, StartInput, StartResult,
    SuccessResult, DEFAULT_DEBOUNCE_MS, DEFAULT_FALLBACK_MINUTES,
};
use crate::watcher::{ChangeCallback, FolderWatch, WatcherFactory};

pub const STORAGE_KEY: &str = "bidComparison:autoConfigs:v1";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(900);
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(20 * 60);

const UNRESOLVED_REASON: &str = "Ambiguous files were found that need manual mapping.";
const UNSUCCESSFUL_RUN: &str = "Auto-recompare finished without success.";

/// What the orchestrator needs from the comparison side. Implemented by the job runner.
#[async_trait]
pub trait ComparisonBackend: Send + Sync {
    async fn detect_inputs(
        &self,
        folder: &Path,
        suppliers: &[String],
        output_base_name: Option<&str>,
    ) -> Result<DetectionResult>;
    fn start(&self, input: StartInput) -> Result<StartResult>;
    fn get(&self, job_id: &str) -> Option<Job>;
}

#[derive(Debug, Clone, Copy)]
pub struct AutoTiming {
    pub poll_interval: Duration,
    pub job_timeout: Duration,
}

impl Default for AutoTiming {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }
}

/// A detected file with the caller's selection applied on top of the suggestion.
#[derive(Debug, Clone)]
pub struct MergedFile<'a> {
    pub file: &'a DetectedFile,
    pub role: FileRole,
    pub supplier_name: Option<String>,
    pub round: u32,
}

#[derive(Debug, Clone)]
pub enum StartPlan {
    Ready(StartInput),
    Blocked {
        reasons: Vec<String>,
        unresolved_files: Vec<String>,
    },
}

fn resolved(path: &Path) -> PathBuf {
    absolutize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Selection wins over suggestion for role, supplier and round of the same resolved path.
pub fn merge_selected_files<'a>(detected: &'a [DetectedFile], selected: &[SelectedFile]) -> Vec<MergedFile<'a>> {
    let by_path: HashMap<PathBuf, &SelectedFile> =
        selected.iter().map(|s| (resolved(&s.path), s)).collect();

    detected
        .iter()
        .map(|file| {
            let choice = by_path.get(&resolved(&file.path));
            let role = choice.map_or(file.suggested_role, |s| s.role);
            let supplier_name = (role == FileRole::Offer)
                .then(|| {
                    choice
                        .and_then(|s| s.supplier_name.clone())
                        .filter(|s| !s.trim().is_empty())
                        .or_else(|| file.suggested_supplier_name.clone())
                })
                .flatten();
            let round = choice.and_then(|s| s.round).unwrap_or(file.suggested_round);
            MergedFile {
                file,
                role,
                supplier_name,
                round,
            }
        })
        .collect()
}

/// Build the start request for a run, or the reasons it cannot start.
/// Valid templates still marked `ignore` block the run until someone maps them.
pub fn extract_start_input(config: &AutoConfig, merged: &[MergedFile<'_>]) -> StartPlan {
    let base = config.output_base_name();
    let unresolved_files: Vec<String> = merged
        .iter()
        .filter(|m| {
            m.file.is_valid_template()
                && m.role == FileRole::Ignore
                && !is_generated_output(&m.file.path, &base)
        })
        .map(|m| m.file.relative_path.clone())
        .collect();

    let selected_files: Vec<SelectedFile> = merged
        .iter()
        .filter(|m| m.role != FileRole::Ignore)
        .map(|m| {
            let is_offer = m.role == FileRole::Offer;
            SelectedFile {
                path: m.file.path.clone(),
                role: m.role,
                supplier_name: if is_offer { m.supplier_name.clone() } else { None },
                round: is_offer.then_some(m.round),
                mtime_ms: m.file.mtime_ms,
            }
        })
        .collect();

    let mut reasons = validate_selection(&selected_files).err().unwrap_or_default();
    if !unresolved_files.is_empty() {
        reasons.push(UNRESOLVED_REASON.to_string());
    }
    if !reasons.is_empty() {
        return StartPlan::Blocked {
            reasons,
            unresolved_files,
        };
    }

    StartPlan::Ready(StartInput {
        project_id: Some(config.project_id.clone()),
        category_id: Some(config.category_id.clone()),
        folder_path: config.folder_path.clone(),
        output_base_name: Some(base),
        selected_files,
    })
}

/// Only real workbook edits count: no lock files, no other extensions, not our own output.
pub fn should_react_to_file_change(path: &Path, output_base_name: &str) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
        return false;
    };
    !is_lock_file(&name) && is_xlsx(&name) && !is_generated_output(path, output_base_name)
}

/// Fill defaults and clamp limits. The stored config always carries explicit values.
pub fn normalize_config(mut config: AutoConfig) -> AutoConfig {
    config.folder_path = resolved(&config.folder_path);
    config.debounce_ms = Some(config.debounce_ms());
    config.fallback_interval_minutes = Some(config.fallback_interval_minutes());
    config.output_base_name = Some(config.output_base_name());
    config
}

pub fn status_from_config(config: &AutoConfig) -> AutoStatus {
    AutoStatus {
        project_id: config.project_id.clone(),
        category_id: config.category_id.clone(),
        folder_path: config.folder_path.clone(),
        enabled: config.enabled,
        state: if config.enabled {
            AutoState::Watching
        } else {
            AutoState::Inactive
        },
        debounce_ms: config.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS),
        fallback_interval_minutes: config
            .fallback_interval_minutes
            .unwrap_or(DEFAULT_FALLBACK_MINUTES),
        output_base_name: config.output_base_name(),
        pending_reason: PendingReason::None,
        last_run_at: None,
        last_run_result: None,
        last_job_id: None,
        last_error: None,
        unresolved_files: Vec::new(),
        updated_at: Utc::now(),
    }
}

enum RunOutcome {
    Blocked {
        reasons: Vec<String>,
        unresolved_files: Vec<String>,
    },
    Finished(Job),
}

struct SessionState {
    config: AutoConfig,
    status: AutoStatus,
    watcher: Option<Box<dyn FolderWatch>>,
    debounce: Option<JoinHandle<()>>,
    debounce_generation: u64,
    fallback: Option<JoinHandle<()>>,
    running: bool,
    pending_rerun: bool,
    disposed: bool,
    /// Set while the folder watcher is down; runs keep reporting it in `last_error`.
    watcher_error: Option<String>,
}

impl SessionState {
    fn touch(&mut self) {
        self.status.updated_at = Utc::now();
    }

    fn accepts_triggers(&self) -> bool {
        !self.disposed && self.config.enabled
    }
}

struct AutoSession {
    key: String,
    state: Mutex<SessionState>,
    backend: Arc<dyn ComparisonBackend>,
    timing: AutoTiming,
    runtime: Handle,
}

impl AutoSession {
    fn new(
        key: String,
        config: AutoConfig,
        backend: Arc<dyn ComparisonBackend>,
        timing: AutoTiming,
        runtime: Handle,
    ) -> Arc<Self> {
        let status = status_from_config(&config);
        Arc::new(Self {
            key,
            state: Mutex::new(SessionState {
                config,
                status,
                watcher: None,
                debounce: None,
                debounce_generation: 0,
                fallback: None,
                running: false,
                pending_rerun: false,
                disposed: false,
                watcher_error: None,
            }),
            backend,
            timing,
            runtime,
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn status(&self) -> AutoStatus {
        self.lock().status.clone()
    }

    /// Replace the config of a live session. Returns true when the watched folder moved.
    fn update_config(&self, config: AutoConfig) -> bool {
        let mut st = self.lock();
        let folder_changed = st.config.folder_path != config.folder_path;
        st.status.enabled = true;
        st.status.folder_path = config.folder_path.clone();
        st.status.debounce_ms = config.debounce_ms();
        st.status.fallback_interval_minutes = config.fallback_interval_minutes();
        st.status.output_base_name = config.output_base_name();
        st.config = config;
        st.touch();
        folder_changed
    }

    fn start_watcher(self: &Arc<Self>, factory: &dyn WatcherFactory) {
        let folder = {
            let mut st = self.lock();
            st.status.state = AutoState::Watching;
            st.touch();
            st.config.folder_path.clone()
        };

        let weak: Weak<AutoSession> = Arc::downgrade(self);
        let on_change: ChangeCallback = Arc::new(move |_kind: &str, path: &Path| {
            if let Some(session) = weak.upgrade() {
                session.handle_file_change(path);
            }
        });
        let mut watcher = factory.create(&folder, on_change);
        let started = watcher.start();
        {
            let mut st = self.lock();
            match started {
                Ok(()) => {
                    let previous = st.watcher_error.take();
                    if previous.is_some() && st.status.last_error == previous {
                        st.status.last_error = None;
                    }
                }
                Err(err) => {
                    tracing::warn!(scope = %self.key, folder = %folder.display(), error = %err, "folder watcher failed to start");
                    let message = format!("Folder watcher failed: {}", err);
                    st.watcher_error = Some(message.clone());
                    st.status.last_error = Some(message);
                }
            }
            st.touch();
        }

        let previous = {
            let mut st = self.lock();
            if st.disposed {
                Some(watcher)
            } else {
                st.watcher.replace(watcher)
            }
        };
        if let Some(mut stale) = previous {
            stale.stop();
        }
    }

    fn restart_watcher(self: &Arc<Self>, factory: &dyn WatcherFactory) {
        let old = self.lock().watcher.take();
        if let Some(mut old) = old {
            old.stop();
        }
        tracing::info!(scope = %self.key, "watched folder changed, restarting watcher");
        self.start_watcher(factory);
    }

    fn start_fallback_timer(self: &Arc<Self>) {
        let mut st = self.lock();
        if let Some(previous) = st.fallback.take() {
            previous.abort();
        }
        if st.disposed {
            return;
        }
        let period = Duration::from_secs(st.config.fallback_interval_minutes() * 60);
        let weak = Arc::downgrade(self);
        st.fallback = Some(self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(session) = weak.upgrade() else {
                    break;
                };
                session.enqueue_run(PendingReason::Fallback, false);
            }
        }));
    }

    fn handle_file_change(self: &Arc<Self>, path: &Path) {
        let base = self.lock().config.output_base_name();
        if !should_react_to_file_change(path, &base) {
            tracing::trace!(scope = %self.key, path = %path.display(), "ignoring file change");
            return;
        }
        self.enqueue_run(PendingReason::FileChange, true);
    }

    /// Single-flight gate. While a run is in flight the trigger is remembered as one pending rerun.
    fn enqueue_run(self: &Arc<Self>, reason: PendingReason, debounce: bool) {
        let mut st = self.lock();
        if !st.accepts_triggers() {
            return;
        }
        if st.running {
            st.pending_rerun = true;
            st.status.pending_reason = reason;
            st.touch();
            return;
        }

        if debounce {
            if let Some(timer) = st.debounce.take() {
                timer.abort();
            }
            st.debounce_generation += 1;
            let generation = st.debounce_generation;
            let delay = Duration::from_millis(st.config.debounce_ms());
            st.status.pending_reason = match reason {
                PendingReason::PendingRerun => reason,
                _ => PendingReason::Debounce,
            };
            st.touch();
            let weak = Arc::downgrade(self);
            st.debounce = Some(self.runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(session) = weak.upgrade() else {
                    return;
                };
                let started = {
                    let mut st = session.lock();
                    if st.debounce_generation != generation {
                        return;
                    }
                    st.debounce = None;
                    session.try_begin(&mut st, reason)
                };
                if started {
                    session.run_started().await;
                }
            }));
            return;
        }

        if self.try_begin(&mut st, reason) {
            let session = Arc::clone(self);
            drop(st);
            self.runtime.spawn(async move { session.run_started().await });
        }
    }

    fn try_begin(&self, st: &mut SessionState, reason: PendingReason) -> bool {
        if !st.accepts_triggers() {
            return false;
        }
        if st.running {
            st.pending_rerun = true;
            st.status.pending_reason = reason;
            st.touch();
            return false;
        }
        st.running = true;
        st.status.state = AutoState::Running;
        st.status.pending_reason = reason;
        st.status.last_error = st.watcher_error.clone();
        st.status.unresolved_files.clear();
        st.touch();
        tracing::debug!(scope = %self.key, reason = ?reason, "auto-recompare run started");
        true
    }

    async fn run_started(self: Arc<Self>) {
        let outcome = self.execute_run().await;
        self.finish_run(outcome);
    }

    async fn execute_run(&self) -> Result<RunOutcome> {
        let config = self.lock().config.clone();
        let base = config.output_base_name();
        let detection = self
            .backend
            .detect_inputs(&config.folder_path, &config.known_suppliers, Some(&base))
            .await?;
        let merged = merge_selected_files(&detection.files, &config.selected_files);

        let input = match extract_start_input(&config, &merged) {
            StartPlan::Ready(input) => input,
            StartPlan::Blocked {
                reasons,
                unresolved_files,
            } => {
                return Ok(RunOutcome::Blocked {
                    reasons,
                    unresolved_files,
                })
            }
        };

        if self.lock().disposed {
            return Err(CompareError::Cancelled);
        }
        let StartResult { job_id } = self.backend.start(input)?;
        {
            let mut st = self.lock();
            st.status.last_job_id = Some(job_id.clone());
            st.touch();
        }
        let job = self.wait_for_terminal_job(&job_id).await?;
        Ok(RunOutcome::Finished(job))
    }

    async fn wait_for_terminal_job(&self, job_id: &str) -> Result<Job> {
        let poll = async {
            loop {
                let Some(job) = self.backend.get(job_id) else {
                    return Err(CompareError::JobNotFound(job_id.to_string()));
                };
                if job.status.is_terminal() {
                    return Ok(job);
                }
                tokio::time::sleep(self.timing.poll_interval).await;
            }
        };
        tokio::time::timeout(self.timing.job_timeout, poll)
            .await
            .map_err(|_| CompareError::Timeout(job_id.to_string()))?
    }

    fn finish_run(self: &Arc<Self>, outcome: Result<RunOutcome>) {
        let mut st = self.lock();
        if st.disposed {
            st.running = false;
            return;
        }
        match outcome {
            Ok(RunOutcome::Blocked {
                reasons,
                unresolved_files,
            }) => {
                tracing::info!(scope = %self.key, reasons = ?reasons, "auto-recompare blocked on file mapping");
                st.status.state = AutoState::WaitingMapping;
                st.status.last_run_result = Some(RunResult::Blocked);
                st.status.last_error = Some(reasons.join(" "));
                st.status.unresolved_files = unresolved_files;
                st.status.pending_reason = PendingReason::UnresolvedMapping;
            }
            Ok(RunOutcome::Finished(job)) => {
                st.status.last_run_at = Some(Utc::now());
                st.status.pending_reason = PendingReason::None;
                st.status.unresolved_files.clear();
                if job.status == JobStatus::Success {
                    st.status.state = AutoState::Watching;
                    st.status.last_run_result = Some(RunResult::Success);
                    st.status.last_error = st.watcher_error.clone();
                } else {
                    st.status.state = AutoState::Error;
                    st.status.last_run_result = Some(RunResult::Error);
                    st.status.last_error =
                        Some(job.error.unwrap_or_else(|| UNSUCCESSFUL_RUN.to_string()));
                }
            }
            Err(err) => {
                tracing::warn!(scope = %self.key, error = %err, "auto-recompare run failed");
                st.status.state = AutoState::Error;
                st.status.last_run_result = Some(RunResult::Error);
                st.status.last_error = Some(err.to_string());
            }
        }
        st.running = false;
        st.touch();

        if !st.accepts_triggers() {
            return;
        }
        if st.pending_rerun {
            st.pending_rerun = false;
            drop(st);
            self.enqueue_run(PendingReason::PendingRerun, true);
        }
    }

    /// Release watcher and timers. Idempotent.
    fn dispose(&self, keep_enabled: bool) {
        let watcher = {
            let mut st = self.lock();
            st.disposed = true;
            st.config.enabled = keep_enabled;
            if let Some(timer) = st.debounce.take() {
                timer.abort();
            }
            if let Some(timer) = st.fallback.take() {
                timer.abort();
            }
            st.status.enabled = keep_enabled;
            st.status.state = if keep_enabled {
                AutoState::Watching
            } else {
                AutoState::Inactive
            };
            st.status.pending_reason = PendingReason::None;
            st.touch();
            st.watcher.take()
        };
        if let Some(mut watcher) = watcher {
            watcher.stop();
        }
    }
}

pub struct AutoRunner {
    store: Arc<dyn KeyValueStore>,
    backend: Arc<dyn ComparisonBackend>,
    watchers: Arc<dyn WatcherFactory>,
    timing: AutoTiming,
    sessions: tokio::sync::Mutex<HashMap<String, Arc<AutoSession>>>,
}

impl AutoRunner {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn ComparisonBackend>,
        watchers: Arc<dyn WatcherFactory>,
    ) -> Self {
        Self::with_timing(store, backend, watchers, AutoTiming::default())
    }

    pub fn with_timing(
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn ComparisonBackend>,
        watchers: Arc<dyn WatcherFactory>,
        timing: AutoTiming,
    ) -> Self {
        Self {
            store,
            backend,
            watchers,
            timing,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn load_persisted(&self) -> Result<BTreeMap<String, AutoConfig>> {
        let Some(raw) = self.store.get(STORAGE_KEY)? else {
            return Ok(BTreeMap::new());
        };
        match serde_json::from_str::<BTreeMap<String, AutoConfig>>(&raw) {
            Ok(map) => Ok(map
                .into_iter()
                .map(|(key, config)| (key, normalize_config(config)))
                .collect()),
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable auto-recompare configs");
                Ok(BTreeMap::new())
            }
        }
    }

    fn save_persisted(&self, map: &BTreeMap<String, AutoConfig>) -> Result<()> {
        self.store.set(STORAGE_KEY, &serde_json::to_string(map)?)
    }

    /// Persist the config as enabled, then create or update the live session and run right away.
    pub async fn auto_start(&self, config: AutoConfig) -> Result<AutoStartResult> {
        let mut config = normalize_config(config);
        config.enabled = true;
        let key = config.scope().key();

        let mut sessions = self.sessions.lock().await;
        let mut persisted = self.load_persisted()?;
        persisted.insert(key.clone(), config.clone());
        self.save_persisted(&persisted)?;

        if let Some(existing) = sessions.get(&key) {
            if existing.update_config(config) {
                existing.restart_watcher(self.watchers.as_ref());
            }
            existing.start_fallback_timer();
            existing.enqueue_run(PendingReason::ManualUpdate, false);
            return Ok(AutoStartResult {
                success: true,
                status: existing.status(),
            });
        }

        tracing::info!(scope = %key, folder = %config.folder_path.display(), "auto-recompare started");
        let session = AutoSession::new(
            key.clone(),
            config,
            self.backend.clone(),
            self.timing,
            Handle::current(),
        );
        session.start_watcher(self.watchers.as_ref());
        session.start_fallback_timer();
        session.enqueue_run(PendingReason::ManualUpdate, false);
        let status = session.status();
        sessions.insert(key, session);

        Ok(AutoStartResult {
            success: true,
            status,
        })
    }

    pub async fn auto_stop(&self, scope: &AutoScope) -> Result<SuccessResult> {
        let key = scope.key();
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.remove(&key) {
            session.dispose(false);
            tracing::info!(scope = %key, "auto-recompare stopped");
        }

        let mut persisted = self.load_persisted()?;
        if let Some(config) = persisted.get_mut(&key) {
            config.enabled = false;
            self.save_persisted(&persisted)?;
        }
        Ok(SuccessResult { success: true })
    }

    /// Live status, else one derived from the stored config; `None` if the scope was never started.
    pub async fn auto_status(&self, scope: &AutoScope) -> Result<Option<AutoStatus>> {
        let key = scope.key();
        let sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&key) {
            return Ok(Some(session.status()));
        }
        Ok(self.load_persisted()?.get(&key).map(status_from_config))
    }

    pub async fn auto_list(&self) -> Result<Vec<AutoStatus>> {
        let sessions = self.sessions.lock().await;
        let mut by_key: HashMap<String, AutoStatus> = self
            .load_persisted()?
            .iter()
            .map(|(key, config)| (key.clone(), status_from_config(config)))
            .collect();
        for (key, session) in sessions.iter() {
            by_key.insert(key.clone(), session.status());
        }
        let mut statuses: Vec<AutoStatus> = by_key.into_values().collect();
        statuses.sort_by_key(|s| format!("{}-{}", s.project_id, s.category_id));
        Ok(statuses)
    }

    /// Restart every persisted scope that is still enabled. Returns how many came back.
    pub async fn restore_persisted_sessions(&self) -> Result<usize> {
        let enabled: Vec<AutoConfig> = self
            .load_persisted()?
            .into_values()
            .filter(|config| config.enabled)
            .collect();
        let mut restored = 0;
        for config in enabled {
            let scope = config.scope().key();
            match self.auto_start(config).await {
                Ok(_) => restored += 1,
                Err(err) => {
                    tracing::warn!(scope = %scope, error = %err, "failed to restore auto-recompare session")
                }
            }
        }
        tracing::info!(restored, "auto-recompare sessions restored");
        Ok(restored)
    }

    /// Stop all live sessions but keep them enabled in the store, so the next start restores them.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.lock().await;
        for (key, session) in sessions.drain() {
            session.dispose(true);
            tracing::debug!(scope = %key, "auto-recompare session disposed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DetectionAnalysis;

    fn detected(path: &str, role: FileRole, supplier: Option<&str>, valid: bool) -> DetectedFile {
        DetectedFile {
            path: PathBuf::from(path),
            relative_path: Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_name: String::new(),
            size_bytes: 1,
            mtime_ms: 1,
            suggested_role: role,
            suggested_supplier_name: supplier.map(String::from),
            suggested_round: 1,
            analysis: Some(DetectionAnalysis {
                is_valid_template: valid,
                cost_row_count: usize::from(valid),
                ..Default::default()
            }),
            analysis_error: None,
        }
    }

    fn config() -> AutoConfig {
        AutoConfig {
            project_id: "p".to_string(),
            category_id: "c".to_string(),
            folder_path: PathBuf::from("/t"),
            known_suppliers: vec![],
            selected_files: vec![],
            enabled: true,
            debounce_ms: None,
            fallback_interval_minutes: None,
            output_base_name: None,
        }
    }

    #[test]
    fn selection_overrides_suggestion() {
        let files = vec![
            detected("/t/zadani.xlsx", FileRole::Specification, None, true),
            detected("/t/mystery.xlsx", FileRole::Ignore, None, true),
        ];
        let selected = vec![SelectedFile {
            path: PathBuf::from("/t/mystery.xlsx"),
            role: FileRole::Offer,
            supplier_name: Some("PBK".to_string()),
            round: Some(2),
            mtime_ms: 0,
        }];
        let merged = merge_selected_files(&files, &selected);
        assert_eq!(merged[1].role, FileRole::Offer);
        assert_eq!(merged[1].supplier_name.as_deref(), Some("PBK"));
        assert_eq!(merged[1].round, 2);
        assert_eq!(merged[0].supplier_name, None);

        match extract_start_input(&config(), &merged) {
            StartPlan::Ready(input) => {
                assert_eq!(input.selected_files.len(), 2);
                assert_eq!(input.output_base_name.as_deref(), Some("porovnani_nabidek"));
                assert_eq!(input.selected_files[0].round, None);
            }
            StartPlan::Blocked { reasons, .. } => panic!("unexpected block: {:?}", reasons),
        }
    }

    #[test]
    fn unresolved_valid_template_blocks_the_run() {
        let files = vec![
            detected("/t/zadani.xlsx", FileRole::Specification, None, true),
            detected("/t/drywall.xlsx", FileRole::Offer, Some("Drywall"), true),
            detected("/t/unknown.xlsx", FileRole::Ignore, None, true),
            detected("/t/notes.xlsx", FileRole::Ignore, None, false),
            detected("/t/porovnani_nabidek_latest.xlsx", FileRole::Ignore, None, true),
        ];
        let merged = merge_selected_files(&files, &[]);
        match extract_start_input(&config(), &merged) {
            StartPlan::Blocked {
                reasons,
                unresolved_files,
            } => {
                assert_eq!(unresolved_files, vec!["unknown.xlsx".to_string()]);
                assert_eq!(reasons, vec![UNRESOLVED_REASON.to_string()]);
            }
            StartPlan::Ready(_) => panic!("expected a blocked run"),
        }
    }

    #[test]
    fn file_change_filter() {
        let base = "porovnani_nabidek";
        assert!(should_react_to_file_change(Path::new("/t/PBK_kolo2.xlsx"), base));
        assert!(!should_react_to_file_change(Path::new("/t/~$PBK_kolo2.xlsx"), base));
        assert!(!should_react_to_file_change(Path::new("/t/notes.txt"), base));
        assert!(!should_react_to_file_change(Path::new("/t/porovnani_nabidek_latest.xlsx"), base));
    }

    #[test]
    fn own_output_with_separator_in_base_name_is_ignored() {
        assert!(!should_react_to_file_change(
            Path::new("/t/nabidky_2024_latest.xlsx"),
            "nabidky/2024"
        ));
        assert!(!should_react_to_file_change(
            Path::new("/t/nabidky_2024_20240101_120000.xlsx"),
            "nabidky\\2024"
        ));
        assert!(should_react_to_file_change(Path::new("/t/nabidky_kolo1.xlsx"), "nabidky/2024"));
    }

    #[test]
    fn normalization_clamps_and_defaults() {
        let mut raw = config();
        raw.debounce_ms = Some(10);
        raw.fallback_interval_minutes = Some(0);
        raw.output_base_name = Some("   ".to_string());
        let normalized = normalize_config(raw);
        assert_eq!(normalized.debounce_ms, Some(1_000));
        assert_eq!(normalized.fallback_interval_minutes, Some(1));
        assert_eq!(normalized.output_base_name.as_deref(), Some("porovnani_nabidek"));

        let defaults = normalize_config(config());
        assert_eq!(defaults.debounce_ms, Some(DEFAULT_DEBOUNCE_MS));
        assert_eq!(defaults.fallback_interval_minutes, Some(DEFAULT_FALLBACK_MINUTES));
    }

    #[test]
    fn disabled_config_derives_inactive_status() {
        let mut cfg = normalize_config(config());
        cfg.enabled = false;
        let status = status_from_config(&cfg);
        assert_eq!(status.state, AutoState::Inactive);
        assert!(!status.enabled);
        assert_eq!(status.scope(), AutoScope::new("p", "c"));
    }
}
