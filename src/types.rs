use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::HeaderColumnMap;

pub const DEFAULT_OUTPUT_BASE_NAME: &str = "porovnani_nabidek";
pub const DEFAULT_DEBOUNCE_MS: u64 = 10_000;
pub const MIN_DEBOUNCE_MS: u64 = 1_000;
pub const DEFAULT_FALLBACK_MINUTES: u64 = 15;

/// Trimmed output base name, falling back to the default when blank.
/// Path separators become `_` so the name always stays inside the input folder.
pub fn output_base_name_or_default(name: Option<&str>) -> String {
    name.map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_OUTPUT_BASE_NAME)
        .replace(['/', '\\'], "_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    Specification,
    Offer,
    Ignore,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionAnalysis {
    pub header_row_index: Option<u32>,
    pub cost_row_count: usize,
    pub priced_cost_row_count: usize,
    pub column_map: HeaderColumnMap,
    pub is_valid_template: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub mtime_ms: u64,
    pub suggested_role: FileRole,
    pub suggested_supplier_name: Option<String>,
    pub suggested_round: u32,
    pub analysis: Option<DetectionAnalysis>,
    pub analysis_error: Option<String>,
}

impl DetectedFile {
    pub fn is_valid_template(&self) -> bool {
        self.analysis
            .as_ref()
            .map(|a| a.is_valid_template)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub folder_path: PathBuf,
    pub files: Vec<DetectedFile>,
    pub warnings: Vec<String>,
}

/// A caller-confirmed file role. `supplier_name` is required for offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedFile {
    pub path: PathBuf,
    pub role: FileRole,
    #[serde(default)]
    pub supplier_name: Option<String>,
    #[serde(default)]
    pub round: Option<u32>,
    #[serde(default)]
    pub mtime_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInput {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    pub folder_path: PathBuf,
    #[serde(default)]
    pub output_base_name: Option<String>,
    pub selected_files: Vec<SelectedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResult {
    pub job_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplierStats {
    pub matched_count: usize,
    pub unmatched_item_keys: Vec<String>,
    pub round: u32,
    pub variant: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub item_count: usize,
    /// Keyed by the offer's display label, in column order.
    pub per_supplier: IndexMap<String, SupplierStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub project_id: Option<String>,
    pub category_id: Option<String>,
    pub folder_path: PathBuf,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub step: String,
    pub logs: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output_path: Option<PathBuf>,
    pub output_latest_path: Option<PathBuf>,
    pub stats: Option<JobStats>,
    pub error: Option<String>,
    pub cancel_requested: bool,
}

impl Job {
    pub fn queued(
        id: impl Into<String>,
        project_id: Option<String>,
        category_id: Option<String>,
        folder_path: PathBuf,
    ) -> Self {
        Self {
            id: id.into(),
            project_id,
            category_id,
            folder_path,
            status: JobStatus::Queued,
            progress_percent: 0,
            step: "Waiting in queue".to_string(),
            logs: vec!["Job created.".to_string()],
            started_at: Utc::now(),
            finished_at: None,
            output_path: None,
            output_latest_path: None,
            stats: None,
            error: None,
            cancel_requested: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilter {
    pub project_id: Option<String>,
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResult {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScope {
    pub project_id: String,
    pub category_id: String,
}

impl AutoScope {
    pub fn new(project_id: impl Into<String>, category_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            category_id: category_id.into(),
        }
    }

    pub fn key(&self) -> String {
        format!("{}::{}", self.project_id, self.category_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoConfig {
    pub project_id: String,
    pub category_id: String,
    pub folder_path: PathBuf,
    #[serde(default)]
    pub known_suppliers: Vec<String>,
    #[serde(default)]
    pub selected_files: Vec<SelectedFile>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub debounce_ms: Option<u64>,
    #[serde(default)]
    pub fallback_interval_minutes: Option<u64>,
    #[serde(default)]
    pub output_base_name: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl AutoConfig {
    pub fn scope(&self) -> AutoScope {
        AutoScope::new(&self.project_id, &self.category_id)
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
            .map_or(DEFAULT_DEBOUNCE_MS, |ms| ms.max(MIN_DEBOUNCE_MS))
    }

    pub fn fallback_interval_minutes(&self) -> u64 {
        self.fallback_interval_minutes
            .map_or(DEFAULT_FALLBACK_MINUTES, |m| m.max(1))
    }

    pub fn output_base_name(&self) -> String {
        output_base_name_or_default(self.output_base_name.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoState {
    Inactive,
    Watching,
    Running,
    WaitingMapping,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingReason {
    None,
    Debounce,
    FileChange,
    Fallback,
    ManualUpdate,
    PendingRerun,
    UnresolvedMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Success,
    Error,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoStatus {
    pub project_id: String,
    pub category_id: String,
    pub folder_path: PathBuf,
    pub enabled: bool,
    pub state: AutoState,
    pub debounce_ms: u64,
    pub fallback_interval_minutes: u64,
    pub output_base_name: String,
    pub pending_reason: PendingReason,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_result: Option<RunResult>,
    pub last_job_id: Option<String>,
    pub last_error: Option<String>,
    pub unresolved_files: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl AutoStatus {
    pub fn scope(&self) -> AutoScope {
        AutoScope::new(&self.project_id, &self.category_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoStartResult {
    pub success: bool,
    pub status: AutoStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_is_trimmed_defaulted_and_flattened() {
        assert_eq!(output_base_name_or_default(None), DEFAULT_OUTPUT_BASE_NAME);
        assert_eq!(output_base_name_or_default(Some("  ")), DEFAULT_OUTPUT_BASE_NAME);
        assert_eq!(output_base_name_or_default(Some(" nabidky ")), "nabidky");
        assert_eq!(output_base_name_or_default(Some("nabidky/2024")), "nabidky_2024");
        assert_eq!(output_base_name_or_default(Some("a\\b")), "a_b");
    }
}
