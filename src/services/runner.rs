//! Job runner: validates a start request, runs the comparison in the background and
//! writes the archive and "latest" workbooks into the source folder.

use async_trait::async_trait;
use chrono::{Local, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::error::{CompareError, Result};
use crate::services::auto_runner::ComparisonBackend;
use crate::services::comparison::build_comparison_workbook;
use crate::services::detection::{self, absolutize};
use crate::services::selection::{validate_selection, ValidatedSelection};
use crate::types::{
    output_base_name_or_default, DetectionResult, Job, JobFilter, JobStats, JobStatus, StartInput,
    StartResult, SuccessResult,
};

pub const MAX_LOG_ENTRIES: usize = 200;

struct JobEntry {
    job: Job,
    cancel: Arc<AtomicBool>,
}

struct Outputs {
    archive: PathBuf,
    latest: PathBuf,
    stats: JobStats,
}

#[derive(Clone)]
pub struct ComparisonRunner {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    runtime: Handle,
}

fn push_log(job: &mut Job, message: impl Into<String>) {
    job.logs.push(message.into());
    if job.logs.len() > MAX_LOG_ENTRIES {
        let overflow = job.logs.len() - MAX_LOG_ENTRIES;
        job.logs.drain(..overflow);
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// `{base}_{yyyyMMdd_HHmmss}.xlsx`, with a counter suffix if that second is already taken.
fn archive_path(folder: &Path, base: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let first = folder.join(format!("{}_{}.xlsx", base, stamp));
    if !first.exists() {
        return first;
    }
    (2..)
        .map(|n| folder.join(format!("{}_{}_{}.xlsx", base, stamp, n)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

impl ComparisonRunner {
    /// Runner bound to the current tokio runtime. Panics outside of one; use
    /// [`ComparisonRunner::with_runtime`] from plain threads.
    pub fn new() -> Self {
        Self::with_runtime(Handle::current())
    }

    /// Jobs are spawned on `runtime`, so `start` works from any thread.
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            runtime,
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate and enqueue. Invalid requests fail here and never create a job.
    pub fn start(&self, input: StartInput) -> Result<StartResult> {
        let selection = validate_selection(&input.selected_files).map_err(CompareError::Validation)?;
        let folder = absolutize(&input.folder_path)?;
        let base = output_base_name_or_default(input.output_base_name.as_deref());

        let job_id = Uuid::new_v4().to_string();
        let job = Job::queued(
            job_id.clone(),
            input.project_id.clone(),
            input.category_id.clone(),
            folder.clone(),
        );
        let cancel = Arc::new(AtomicBool::new(false));
        self.jobs().insert(job_id.clone(), JobEntry { job, cancel: cancel.clone() });
        tracing::info!(
            job_id = %job_id,
            project_id = ?input.project_id,
            category_id = ?input.category_id,
            offers = selection.offers.len(),
            "comparison job queued"
        );

        let runner = self.clone();
        let id = job_id.clone();
        self.runtime.spawn(async move {
            runner.execute(id, selection, folder, base, cancel).await;
        });

        Ok(StartResult { job_id })
    }

    async fn execute(
        self,
        job_id: String,
        selection: ValidatedSelection,
        folder: PathBuf,
        base: String,
        cancel: Arc<AtomicBool>,
    ) {
        if !self.mark_running(&job_id, &selection) {
            return;
        }
        let result = self.run_job(&job_id, selection, &folder, &base, cancel).await;
        self.finish(&job_id, result);
    }

    fn mark_running(&self, job_id: &str, selection: &ValidatedSelection) -> bool {
        let mut jobs = self.jobs();
        let Some(entry) = jobs.get_mut(job_id) else {
            return false;
        };
        if entry.job.status != JobStatus::Queued {
            return false;
        }
        entry.job.status = JobStatus::Running;
        entry.job.step = "Starting comparison".to_string();
        push_log(
            &mut entry.job,
            format!("Specification: {}", file_label(&selection.specification)),
        );
        for offer in &selection.offers {
            push_log(
                &mut entry.job,
                format!("Offer {}: {}", offer.display_label, file_label(&offer.file_path)),
            );
        }
        tracing::info!(job_id = %job_id, "comparison job running");
        true
    }

    fn report_progress(&self, job_id: &str, percent: u8, step: &str) {
        let mut jobs = self.jobs();
        let Some(entry) = jobs.get_mut(job_id) else {
            return;
        };
        if entry.job.status.is_terminal() {
            return;
        }
        entry.job.progress_percent = entry.job.progress_percent.max(percent.min(100));
        entry.job.step = step.to_string();
        push_log(&mut entry.job, step);
    }

    async fn run_job(
        &self,
        job_id: &str,
        selection: ValidatedSelection,
        folder: &Path,
        base: &str,
        cancel: Arc<AtomicBool>,
    ) -> Result<Outputs> {
        let progress = self.clone();
        let id = job_id.to_string();
        let flag = cancel.clone();
        let ValidatedSelection {
            specification,
            offers,
        } = selection;

        let output = tokio::task::spawn_blocking(move || {
            let mut on_progress = |percent: u8, step: &str| progress.report_progress(&id, percent, step);
            let is_cancelled = || flag.load(Ordering::SeqCst);
            build_comparison_workbook(&specification, &offers, &mut on_progress, &is_cancelled)
        })
        .await
        .map_err(|e| CompareError::Other(format!("Comparison task failed: {}", e)))??;

        if cancel.load(Ordering::SeqCst) {
            return Err(CompareError::Cancelled);
        }

        let archive = archive_path(folder, base);
        let latest = folder.join(format!("{}_latest.xlsx", base));
        tokio::fs::write(&archive, &output.buffer).await?;
        tokio::fs::write(&latest, &output.buffer).await?;

        Ok(Outputs {
            archive,
            latest,
            stats: JobStats {
                item_count: output.item_count,
                per_supplier: output.per_supplier,
            },
        })
    }

    fn finish(&self, job_id: &str, result: Result<Outputs>) {
        let mut jobs = self.jobs();
        let Some(entry) = jobs.get_mut(job_id) else {
            return;
        };
        let job = &mut entry.job;
        if job.status.is_terminal() {
            return;
        }
        job.finished_at = Some(Utc::now());
        match result {
            Ok(outputs) => {
                job.status = JobStatus::Success;
                job.progress_percent = 100;
                job.step = "Done".to_string();
                push_log(job, format!("Comparison saved: {}", outputs.archive.display()));
                push_log(job, format!("Latest copy updated: {}", outputs.latest.display()));
                job.output_path = Some(outputs.archive);
                job.output_latest_path = Some(outputs.latest);
                job.stats = Some(outputs.stats);
                tracing::info!(job_id = %job_id, "comparison job finished");
            }
            Err(CompareError::Cancelled) => {
                job.status = JobStatus::Cancelled;
                job.progress_percent = 100;
                job.step = "Cancelled".to_string();
                push_log(job, "Comparison was cancelled.");
                tracing::info!(job_id = %job_id, "comparison job cancelled");
            }
            Err(err) => {
                let message = err.to_string();
                job.status = JobStatus::Error;
                job.step = "Failed".to_string();
                push_log(job, format!("Error: {}", message));
                job.error = Some(message);
                tracing::warn!(job_id = %job_id, error = %err, "comparison job failed");
            }
        }
    }

    /// Snapshot of a job, logs included.
    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs().get(job_id).map(|entry| entry.job.clone())
    }

    /// Newest first, optionally narrowed to a project and/or category.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs()
            .values()
            .map(|entry| &entry.job)
            .filter(|job| {
                filter
                    .project_id
                    .as_ref()
                    .map_or(true, |p| job.project_id.as_ref() == Some(p))
                    && filter
                        .category_id
                        .as_ref()
                        .map_or(true, |c| job.category_id.as_ref() == Some(c))
            })
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Queued jobs are cancelled on the spot; running jobs stop at the next checkpoint.
    pub fn cancel(&self, job_id: &str) -> SuccessResult {
        let mut jobs = self.jobs();
        let Some(entry) = jobs.get_mut(job_id) else {
            return SuccessResult { success: false };
        };
        if entry.job.status.is_terminal() {
            return SuccessResult { success: false };
        }
        entry.cancel.store(true, Ordering::SeqCst);
        let job = &mut entry.job;
        job.cancel_requested = true;
        if job.status == JobStatus::Queued {
            job.status = JobStatus::Cancelled;
            job.progress_percent = 100;
            job.step = "Cancelled".to_string();
            job.finished_at = Some(Utc::now());
            push_log(job, "Cancelled before start.");
            tracing::info!(job_id = %job_id, "queued comparison job cancelled");
        } else {
            push_log(job, "Cancellation requested.");
        }
        SuccessResult { success: true }
    }
}

#[async_trait]
impl ComparisonBackend for ComparisonRunner {
    async fn detect_inputs(
        &self,
        folder: &Path,
        suppliers: &[String],
        output_base_name: Option<&str>,
    ) -> Result<DetectionResult> {
        let folder = folder.to_path_buf();
        let suppliers = suppliers.to_vec();
        let base = output_base_name.map(String::from);
        tokio::task::spawn_blocking(move || {
            detection::detect_inputs(&folder, &suppliers, base.as_deref())
        })
        .await
        .map_err(|e| CompareError::Other(format!("Detection task failed: {}", e)))?
    }

    fn start(&self, input: StartInput) -> Result<StartResult> {
        ComparisonRunner::start(self, input)
    }

    fn get(&self, job_id: &str) -> Option<Job> {
        ComparisonRunner::get(self, job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileRole, SelectedFile, DEFAULT_OUTPUT_BASE_NAME};

    fn input(files: Vec<SelectedFile>) -> StartInput {
        StartInput {
            project_id: Some("p1".to_string()),
            category_id: Some("c1".to_string()),
            folder_path: PathBuf::from("/nonexistent/tender"),
            output_base_name: None,
            selected_files: files,
        }
    }

    #[test]
    fn log_is_capped_to_most_recent_entries() {
        let mut job = Job::queued("j", None, None, PathBuf::from("/t"));
        for i in 0..250 {
            push_log(&mut job, format!("line {}", i));
        }
        assert_eq!(job.logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(job.logs.last().map(String::as_str), Some("line 249"));
        assert_eq!(job.logs.first().map(String::as_str), Some("line 50"));
    }

    #[tokio::test]
    async fn invalid_request_creates_no_job() {
        let runner = ComparisonRunner::new();
        let err = runner
            .start(input(vec![SelectedFile {
                path: PathBuf::from("/t/a.xlsx"),
                role: FileRole::Offer,
                supplier_name: None,
                round: None,
                mtime_ms: 0,
            }]))
            .expect_err("invalid");
        assert!(matches!(err, CompareError::Validation(ref reasons) if reasons.len() == 2));
        assert!(runner.list(&JobFilter::default()).is_empty());
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_unsuccessful() {
        let runner = ComparisonRunner::new();
        assert!(!runner.cancel("missing").success);
        assert!(runner.get("missing").is_none());
    }

    #[tokio::test]
    async fn progress_never_goes_backwards() {
        let runner = ComparisonRunner::new();
        let job = Job::queued("j1", None, None, PathBuf::from("/t"));
        runner.jobs().insert(
            "j1".to_string(),
            JobEntry {
                job,
                cancel: Arc::new(AtomicBool::new(false)),
            },
        );
        runner.report_progress("j1", 40, "Processed: A");
        runner.report_progress("j1", 20, "late event");
        let job = runner.get("j1").expect("job");
        assert_eq!(job.progress_percent, 40);
        assert_eq!(job.step, "late event");
    }

    fn write_priced_boq(path: &Path, price: Option<f64>) {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in ["PČ", "Typ", "Kód", "Popis", "Množství", "J.cena"].iter().enumerate() {
            sheet.write_string(0, col as u16, *header).expect("header");
        }
        sheet.write_number(1, 0, 1.0).expect("number");
        sheet.write_string(1, 1, "K").expect("type");
        sheet.write_string(1, 2, "A-001").expect("code");
        sheet.write_string(1, 3, "Příčka").expect("description");
        sheet.write_number(1, 4, 2.0).expect("quantity");
        if let Some(price) = price {
            sheet.write_number(1, 5, price).expect("price");
        }
        workbook.save(path).expect("save");
    }

    fn selected(path: PathBuf, role: FileRole, supplier: Option<&str>) -> SelectedFile {
        SelectedFile {
            path,
            role,
            supplier_name: supplier.map(String::from),
            round: Some(1),
            mtime_ms: 0,
        }
    }

    #[tokio::test]
    async fn cancelling_a_running_job_stops_it_without_outputs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let zadani = dir.path().join("zadani.xlsx");
        let offer = dir.path().join("PBK_kolo1.xlsx");
        write_priced_boq(&zadani, None);
        write_priced_boq(&offer, Some(150.0));
        let selection = validate_selection(&[
            selected(zadani, FileRole::Specification, None),
            selected(offer, FileRole::Offer, Some("PBK")),
        ])
        .expect("valid selection");

        let runner = ComparisonRunner::new();
        let cancel = Arc::new(AtomicBool::new(false));
        runner.jobs().insert(
            "j1".to_string(),
            JobEntry {
                job: Job::queued("j1", None, None, dir.path().to_path_buf()),
                cancel: cancel.clone(),
            },
        );
        assert!(runner.mark_running("j1", &selection));

        assert!(runner.cancel("j1").success);
        let job = runner.get("j1").expect("job");
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.cancel_requested);
        assert_eq!(job.logs.last().map(String::as_str), Some("Cancellation requested."));

        let result = runner
            .run_job("j1", selection, dir.path(), DEFAULT_OUTPUT_BASE_NAME, cancel)
            .await;
        assert!(matches!(result, Err(CompareError::Cancelled)));
        runner.finish("j1", result);

        let job = runner.get("j1").expect("job");
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.progress_percent, 100);
        assert!(job.output_path.is_none());
        assert!(job.finished_at.is_some());
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["PBK_kolo1.xlsx", "zadani.xlsx"]);
        assert!(!runner.cancel("j1").success);
    }

    #[test]
    fn start_works_from_a_thread_outside_the_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime");
        let dir = tempfile::tempdir().expect("tempdir");
        let zadani = dir.path().join("zadani.xlsx");
        let offer = dir.path().join("PBK_kolo1.xlsx");
        write_priced_boq(&zadani, None);
        write_priced_boq(&offer, Some(150.0));

        let runner = ComparisonRunner::with_runtime(runtime.handle().clone());
        let mut request = input(vec![
            selected(zadani, FileRole::Specification, None),
            selected(offer, FileRole::Offer, Some("PBK")),
        ]);
        request.folder_path = dir.path().to_path_buf();
        let started = runner.start(request).expect("start");

        let mut job = runner.get(&started.job_id).expect("job");
        for _ in 0..600 {
            if job.status.is_terminal() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
            job = runner.get(&started.job_id).expect("job");
        }
        assert_eq!(job.status, JobStatus::Success, "{:?}", job.error);
        assert!(job.output_latest_path.is_some_and(|p| p.exists()));
    }
}
