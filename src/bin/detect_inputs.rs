use bid_comparison_lib::commands::{self, AppState};
use bid_comparison_lib::db::MemoryStore;
use bid_comparison_lib::services::auto_runner::AutoTiming;
use bid_comparison_lib::types::{FileRole, SelectedFile, StartInput};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "detect_inputs")]
#[command(about = "Scan a tender folder and print suggested file roles as JSON", long_about = None)]
#[command(version)]
struct Cli {
    /// Tender folder with the specification and supplier offers
    folder: PathBuf,

    /// Known supplier name (repeatable)
    #[arg(short, long = "supplier")]
    suppliers: Vec<String>,

    /// Base name of the comparison workbook
    #[arg(long)]
    output_base_name: Option<String>,

    /// Run one comparison with the suggested roles and wait for it
    #[arg(long)]
    compare: bool,
}

fn selection_from(result: &bid_comparison_lib::types::DetectionResult) -> Vec<SelectedFile> {
    result
        .files
        .iter()
        .filter(|f| f.suggested_role != FileRole::Ignore)
        .map(|f| SelectedFile {
            path: f.path.clone(),
            role: f.suggested_role,
            supplier_name: f.suggested_supplier_name.clone(),
            round: Some(f.suggested_round),
            mtime_ms: f.mtime_ms,
        })
        .collect()
}

async fn run(cli: Cli) -> Result<(), String> {
    let state = AppState::new(Arc::new(MemoryStore::default()), AutoTiming::default());
    let folder = cli.folder.to_string_lossy().to_string();
    let detection =
        commands::detect_inputs(&state, folder, cli.suppliers, cli.output_base_name.clone()).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&detection).map_err(|e| e.to_string())?
    );
    if !cli.compare {
        return Ok(());
    }

    let started = commands::start_comparison(
        &state,
        StartInput {
            project_id: None,
            category_id: None,
            folder_path: detection.folder_path.clone(),
            output_base_name: cli.output_base_name,
            selected_files: selection_from(&detection),
        },
    )?;
    loop {
        let job = commands::get_job(&state, started.job_id.clone())?
            .ok_or_else(|| format!("Job {} disappeared.", started.job_id))?;
        if job.status.is_terminal() {
            println!(
                "{}",
                serde_json::to_string_pretty(&job).map_err(|e| e.to_string())?
            );
            return match job.error {
                Some(err) => Err(err),
                None => Ok(()),
            };
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    bid_comparison_lib::init_logging(&std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()));
    if let Err(err) = run(cli).await {
        eprintln!("detect_inputs: {}", err);
        std::process::exit(1);
    }
}
