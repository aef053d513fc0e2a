//! Folder scan: lists candidate workbooks, analyses each one and suggests roles,
//! suppliers and rounds. Per-file failures never abort the scan.

use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::UNIX_EPOCH;
use walkdir::{DirEntry, WalkDir};

use crate::cache::analysis_cache::{evict_missing, get_cached_analysis, set_cached_analysis};
use crate::error::{CompareError, Result};
use crate::services::excel_scanner::strip_diacritics;
use crate::services::line_items::analyze_workbook_file;
use crate::types::{
    output_base_name_or_default, DetectedFile, DetectionAnalysis, DetectionResult, FileRole,
};

const IGNORE_DIRS: &[&str] = &[".git", "node_modules", "dist", "dist-electron"];
const MIN_TOKEN_LEN: usize = 3;

/// Lower-case, strip diacritics, collapse every non-alphanumeric run into one space.
pub fn normalize_text(value: &str) -> String {
    let stripped = strip_diacritics(value);
    let mut out = String::with_capacity(stripped.len());
    let mut gap = false;
    for c in stripped.chars() {
        if c.is_ascii_alphanumeric() {
            if gap && !out.is_empty() {
                out.push(' ');
            }
            gap = false;
            out.push(c);
        } else {
            gap = true;
        }
    }
    out
}

pub fn should_ignore_directory(name: &str) -> bool {
    IGNORE_DIRS.contains(&name) || normalize_text(name).contains("archiv")
}

/// True for Excel's `~$name.xlsx` owner/lock files.
pub fn is_lock_file(file_name: &str) -> bool {
    file_name.starts_with("~$")
}

pub fn is_xlsx(file_name: &str) -> bool {
    file_name.to_lowercase().ends_with(".xlsx")
}

/// Comparison output written by the runner: `{base}_*.xlsx` or `{base}.xlsx`, case-insensitive.
pub fn is_generated_output(path: &Path, output_base_name: &str) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy().to_lowercase();
    let base = output_base_name_or_default(Some(output_base_name)).to_lowercase();
    name.starts_with(&format!("{}_", base)) || name == format!("{}.xlsx", base)
}

fn round_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)kolo[ _-]*(\d+)",
            r"(?i)(?:^|[^a-z0-9])k[ _-]?(\d+)(?:[^0-9]|$)",
            r"(?i)round[ _-]*(\d+)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("round pattern"))
        .collect()
    })
}

/// Bidding round from a file name ("kolo 2", "K2", "round_3"); first pattern that matches wins, else 0.
pub fn parse_round(file_name: &str) -> u32 {
    round_patterns()
        .iter()
        .find_map(|re| re.captures(file_name))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(0)
}

/// Best-scoring known supplier for a relative path. Full-name containment weighs 4x its length,
/// each token of 3+ characters adds its length. Ties keep the earlier supplier.
pub fn infer_supplier<'a>(relative_path: &str, suppliers: &'a [String]) -> Option<&'a str> {
    let haystack = normalize_text(relative_path);
    let mut best: Option<(&str, usize)> = None;
    for supplier in suppliers {
        let base = normalize_text(supplier);
        if base.is_empty() {
            continue;
        }
        let mut score = 0;
        if haystack.contains(&base) {
            score += base.len() * 4;
        }
        score += base
            .split(' ')
            .filter(|token| token.len() >= MIN_TOKEN_LEN && haystack.contains(token))
            .map(str::len)
            .sum::<usize>();
        if score == 0 {
            continue;
        }
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((supplier.as_str(), score));
        }
    }
    best.map(|(name, _)| name)
}

/// Absolute form of `path` without resolving symlinks.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

struct Candidate {
    path: PathBuf,
    relative_path: String,
    file_name: String,
    size_bytes: u64,
    mtime_ms: u64,
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && should_ignore_directory(&entry.file_name().to_string_lossy())
}

fn collect_excel_files(root: &Path, output_base_name: Option<&str>) -> Vec<Candidate> {
    let mut files: Vec<Candidate> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_ignored_dir(e))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable folder entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let file_name = e.file_name().to_string_lossy().to_string();
            if !is_xlsx(&file_name) || is_lock_file(&file_name) {
                return None;
            }
            if output_base_name.is_some_and(|base| is_generated_output(e.path(), base)) {
                return None;
            }
            let meta = e.metadata().ok()?;
            let mtime_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            let relative_path = e
                .path()
                .strip_prefix(root)
                .unwrap_or(e.path())
                .to_string_lossy()
                .to_string();
            Some(Candidate {
                path: e.path().to_path_buf(),
                relative_path,
                file_name,
                size_bytes: meta.len(),
                mtime_ms,
            })
        })
        .collect();
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    files
}

fn analyze_cached(candidate: &Candidate) -> Result<DetectionAnalysis> {
    if let Some(hit) = get_cached_analysis(&candidate.path, candidate.size_bytes, candidate.mtime_ms) {
        return Ok(hit);
    }
    let analysis = analyze_workbook_file(&candidate.path)?;
    set_cached_analysis(
        &candidate.path,
        candidate.size_bytes,
        candidate.mtime_ms,
        analysis.clone(),
    );
    Ok(analysis)
}

/// Blank template first: fewest priced cost rows, then most cost rows, then path.
fn specification_order(a: &DetectedFile, b: &DetectedFile) -> Ordering {
    let priced = |f: &DetectedFile| f.analysis.as_ref().map_or(usize::MAX, |x| x.priced_cost_row_count);
    let cost = |f: &DetectedFile| f.analysis.as_ref().map_or(0, |x| x.cost_row_count);
    priced(a)
        .cmp(&priced(b))
        .then_with(|| cost(b).cmp(&cost(a)))
        .then_with(|| a.relative_path.cmp(&b.relative_path))
}

/// Scan `folder` and suggest a role for every `.xlsx` found.
/// Files named like the comparison output for `output_base_name` are left out of the scan.
pub fn detect_inputs(
    folder: &Path,
    suppliers: &[String],
    output_base_name: Option<&str>,
) -> Result<DetectionResult> {
    let root = absolutize(folder)?;
    if !root.is_dir() {
        return Err(CompareError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Folder {} does not exist.", root.display()),
        )));
    }

    let candidates = collect_excel_files(&root, output_base_name);
    let present: HashSet<PathBuf> = candidates.iter().map(|c| c.path.clone()).collect();
    let evicted = evict_missing(&root, &present);
    if evicted > 0 {
        tracing::debug!(folder = %root.display(), evicted, "dropped cached analyses of removed files");
    }

    let mut files: Vec<DetectedFile> = candidates
        .into_iter()
        .map(|candidate| {
            let (analysis, analysis_error) = match analyze_cached(&candidate) {
                Ok(a) => (Some(a), None),
                Err(e) => {
                    tracing::warn!(file = %candidate.relative_path, error = %e, "workbook analysis failed");
                    (None, Some(e.to_string()))
                }
            };
            DetectedFile {
                suggested_supplier_name: infer_supplier(&candidate.relative_path, suppliers)
                    .map(String::from),
                suggested_round: parse_round(&candidate.file_name),
                suggested_role: FileRole::Ignore,
                path: candidate.path,
                relative_path: candidate.relative_path,
                file_name: candidate.file_name,
                size_bytes: candidate.size_bytes,
                mtime_ms: candidate.mtime_ms,
                analysis,
                analysis_error,
            }
        })
        .collect();

    let specification = files
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_valid_template())
        .min_by(|(_, a), (_, b)| specification_order(a, b))
        .map(|(index, _)| index);

    for (index, file) in files.iter_mut().enumerate() {
        if Some(index) == specification {
            file.suggested_role = FileRole::Specification;
        } else if file.is_valid_template() && file.suggested_supplier_name.is_some() {
            file.suggested_role = FileRole::Offer;
        }
    }

    let mut warnings = Vec::new();
    if specification.is_none() {
        warnings.push("No suitable specification file was found. Assign it manually.".to_string());
    }
    for supplier in suppliers {
        let has_offer = files.iter().any(|f| {
            f.suggested_role == FileRole::Offer
                && f.suggested_supplier_name.as_deref() == Some(supplier.as_str())
        });
        if !has_offer {
            warnings.push(format!(
                "Supplier \"{}\" has no automatically assigned offer.",
                supplier
            ));
        }
    }

    Ok(DetectionResult {
        folder_path: root,
        files,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalizes_paths_and_names() {
        assert_eq!(normalize_text("Nabídky/Drywall_kolo1.xlsx"), "nabidky drywall kolo1 xlsx");
        assert_eq!(normalize_text("  PBK s.r.o. "), "pbk s r o");
        assert_eq!(normalize_text("--"), "");
    }

    #[test]
    fn ignores_archive_and_tooling_directories() {
        assert!(should_ignore_directory(".git"));
        assert!(should_ignore_directory("node_modules"));
        assert!(should_ignore_directory("Archiv 2023"));
        assert!(should_ignore_directory("old_archive"));
        assert!(!should_ignore_directory("Nabídky"));
    }

    #[test]
    fn rounds_from_file_names() {
        assert_eq!(parse_round("Drywall_kolo1.xlsx"), 1);
        assert_eq!(parse_round("PBK kolo 3 final.xlsx"), 3);
        assert_eq!(parse_round("nabidka_K2.xlsx"), 2);
        assert_eq!(parse_round("Round-4 Stavby.xlsx"), 4);
        assert_eq!(parse_round("PBK2.xlsx"), 0);
        assert_eq!(parse_round("zadani.xlsx"), 0);
    }

    #[test]
    fn kolo_wins_over_later_patterns() {
        assert_eq!(parse_round("k9_kolo2.xlsx"), 2);
    }

    #[test]
    fn supplier_with_full_name_match_wins() {
        let suppliers = names(&["Stavby Praha", "Stavby Praha Jih"]);
        assert_eq!(
            infer_supplier("nabidky/stavby_praha_jih.xlsx", &suppliers),
            Some("Stavby Praha Jih")
        );
    }

    #[test]
    fn supplier_ties_keep_first_and_short_tokens_do_not_count() {
        let suppliers = names(&["Alfa", "alfa"]);
        assert_eq!(infer_supplier("alfa.xlsx", &suppliers), Some("Alfa"));
        let suppliers = names(&["AB CD"]);
        assert_eq!(infer_supplier("ab.xlsx", &suppliers), None);
        assert_eq!(infer_supplier("x.xlsx", &[]), None);
    }

    #[test]
    fn supplier_matching_ignores_diacritics() {
        let suppliers = names(&["Sádrokartony Novák"]);
        assert_eq!(
            infer_supplier("Sadrokartony_NOVAK_kolo1.xlsx", &suppliers),
            Some("Sádrokartony Novák")
        );
    }

    #[test]
    fn generated_outputs_match_base_name() {
        let base = "porovnani_nabidek";
        assert!(is_generated_output(Path::new("/t/porovnani_nabidek_latest.xlsx"), base));
        assert!(is_generated_output(Path::new("/t/Porovnani_Nabidek_20240101_120000.xlsx"), base));
        assert!(is_generated_output(Path::new("/t/porovnani_nabidek.xlsx"), base));
        assert!(!is_generated_output(Path::new("/t/porovnani_nabidekX.xlsx"), base));
        assert!(!is_generated_output(Path::new("/t/zadani.xlsx"), base));
        assert!(is_generated_output(Path::new("/t/nabidky_2024_latest.xlsx"), "nabidky/2024"));
    }

    #[test]
    fn lock_and_foreign_files() {
        assert!(is_lock_file("~$zadani.xlsx"));
        assert!(is_xlsx("Zadani.XLSX"));
        assert!(!is_xlsx("zadani.xls"));
    }
}
