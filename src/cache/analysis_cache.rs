use crate::types::DetectionAnalysis;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// File analysis keyed by path; an entry is only valid for the size and mtime it was computed at.
#[derive(Debug, Clone)]
struct CachedAnalysis {
    size_bytes: u64,
    mtime_ms: u64,
    analysis: DetectionAnalysis,
}

static CACHE: std::sync::OnceLock<Arc<RwLock<HashMap<PathBuf, CachedAnalysis>>>> =
    std::sync::OnceLock::new();

fn cache() -> &'static Arc<RwLock<HashMap<PathBuf, CachedAnalysis>>> {
    CACHE.get_or_init(|| Arc::new(RwLock::new(HashMap::new())))
}

pub fn get_cached_analysis(path: &Path, size_bytes: u64, mtime_ms: u64) -> Option<DetectionAnalysis> {
    let guard = cache().read().ok()?;
    guard
        .get(path)
        .filter(|entry| entry.size_bytes == size_bytes && entry.mtime_ms == mtime_ms)
        .map(|entry| entry.analysis.clone())
}

pub fn set_cached_analysis(path: &Path, size_bytes: u64, mtime_ms: u64, analysis: DetectionAnalysis) {
    if let Ok(mut guard) = cache().write() {
        guard.insert(
            path.to_path_buf(),
            CachedAnalysis {
                size_bytes,
                mtime_ms,
                analysis,
            },
        );
    }
}

/// Drop entries under `root` for files a fresh scan of `root` no longer found.
/// Returns how many were dropped.
pub fn evict_missing(root: &Path, present: &HashSet<PathBuf>) -> usize {
    let Ok(mut guard) = cache().write() else {
        return 0;
    };
    let before = guard.len();
    guard.retain(|path, _| !path.starts_with(root) || present.contains(path));
    before - guard.len()
}
