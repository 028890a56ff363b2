// .env discovery
// Searched in the working directory first, then ./Backend/.env.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Candidate `.env` locations under `base`, in search order.
pub fn candidates(base: &Path) -> [PathBuf; 2] {
    [base.join(".env"), base.join("Backend").join(".env")]
}

/// Load the first `.env` found under `base` into the process environment.
///
/// Variables already set in the environment are left alone, so the process
/// environment always wins over the file. Returns the file that was loaded.
/// A malformed file is logged and skipped rather than failing startup.
pub fn load_from(base: &Path) -> Option<PathBuf> {
    for path in candidates(base) {
        if !path.is_file() {
            continue;
        }
        match dotenvy::from_path(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "loaded .env");
                return Some(path);
            }
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable .env: {e}");
            }
        }
    }
    None
}

/// [`load_from`] the current working directory.
pub fn load() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    load_from(&cwd)
}
