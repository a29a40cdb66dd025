//! Project identity.
//!
//! Hook records from many project trees share one state directory, so
//! every record carries a stable project id derived from the working
//! directory.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Stable 12-hex-char id for a project rooted at `path`.
pub fn project_id_for(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    let hex: String = digest[..6].iter().map(|b| format!("{b:02x}")).collect();
    hex
}

/// Project id for the current working directory.
pub fn current_project_id() -> String {
    match std::env::current_dir() {
        Ok(cwd) => project_id_for(&cwd),
        Err(_) => "unknown".into(),
    }
}

/// Human-readable project name (the directory basename).
pub fn current_project_name() -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| cwd.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown".into())
}
