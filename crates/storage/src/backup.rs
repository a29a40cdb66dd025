//! Local backup fallback.
//!
//! When the database path fails (or is skipped on timeout), the turn
//! is written verbatim as JSON under the backups directory so data is
//! never lost. Files are locked exclusively while written to keep
//! concurrent hook processes from interleaving.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use sage_domain::error::{Error, Result};

/// Writes `conversation_<session>_<ts>.json` dumps.
#[derive(Debug, Clone)]
pub struct BackupWriter {
    dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct BackupEnvelope<'a> {
    backup_timestamp: i64,
    backup_version: &'static str,
    conversation_data: &'a Value,
    system_info: SystemInfo,
}

#[derive(Debug, Serialize)]
struct SystemInfo {
    cwd: String,
    platform: &'static str,
}

impl BackupWriter {
    /// Backups live under `dir`; created on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The default per-user backups directory.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sage")
            .join("backups")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one conversation dump. Returns the path written.
    pub fn write(&self, session_id: &str, conversation_data: &Value) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let timestamp = Utc::now().timestamp();
        let path = self
            .dir
            .join(format!("conversation_{session_id}_{timestamp}.json"));

        let envelope = BackupEnvelope {
            backup_timestamp: timestamp,
            backup_version: concat!("sage_", env!("CARGO_PKG_VERSION")),
            conversation_data,
            system_info: SystemInfo {
                cwd: std::env::current_dir()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                platform: std::env::consts::OS,
            },
        };
        let json = serde_json::to_string_pretty(&envelope)?;

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        fs2::FileExt::lock_exclusive(&file)
            .map_err(|e| Error::Other(format!("backup lock failed: {e}")))?;
        {
            use std::io::Write;
            let mut writer = std::io::BufWriter::new(&file);
            writer.write_all(json.as_bytes())?;
            writer.flush()?;
        }
        // Lock is released when `file` is dropped.

        tracing::info!(path = %path.display(), "local backup saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_roundtrips_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = BackupWriter::new(tmp.path());

        let data = serde_json::json!({
            "user_prompt": "What is a B-tree?",
            "assistant_response": "A self-balancing search tree.",
            "metadata": {"source": "test"}
        });
        let path = writer
            .write("1c7cb813-5584-4c9c-9a14-3e3e1f1f2a61", &data)
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["conversation_data"], data);
        assert!(parsed["backup_timestamp"].is_i64());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("conversation_1c7cb813"));
    }
}
