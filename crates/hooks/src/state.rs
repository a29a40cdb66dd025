//! Filesystem-backed hook-record store.
//!
//! One file per call id, named `complete_<call_id>.json`. The pre
//! hook, post hook and stop hook are separate OS processes, so every
//! read-modify-write happens under an `fs2` advisory lock: shared for
//! readers, exclusive for writers, with bounded retry.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fs2::FileExt;

use sage_domain::error::{Error, Result};
use sage_domain::hook::{HookRecord, PostCall, PreCall};

const LOCK_ATTEMPTS: u32 = 10;
const LOCK_BACKOFF: Duration = Duration::from_millis(50);

/// Durable, multi-writer, per-call-id record store.
pub struct HookStateStore {
    dir: PathBuf,
}

impl HookStateStore {
    /// Open (and create if needed) the state directory.
    ///
    /// Defaults to `~/.sage_hooks_temp`, mode `0700` on Unix. The
    /// directory may be shared by unrelated project trees; filtering
    /// is by project id inside the record, never by path.
    pub fn open(dir: Option<PathBuf>) -> Result<Self> {
        let dir = match dir {
            Some(d) => d,
            None => dirs::home_dir()
                .ok_or_else(|| Error::Config("unable to determine home directory".into()))?
                .join(".sage_hooks_temp"),
        };

        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
        }

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, call_id: &str) -> Result<PathBuf> {
        if call_id.is_empty()
            || call_id.starts_with('.')
            || call_id.contains('/')
            || call_id.contains('\\')
        {
            return Err(Error::InvalidInput(format!(
                "call id is not file-safe: {call_id}"
            )));
        }
        Ok(self.dir.join(format!("complete_{call_id}.json")))
    }

    // ── writes ───────────────────────────────────────────────────────

    /// Create the record for `call_id`, or set its `pre_call` field
    /// if a record already exists.
    pub fn record_pre(&self, call_id: &str, pre: PreCall) -> Result<()> {
        self.update(call_id, |record| record.pre_call = Some(pre))
    }

    /// Update `post_call`, creating the record when the pre event was
    /// lost. The post event carries enough identity to do so.
    pub fn record_post(&self, call_id: &str, post: PostCall) -> Result<()> {
        self.update(call_id, |record| record.post_call = Some(post))
    }

    fn update(&self, call_id: &str, apply: impl FnOnce(&mut HookRecord)) -> Result<()> {
        let path = self.path_for(call_id)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        lock_exclusive(&file, &path)?;

        let existing = std::io::read_to_string(&file)?;
        let mut record = parse_record(&existing, &path).unwrap_or(HookRecord {
            call_id: call_id.to_owned(),
            pre_call: None,
            post_call: None,
        });
        apply(&mut record);

        let json = serde_json::to_string_pretty(&record)?;
        file.set_len(0)?;
        {
            use std::io::{Seek, Write};
            let mut writer = &file;
            writer.seek(std::io::SeekFrom::Start(0))?;
            writer.write_all(json.as_bytes())?;
            writer.flush()?;
        }
        // Lock is released when `file` is dropped.
        Ok(())
    }

    // ── reads ────────────────────────────────────────────────────────

    /// Read one record. Absent or corrupt files both read as `None`.
    pub fn read(&self, call_id: &str) -> Result<Option<HookRecord>> {
        let path = self.path_for(call_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path)?;
        lock_shared(&file, &path)?;
        let raw = std::io::read_to_string(&file)?;
        Ok(parse_record(&raw, &path))
    }

    /// Every record whose `pre_call.session_id` matches, ordered by
    /// pre timestamp ascending. Records still missing their post
    /// event are included (they become pending tool calls).
    pub fn list_by_session(&self, session_id: &str) -> Vec<HookRecord> {
        let mut records: Vec<HookRecord> = self
            .scan(|record| {
                record
                    .pre_call
                    .as_ref()
                    .map(|pre| pre.session_id == session_id)
                    .unwrap_or(false)
            })
            .collect();

        records.sort_by_key(|r| r.pre_call.as_ref().map(|p| p.timestamp));
        records
    }

    /// Every readable record in the directory, regardless of session.
    pub fn all_records(&self) -> Vec<HookRecord> {
        self.scan(|_| true).collect()
    }

    fn scan<'a>(
        &'a self,
        keep: impl Fn(&HookRecord) -> bool + 'a,
    ) -> impl Iterator<Item = HookRecord> + 'a {
        let entries = std::fs::read_dir(&self.dir)
            .map(|rd| rd.flatten().collect::<Vec<_>>())
            .unwrap_or_default();

        entries.into_iter().filter_map(move |entry| {
            let path = entry.path();
            let name = path.file_name()?.to_string_lossy().into_owned();
            if !name.starts_with("complete_") || !name.ends_with(".json") {
                return None;
            }
            let file = File::open(&path).ok()?;
            lock_shared(&file, &path).ok()?;
            let raw = std::io::read_to_string(&file).ok()?;
            let record = parse_record(&raw, &path)?;
            keep(&record).then_some(record)
        })
    }

    // ── cleanup ──────────────────────────────────────────────────────

    /// Remove record files whose mtime is older than `age`. Both the
    /// merged files and transient `pre_*.json` companions are swept.
    pub fn evict_older_than(&self, age: Duration) -> usize {
        let cutoff = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            let Some(name) = name else { continue };
            let is_record = (name.starts_with("complete_") || name.starts_with("pre_"))
                && name.ends_with(".json");
            if !is_record {
                continue;
            }
            let old_enough = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|mtime| mtime <= cutoff)
                .unwrap_or(false);
            if old_enough && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "evicted aged hook records");
        }
        removed
    }

    /// Best-effort removal after consumption.
    pub fn delete_many(&self, call_ids: &[String]) -> usize {
        let mut removed = 0;
        for call_id in call_ids {
            let Ok(path) = self.path_for(call_id) else {
                continue;
            };
            if std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Locking + parsing helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn lock_exclusive(file: &File, path: &Path) -> Result<()> {
    lock_with_retry(path, || file.try_lock_exclusive())
}

fn lock_shared(file: &File, path: &Path) -> Result<()> {
    lock_with_retry(path, || fs2::FileExt::try_lock_shared(file))
}

fn lock_with_retry(path: &Path, attempt: impl Fn() -> std::io::Result<()>) -> Result<()> {
    for n in 0..LOCK_ATTEMPTS {
        match attempt() {
            Ok(()) => return Ok(()),
            Err(_) if n + 1 < LOCK_ATTEMPTS => std::thread::sleep(LOCK_BACKOFF),
            Err(e) => {
                return Err(Error::Other(format!(
                    "lock on {} failed after {LOCK_ATTEMPTS} attempts: {e}",
                    path.display()
                )))
            }
        }
    }
    unreachable!("loop either returns or errors on the last attempt")
}

/// Partial or corrupt JSON reads as "record absent".
fn parse_record(raw: &str, path: &Path) -> Option<HookRecord> {
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt hook record, treating as absent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_ids_with_path_separators_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HookStateStore::open(Some(tmp.path().to_path_buf())).unwrap();
        assert!(store.path_for("../../etc/passwd").is_err());
        assert!(store.path_for("a/b").is_err());
        assert!(store.path_for("").is_err());
        assert!(store.path_for("toolu_01AbC").is_ok());
    }

    #[test]
    fn corrupt_record_reads_as_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HookStateStore::open(Some(tmp.path().to_path_buf())).unwrap();
        std::fs::write(tmp.path().join("complete_c9.json"), "{not json").unwrap();
        assert!(store.read("c9").unwrap().is_none());
    }
}
