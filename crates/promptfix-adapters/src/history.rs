//! File-backed history persistence
//!
//! Stores the recent-generations list in `<data_dir>/promptfix/history.json`.
//!
//! # Error Handling
//!
//! History is a best-effort local cache, not a system of record:
//! - A missing, unreadable, or corrupt file loads as an empty list.
//! - Save failures are returned so the caller can log them; they never
//!   interrupt a generation.

use fs2::FileExt;
use promptfix_core::history::HistoryEntry;
use promptfix_core::protocol::HistoryPersistence;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const HISTORY_FILE: &str = "history.json";
const LOCK_FILE: &str = ".history.lock";
const LOCK_TIMEOUT_SECS: u64 = 5;
const LOCK_RETRY_MS: u64 = 50;

pub struct FileHistoryStore {
    dir: PathBuf,
}

struct StoreLock {
    file: std::fs::File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl FileHistoryStore {
    /// Store rooted at an explicit directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store in the platform data directory.
    pub fn default_location() -> Option<Self> {
        dirs::data_dir().map(|p| Self::new(p.join("promptfix")))
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    fn lock(&self, exclusive: bool) -> anyhow::Result<StoreLock> {
        if exclusive {
            fs::create_dir_all(&self.dir)?;
        } else if !self.dir.exists() {
            return Err(anyhow::anyhow!("History directory missing"));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))?;

        let start = Instant::now();
        loop {
            let result = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match result {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(anyhow::anyhow!(
                            "Timed out waiting for history lock ({}s)",
                            LOCK_TIMEOUT_SECS
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
            }
        }

        Ok(StoreLock { file })
    }
}

impl HistoryPersistence for FileHistoryStore {
    fn load(&self) -> Vec<HistoryEntry> {
        let path = self.path();
        if !path.exists() {
            return Vec::new();
        }
        let _lock = match self.lock(false) {
            Ok(lock) => lock,
            Err(err) => {
                tracing::warn!("Failed to lock history for reading: {}", err);
                return Vec::new();
            }
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to load history: {}", err);
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<HistoryEntry>>(&content) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("Ignoring unreadable history file: {}", err);
                Vec::new()
            }
        }
    }

    fn save(&self, entries: &[HistoryEntry]) -> anyhow::Result<()> {
        let _lock = self.lock(true)?;
        let content = serde_json::to_string(entries)?;
        write_atomic(&self.path(), &content)
    }
}

/// Write via a temp file and rename so readers never see a partial file.
fn write_atomic(path: &Path, content: &str) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = std::fs::set_permissions(&tmp_path, perms);
    }

    #[cfg(windows)]
    {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
