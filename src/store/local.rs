//! Filesystem object store.
//!
//! Keys map to relative paths under a root directory (`/` separated). Writes
//! go to a temporary sibling file and are renamed into place so readers never
//! see a partial object. Compare-and-swap is serialized with an exclusive
//! lock file next to the target.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::ObjectStore;
use crate::error::{Result, TileGridError};

const TEMP_SUFFIX: &str = ".partial";
const LOCK_SUFFIX: &str = ".lock";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl LocalStore {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns `Io` if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock_timeout: Duration::from_secs(10),
        })
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of `key`.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for empty keys or keys that would escape the
    /// root (`..`, absolute paths).
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(TileGridError::invalid_parameter(format!("invalid object key {key:?}")));
        }
        Ok(self.root.join(relative))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        write_via_temp(path, |file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
    }

    fn acquire_lock(&self, path: &Path) -> Result<LockGuard> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut lock = path.as_os_str().to_owned();
        lock.push(LOCK_SUFFIX);
        let lock = PathBuf::from(lock);

        let start = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&lock) {
                Ok(_) => return Ok(LockGuard { path: lock }),
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                    if start.elapsed() > self.lock_timeout {
                        return Err(TileGridError::Storage(format!(
                            "timed out waiting for lock {}",
                            lock.display()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release lock file");
        }
    }
}

fn is_internal(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(TEMP_SUFFIX) || n.ends_with(LOCK_SUFFIX))
}

impl ObjectStore for LocalStore {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        self.write_atomic(&path, &bytes)?;
        debug!(key, bytes = bytes.len(), "Stored object");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(TileGridError::ObjectNotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Walk from the deepest directory fully named by the prefix
        let dir_part = prefix.rsplit_once('/').map_or("", |(dir, _)| dir);
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dir_part)?
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&start).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %start.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || is_internal(entry.path()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn compare_and_swap(&self, key: &str, expected: Option<&[u8]>, new: Vec<u8>) -> Result<bool> {
        let path = self.path_for(key)?;
        let _lock = self.acquire_lock(&path)?;

        let current = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == IoErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if current.as_deref() != expected {
            return Ok(false);
        }
        self.write_atomic(&path, &new)?;
        Ok(true)
    }
}

/// Fill a temporary sibling of `path` with `fill` and rename it into place.
/// The temporary file is removed if any step fails.
fn write_via_temp(path: &Path, fill: impl FnOnce(&mut fs::File) -> std::io::Result<()>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut temp = path.as_os_str().to_owned();
    temp.push(format!(".{}.{seq}{TEMP_SUFFIX}", std::process::id()));
    let temp = PathBuf::from(temp);

    let mut file = fs::File::create(&temp)?;
    let written = fill(&mut file).and_then(|()| {
        drop(file);
        fs::rename(&temp, path)
    });
    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&temp) {
            warn!(path = %temp.display(), error = %cleanup, "Failed to remove temporary file");
        }
        return Err(e.into());
    }
    Ok(())
}
