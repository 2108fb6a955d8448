//! Delivery checkpoints: last successfully delivered timestamp per scope.
//!
//! One checkpoint exists per `(array, entity class)` or `(array, pool)`. It
//! is read at the start of a run and overwritten only after the sink has
//! accepted a batch. There is exactly one writer per checkpoint (one collector
//! process per array); no locking is done here.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

/// Error while reading or writing a checkpoint.
#[derive(Debug)]
pub struct CheckpointError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "checkpoint {}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Key/value store for delivery checkpoints.
pub trait CheckpointStore {
    /// Last delivered timestamp for `key`, if any.
    fn get(&self, key: &str) -> Result<Option<i64>, CheckpointError>;

    /// Records `timestamp` as delivered for `key`.
    fn put(&mut self, key: &str, timestamp: i64) -> Result<(), CheckpointError>;
}

impl<T: CheckpointStore + ?Sized> CheckpointStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<i64>, CheckpointError> {
        (**self).get(key)
    }

    fn put(&mut self, key: &str, timestamp: i64) -> Result<(), CheckpointError> {
        (**self).put(key, timestamp)
    }
}

/// Checkpoints kept in memory. Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    entries: HashMap<String, i64>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get(&self, key: &str) -> Result<Option<i64>, CheckpointError> {
        Ok(self.entries.get(key).copied())
    }

    fn put(&mut self, key: &str, timestamp: i64) -> Result<(), CheckpointError> {
        self.entries.insert(key.to_string(), timestamp);
        Ok(())
    }
}

/// One small text file per key holding a decimal timestamp.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the old checkpoint, so a crash leaves either the old or the new value.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Opens (and creates if needed) a checkpoint directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| CheckpointError {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the checkpoint for `key`.
    ///
    /// Bytes outside `[A-Za-z0-9._-]` are percent-encoded, so distinct keys
    /// always map to distinct files.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() + 5);
        for b in key.bytes() {
            if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_') {
                name.push(b as char);
            } else {
                name.push_str(&format!("%{:02X}", b));
            }
        }
        name.push_str(".last");
        self.dir.join(name)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, key: &str) -> Result<Option<i64>, CheckpointError> {
        let path = self.path_for(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CheckpointError { path, source }),
        };

        match content.trim().parse::<i64>() {
            Ok(ts) => Ok(Some(ts)),
            Err(_) => {
                // Worst case the next batch is delivered once more.
                warn!(
                    "Ignoring unreadable checkpoint {}: {:?}",
                    path.display(),
                    content.trim()
                );
                Ok(None)
            }
        }
    }

    fn put(&mut self, key: &str, timestamp: i64) -> Result<(), CheckpointError> {
        let path = self.path_for(key);
        write_atomic(&path, timestamp.to_string().as_bytes())
            .map_err(|source| CheckpointError { path, source })
    }
}

/// Writes `contents` to a temp file next to `path` and renames it into place.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_get_put() {
        let mut store = MemoryCheckpointStore::new();
        assert_eq!(store.get("APM001.disks").unwrap(), None);
        store.put("APM001.disks", 100).unwrap();
        store.put("APM001.disks", 200).unwrap();
        assert_eq!(store.get("APM001.disks").unwrap(), Some(200));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileCheckpointStore::open(dir.path()).unwrap();
            store.put("APM001.sp", 1_672_574_400).unwrap();
        }
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        assert_eq!(store.get("APM001.sp").unwrap(), Some(1_672_574_400));
        let raw = std::fs::read_to_string(store.path_for("APM001.sp")).unwrap();
        assert_eq!(raw, "1672574400");
    }

    #[test]
    fn file_store_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        assert_eq!(store.get("nothing").unwrap(), None);
    }

    #[test]
    fn file_store_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCheckpointStore::open(dir.path()).unwrap();
        store.put("k", 1).unwrap();
        store.put("k", 2).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(2));
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn file_store_corrupt_value_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        std::fs::write(store.path_for("k"), "not a number").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn keys_are_sanitized_into_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        let path = store.path_for("APM001.pool.Pool 0/../x");
        assert_eq!(path.parent().unwrap(), dir.path());
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "APM001.pool.Pool%200%2F..%2Fx.last"
        );
    }

    #[test]
    fn similar_keys_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCheckpointStore::open(dir.path()).unwrap();
        assert_ne!(
            store.path_for("APM001.pool.Pool+0"),
            store.path_for("APM001.pool.Pool_0")
        );
        assert_ne!(
            store.path_for("APM001.pool.Pool%2B0"),
            store.path_for("APM001.pool.Pool+0")
        );

        store.put("APM001.pool.Pool+0", 100).unwrap();
        assert_eq!(store.get("APM001.pool.Pool_0").unwrap(), None);
        assert_eq!(store.get("APM001.pool.Pool+0").unwrap(), Some(100));
    }

    #[test]
    fn open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileCheckpointStore::open(&nested).unwrap();
        assert!(store.dir().is_dir());
    }
}
