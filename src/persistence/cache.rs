use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

pub const NPC_LOCATIONS: &str = "npc_locations";
pub const PATHFINDING: &str = "pathfinding";

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_errors: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64) / (total as f64)
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_errors: AtomicU64,
}

/// On-disk JSON cache: one directory per cache type, one `<key>.json` file per entry.
///
/// Entries never expire. The directory is assumed to have a single writer.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    counters: Counters,
}

impl CacheStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| CacheError::CreateDir(root.clone(), err))?;
        debug!(root = %root.display(), "cache store opened");
        Ok(Self {
            root,
            counters: Counters::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the cached value, or `None` when the entry is missing or no longer parses.
    pub fn get<T: DeserializeOwned>(&self, cache_type: &str, key: &str) -> Option<T> {
        match self.load(cache_type, key) {
            Ok(Some(value)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                debug!(cache_type, key, error = %err, "cache entry unreadable, treating as miss");
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Persists `value`, overwriting any previous entry. Write failures are logged and
    /// reported through the return value; callers carry on uncached.
    pub fn set<T: Serialize>(&self, cache_type: &str, key: &str, value: &T) -> bool {
        match self.store(cache_type, key, value) {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                warn!(cache_type, key, error = %err, "cache write failed");
                self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn exists(&self, cache_type: &str, key: &str) -> bool {
        self.entry_path(cache_type, key)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Deletes an entry. Returns whether something was removed.
    pub fn remove(&self, cache_type: &str, key: &str) -> Result<bool, CacheError> {
        let path = self.entry_path(cache_type, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(CacheError::Io(path, err)),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            write_errors: self.counters.write_errors.load(Ordering::Relaxed),
        }
    }

    fn load<T: DeserializeOwned>(&self, cache_type: &str, key: &str) -> Result<Option<T>, CacheError> {
        let path = self.entry_path(cache_type, key)?;
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CacheError::Io(path, err)),
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|err| CacheError::Decode(path, err))
    }

    fn store<T: Serialize>(&self, cache_type: &str, key: &str, value: &T) -> Result<(), CacheError> {
        let dir = self.type_dir(cache_type)?;
        fs::create_dir_all(&dir).map_err(|err| CacheError::CreateDir(dir.clone(), err))?;
        let path = self.entry_path(cache_type, key)?;
        let data = serde_json::to_string_pretty(value)
            .map_err(|err| CacheError::Encode(path.clone(), err))?;
        fs::write(&path, data).map_err(|err| CacheError::Io(path, err))
    }

    fn type_dir(&self, cache_type: &str) -> Result<PathBuf, CacheError> {
        validate_segment(cache_type)?;
        Ok(self.root.join(cache_type))
    }

    fn entry_path(&self, cache_type: &str, key: &str) -> Result<PathBuf, CacheError> {
        validate_segment(key)?;
        Ok(self.type_dir(cache_type)?.join(format!("{key}.json")))
    }
}

/// Cache types and keys become path components, so they may not escape the cache root.
fn validate_segment(segment: &str) -> Result<(), CacheError> {
    let valid = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(segment.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache dir create failed for {}: {}", .0.display(), .1)]
    CreateDir(PathBuf, #[source] std::io::Error),
    #[error("cache io failed for {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
    #[error("cache entry {} does not decode: {}", .0.display(), .1)]
    Decode(PathBuf, #[source] serde_json::Error),
    #[error("cache entry {} does not encode: {}", .0.display(), .1)]
    Encode(PathBuf, #[source] serde_json::Error),
    #[error("invalid cache key segment {0:?}")]
    InvalidKey(String),
}
