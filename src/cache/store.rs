//! On-disk artifact cache.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tracing::{debug, warn};

use super::key::{expand_template, fingerprint};
use crate::error::CacheError;
use crate::params::ParameterSet;

/// Default cache filename prefix.
pub const DEFAULT_CACHE_PREFIX: &str = "timthumb";

/// Default cache filename suffix. Only files with this suffix are swept.
pub const DEFAULT_CACHE_SUFFIX: &str = ".timthumb.txt";

/// Default fingerprint salt.
pub const DEFAULT_CACHE_SALT: &str = "IOLUJN!(Y&)(TEHlsio(&*Y3978fgsdBBu";

/// Default age after which entries are swept (1 day).
pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(86_400);

/// Default minimum time between two sweeps (1 day).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(86_400);

/// Marker file whose mtime records the last sweep.
pub const SWEEP_MARKER: &str = "imthumb_last_sweep.touch";

const TEMP_PREFIX: &str = "imthumb_tmpimg_";

// =============================================================================
// Configuration
// =============================================================================

/// Cache location and naming.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub directory: PathBuf,
    pub prefix: String,
    pub suffix: String,
    pub salt: String,
    pub filename_template: Option<String>,
    pub max_age: Duration,
    /// Zero disables sweeping.
    pub sweep_interval: Duration,
}

impl CacheConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: DEFAULT_CACHE_PREFIX.to_string(),
            suffix: DEFAULT_CACHE_SUFFIX.to_string(),
            salt: DEFAULT_CACHE_SALT.to_string(),
            filename_template: None,
            max_age: DEFAULT_CACHE_MAX_AGE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = salt.into();
        self
    }

    pub fn with_filename_template(mut self, template: impl Into<String>) -> Self {
        self.filename_template = Some(template.into());
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// Metadata of an existing cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub modified: SystemTime,
    pub len: u64,
}

impl CacheEntry {
    /// An entry may be served unless the source changed after it was written.
    pub fn is_fresh_for(&self, source_modified: Option<SystemTime>) -> bool {
        match source_modified {
            Some(source) => source <= self.modified,
            None => true,
        }
    }
}

// =============================================================================
// Artifact Cache
// =============================================================================

/// Stores rendered thumbnails as files keyed by their parameter fingerprint.
///
/// All methods do blocking filesystem I/O; async callers run them on the
/// blocking pool.
///
/// Writes go to a temporary file in the cache directory, then the final name
/// is replaced by rename while an advisory lock on `<entry>.lock` is held, so
/// readers only ever see a complete file.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    config: CacheConfig,
}

impl ArtifactCache {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// Deterministic cache path for a parameter set.
    pub fn path(&self, params: &ParameterSet) -> PathBuf {
        let name = match &self.config.filename_template {
            Some(template) => expand_template(template, params),
            None => format!(
                "{}{}{}",
                self.config.prefix,
                fingerprint(params, &self.config.salt),
                self.config.suffix
            ),
        };
        self.config.directory.join(name)
    }

    /// Metadata of the cached artifact, if one exists.
    pub fn lookup(&self, params: &ParameterSet) -> Option<CacheEntry> {
        let meta = fs::metadata(self.path(params)).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(CacheEntry {
            modified: meta.modified().ok()?,
            len: meta.len(),
        })
    }

    /// Read the cached bytes. A missing entry is `Ok(None)`.
    pub fn read(&self, params: &ParameterSet) -> Result<Option<Bytes>, CacheError> {
        let path = self.path(params);
        match fs::read(&path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Atomically store a rendered artifact.
    ///
    /// Concurrent writers for the same path serialise on the entry's lock
    /// file; whichever renames last wins and readers never observe a partial
    /// file.
    pub fn write(&self, params: &ParameterSet, data: &[u8]) -> Result<PathBuf, CacheError> {
        let dir = self.directory();
        let path = self.path(params);

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)
            .map_err(|e| CacheError::io(dir, e))?;
        temp.write_all(data)
            .and_then(|_| temp.flush())
            .map_err(|e| CacheError::io(temp.path(), e))?;

        let lock_path = lock_path_for(&path);
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| CacheError::io(&lock_path, e))?;

        if let Err(e) = lock.lock() {
            warn!(path = %path.display(), error = %e, "Failed to lock cache entry");
            drop(lock);
            let _ = fs::remove_file(&lock_path);
            // Dropping `temp` deletes the temporary file.
            return Err(CacheError::LockFailed { path });
        }

        let result = replace_entry(temp, &path);

        let _ = lock.unlock();
        drop(lock);
        let _ = fs::remove_file(&lock_path);

        result?;
        debug!(path = %path.display(), bytes = data.len(), "Cached artifact");
        Ok(path)
    }

    /// Delete the entry for a parameter set, if present.
    pub fn remove(&self, params: &ParameterSet) -> Result<(), CacheError> {
        let path = self.path(params);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Delete expired entries if the sweep interval has elapsed.
    ///
    /// Returns `Ok(None)` when no sweep was due, otherwise the number of
    /// files removed. The first call only creates the marker.
    pub fn sweep_expired(&self) -> Result<Option<usize>, CacheError> {
        if self.config.sweep_interval.is_zero() {
            return Ok(None);
        }

        let dir = self.directory();
        let marker = dir.join(SWEEP_MARKER);
        let now = SystemTime::now();

        let last_sweep = match fs::metadata(&marker).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                touch(&marker, now).map_err(|e| CacheError::io(&marker, e))?;
                return Ok(None);
            }
            Err(e) => return Err(CacheError::io(&marker, e)),
        };

        let due = now
            .duration_since(last_sweep)
            .map(|elapsed| elapsed >= self.config.sweep_interval)
            .unwrap_or(false);
        if !due {
            return Ok(None);
        }

        touch(&marker, now).map_err(|e| CacheError::io(&marker, e))?;

        let mut removed = 0;
        let entries = fs::read_dir(dir).map_err(|e| CacheError::io(dir, e))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().ends_with(&self.config.suffix) {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let expired = now
                .duration_since(modified)
                .map(|age| age > self.config.max_age)
                .unwrap_or(false);
            if expired && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }

        debug!(dir = %dir.display(), removed, "Swept expired cache entries");
        Ok(Some(removed))
    }

    /// Create the cache directory if needed and prove it is writable by
    /// touching an `index.html` placeholder in it.
    pub fn ensure_directory_writable(&self) -> Result<(), CacheError> {
        let dir = self.directory();
        let not_writable = |e: io::Error| CacheError::DirectoryNotWritable {
            path: dir.to_path_buf(),
            message: e.to_string(),
        };

        fs::create_dir_all(dir).map_err(not_writable)?;
        touch(&dir.join("index.html"), SystemTime::now()).map_err(not_writable)?;
        Ok(())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn replace_entry(temp: tempfile::NamedTempFile, path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(CacheError::io(path, e)),
    }
    temp.persist(path)
        .map_err(|e| CacheError::io(path, e.error))?;
    Ok(())
}

fn touch(path: &Path, at: SystemTime) -> io::Result<()> {
    let file: File = OpenOptions::new().create(true).append(true).open(path)?;
    file.set_modified(at)
}
