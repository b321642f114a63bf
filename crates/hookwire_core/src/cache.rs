//! Cache compiler: persists definition maps between runs.
//!
//! A cache hit short-circuits the scanner entirely. The file is discarded when
//! it was written for another entry module or format version, when caching is
//! disabled, or when decompilation is requested.
//!
//! Writes go to a temporary sibling file that is renamed into place, so a
//! reader never observes a half-written cache.

use core::sync::atomic::{AtomicBool, Ordering};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::definition::DefinitionMap;
use crate::error::CacheError;

/// Version of the on-disk format. Bump when records change shape.
pub const SCHEMA_VERSION: &str = "2";

/// Default cache file name, relative to the working directory.
pub const DEFAULT_CACHE_FILE: &str = "hookwire-definitions.json";

#[derive(Serialize, Deserialize)]
struct CacheFile {
    schema_version: String,
    map: DefinitionMap,
}

/// Reads a definition map from `path`.
///
/// # Errors
///
/// - [`CacheError::NotFound`] if the file does not exist
/// - [`CacheError::Stale`] if it was written with another format version
/// - [`CacheError::Io`] or [`CacheError::Format`] if it cannot be read or parsed
pub fn load(path: &Path) -> Result<DefinitionMap, CacheError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(CacheError::NotFound(path.to_path_buf()));
        }
        Err(err) => return Err(CacheError::Io(err)),
    };

    let file: CacheFile = serde_json::from_slice(&bytes)?;
    if file.schema_version != SCHEMA_VERSION {
        return Err(CacheError::Stale {
            path: path.to_path_buf(),
            reason: format!(
                "schema version {} (expected {SCHEMA_VERSION})",
                file.schema_version
            ),
        });
    }
    Ok(file.map)
}

/// Writes `map` to `path` atomically.
///
/// # Errors
///
/// Returns [`CacheError::Io`] or [`CacheError::Format`] on failure.
pub fn save(path: &Path, map: &DefinitionMap) -> Result<(), CacheError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let file = CacheFile {
        schema_version: SCHEMA_VERSION.to_string(),
        map: map.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&file)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// When a requested decompilation takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decompile {
    /// Remove the cache file now.
    Immediate,
    /// Remove it on [`CacheCompiler::flush`], usually at shutdown.
    Deferred,
}

/// Policy wrapper around [`load`] and [`save`].
#[derive(Debug)]
pub struct CacheCompiler {
    path: PathBuf,
    enabled: bool,
    pending: AtomicBool,
}

impl CacheCompiler {
    /// A compiler for the cache file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            path: path.into(),
            enabled,
            pending: AtomicBool::new(false),
        }
    }

    /// The cache file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether caching is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a deferred decompilation is waiting for [`flush`](Self::flush).
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Loads the cached map for `entry`.
    ///
    /// A cache written for another entry module or format version is deleted,
    /// and so is any cache left on disk while caching is disabled.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] when caching is disabled, a decompilation is
    /// pending, or no file exists; otherwise see [`load`].
    pub fn load(&self, entry: &str) -> Result<DefinitionMap, CacheError> {
        if !self.enabled {
            self.discard();
            return Err(CacheError::NotFound(self.path.clone()));
        }
        if self.is_pending() {
            return Err(CacheError::NotFound(self.path.clone()));
        }

        let map = match load(&self.path) {
            Err(err @ CacheError::Stale { .. }) => {
                self.discard();
                return Err(err);
            }
            other => other?,
        };

        if map.entry != entry {
            self.discard();
            return Err(CacheError::Stale {
                path: self.path.clone(),
                reason: format!("built for entry '{}', not '{entry}'", map.entry),
            });
        }

        tracing::debug!(path = %self.path.display(), entry, "definition cache hit");
        Ok(map)
    }

    /// Saves `map` if caching is enabled.
    ///
    /// # Errors
    ///
    /// See [`save`].
    pub fn save(&self, map: &DefinitionMap) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        save(&self.path, map)?;
        tracing::debug!(path = %self.path.display(), entry = %map.entry, "definition cache written");
        Ok(())
    }

    /// Requests removal of the cache file.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if an immediate removal fails.
    pub fn decompile(&self, mode: Decompile) -> Result<(), CacheError> {
        match mode {
            Decompile::Immediate => self.remove().map(|_| ()),
            Decompile::Deferred => {
                self.pending.store(true, Ordering::Release);
                Ok(())
            }
        }
    }

    /// Applies a deferred decompilation. Returns true if a file was removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if removal fails.
    pub fn flush(&self) -> Result<bool, CacheError> {
        if !self.pending.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        self.remove()
    }

    fn remove(&self) -> Result<bool, CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(CacheError::Io(err)),
        }
    }

    fn discard(&self) {
        if let Err(err) = self.remove() {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to discard stale cache");
        }
    }
}
