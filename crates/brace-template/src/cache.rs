/*
 * cache.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiled-artifact caching.
//!
//! Artifacts are keyed by a string derived from their identity: the template
//! reference for file renders, or a digest of the source text for string
//! renders. Any [`ArtifactCache`] implementation can be plugged in; when no
//! cache is configured, or the engine runs in debug mode, every render
//! compiles afresh.

use crate::artifact::CompiledArtifact;
use crate::error::TemplateResult;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Prefix for every generated cache key.
pub const KEY_PREFIX: &str = "tpl_";

/// File extension used by [`DirectoryCache`] entries.
pub const ARTIFACT_FILE_EXTENSION: &str = "tplc";

/// Build a cache key from an identity string.
///
/// Characters that commonly have special meaning in cache backends are
/// replaced with `_`.
pub fn cache_key(identity: &str) -> String {
    let sanitized: String = identity
        .chars()
        .map(|c| match c {
            '{' | '}' | '(' | ')' | '/' | '\\' | '@' | ':' => '_',
            c => c,
        })
        .collect();
    format!("{}{}", KEY_PREFIX, sanitized)
}

/// Identity of an inline template source: the hex SHA-256 of its text.
pub fn string_identity(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// A key/value store for compiled artifacts.
///
/// Implementations must be safe to share between concurrent renders.
/// Failures are not errors: a backend that cannot read an entry reports a
/// miss, and one that cannot store an entry drops it.
pub trait ArtifactCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<CompiledArtifact>>;

    fn set(&self, key: &str, artifact: Arc<CompiledArtifact>);
}

/// In-process cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Arc<CompiledArtifact>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl ArtifactCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Arc<CompiledArtifact>> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, artifact: Arc<CompiledArtifact>) {
        self.entries.write().insert(key.to_string(), artifact);
    }
}

/// Cache that persists compiled text as files in a directory.
///
/// Each entry lives at `<dir>/<key>.tplc`. The directory is created on the
/// first store.
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    dir: PathBuf,
}

impl DirectoryCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for `key`; characters other than ASCII alphanumerics, `_`, `-`
    /// and `.` become `_`, so the file always lands directly in the directory.
    fn entry_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' => c,
                _ => '_',
            })
            .collect();
        self.dir.join(format!("{}.{}", name, ARTIFACT_FILE_EXTENSION))
    }
}

impl ArtifactCache for DirectoryCache {
    fn get(&self, key: &str) -> Option<Arc<CompiledArtifact>> {
        let path = self.entry_path(key);
        match fs::read_to_string(&path) {
            Ok(code) => Some(Arc::new(CompiledArtifact::from_code(code))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Failed to read cached artifact");
                None
            }
        }
    }

    fn set(&self, key: &str, artifact: Arc<CompiledArtifact>) {
        let path = self.entry_path(key);
        let result = fs::create_dir_all(&self.dir).and_then(|_| fs::write(&path, artifact.code()));
        if let Err(err) = result {
            tracing::warn!(path = %path.display(), error = %err, "Failed to store cached artifact");
        }
    }
}

/// The engine's view of its cache: an optional backend plus the debug
/// switch.
#[derive(Clone, Default)]
pub struct CacheLayer {
    cache: Option<Arc<dyn ArtifactCache>>,
    debug: bool,
}

impl fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLayer")
            .field("cache", &self.cache.as_ref().map(|_| "<dyn ArtifactCache>"))
            .field("debug", &self.debug)
            .finish()
    }
}

impl CacheLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cache(&mut self, cache: Arc<dyn ArtifactCache>) {
        self.cache = Some(cache);
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Return the cached artifact for `key`, or compile one and store it.
    ///
    /// In debug mode, or without a backend, the cache is neither read nor
    /// written. A failed compile stores nothing.
    pub fn get_or_compile(
        &self,
        key: &str,
        compile: impl FnOnce() -> TemplateResult<String>,
    ) -> TemplateResult<Arc<CompiledArtifact>> {
        let cache = match &self.cache {
            Some(cache) if !self.debug => cache,
            _ => {
                tracing::trace!(key, debug = self.debug, "Compiling without cache");
                return Ok(Arc::new(CompiledArtifact::from_code(compile()?)));
            }
        };

        if let Some(artifact) = cache.get(key) {
            tracing::debug!(key, "Artifact cache hit");
            return Ok(artifact);
        }

        tracing::debug!(key, "Artifact cache miss");
        let artifact = Arc::new(CompiledArtifact::from_code(compile()?));
        cache.set(key, Arc::clone(&artifact));
        tracing::debug!(key, "Stored compiled artifact");
        Ok(artifact)
    }
}
