/*
 * runtime.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * File system abstraction used by template resolution.
 *
 * Resolution only needs two operations, an existence check and a full
 * read, so the engine can run against the real disk or an in-memory tree.
 */

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// File access needed by the path resolver.
pub trait FileSystem: Send + Sync {
    /// Check if path exists and is a file.
    fn is_file(&self, path: &Path) -> bool;

    /// Read entire file contents as bytes.
    fn file_read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Read file as string with UTF-8 encoding.
    ///
    /// Default implementation reads bytes and converts to string.
    fn file_read_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.file_read(path)?;
        String::from_utf8(bytes).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid UTF-8 in file {}: {}", path.display(), e),
            )
        })
    }
}

/// File system backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFileSystem;

impl FileSystem for NativeFileSystem {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn file_read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// File system backed by an in-memory map.
///
/// Useful for testing and for templates bundled into the application.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    files: HashMap<PathBuf, String>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file.
    pub fn add(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> &mut Self {
        self.files.insert(path.into(), content.into());
        self
    }

    /// Create a file system holding the given files.
    pub fn with_files(
        files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<String>)>,
    ) -> Self {
        let mut fs = Self::new();
        for (path, content) in files {
            fs.add(path, content);
        }
        fs
    }
}

impl FileSystem for MemoryFileSystem {
    fn is_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn file_read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(path)
            .map(|content| content.clone().into_bytes())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} not found", path.display()),
                )
            })
    }
}
