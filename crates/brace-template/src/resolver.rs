/*
 * resolver.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template reference resolution.
//!
//! A template reference has the shape `file@registry`. Each registry is a
//! named list of root directories ordered by descending priority; roots with
//! equal priority keep the order they were added in. Within every root the
//! resolver walks the type-fallback list, always ending with `default`:
//!
//! ```text
//! header@main, types = ["mobile"], roots = [/site (10), /base (0)]
//!
//!   /site/mobile/header.tpl
//!   /site/default/header.tpl
//!   /base/mobile/header.tpl
//!   /base/default/header.tpl
//! ```
//!
//! The first existing candidate wins.

use crate::error::{TemplateError, TemplateResult};
use crate::runtime::FileSystem;
use indexmap::IndexMap;
use std::path::PathBuf;

/// Type directory that terminates every fallback list.
pub const DEFAULT_TYPE: &str = "default";

/// Extension appended to template file names unless configured otherwise.
pub const DEFAULT_EXTENSION: &str = ".tpl";

/// A parsed `file@registry` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateReference<'a> {
    pub file: &'a str,
    pub registry: &'a str,
}

impl<'a> TemplateReference<'a> {
    /// Split a reference at its first `@`.
    ///
    /// Returns `None` unless both the file and the registry part are
    /// non-empty.
    pub fn parse(reference: &'a str) -> Option<Self> {
        let (file, registry) = reference.split_once('@')?;
        if file.is_empty() || registry.is_empty() {
            return None;
        }
        Some(Self { file, registry })
    }
}

/// A root directory registered under a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootEntry {
    pub root: PathBuf,
    pub priority: i32,
}

/// Named, priority-ordered lists of template roots.
#[derive(Debug, Clone, Default)]
pub struct PathRegistry {
    registries: IndexMap<String, Vec<RootEntry>>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root to a registry, creating the registry on first use.
    ///
    /// Entries are kept sorted by descending priority. The sort is stable, so
    /// roots with equal priority are visited in insertion order.
    pub fn add_path(&mut self, name: impl Into<String>, root: impl Into<PathBuf>, priority: i32) {
        let entries = self.registries.entry(name.into()).or_default();
        entries.push(RootEntry {
            root: root.into(),
            priority,
        });
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Remove a registry. Removing an unknown name is a no-op; always succeeds.
    pub fn remove_path(&mut self, name: &str) -> bool {
        self.registries.shift_remove(name);
        true
    }

    /// Roots of a registry in visiting order.
    pub fn roots(&self, name: &str) -> Option<&[RootEntry]> {
        self.registries.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registries.contains_key(name)
    }

    /// Registry names in the order they were first created.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.registries.keys().map(String::as_str)
    }
}

/// Resolves template references against a [`PathRegistry`].
#[derive(Debug, Clone)]
pub struct PathResolver {
    registry: PathRegistry,
    types: Vec<String>,
    extension: String,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PathResolver {
    pub fn new() -> Self {
        Self {
            registry: PathRegistry::new(),
            types: Vec::new(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    pub fn registry(&self) -> &PathRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PathRegistry {
        &mut self.registry
    }

    /// Set the type-fallback list. `default` must not be included; it is
    /// appended at resolution time.
    pub fn set_types(&mut self, types: impl IntoIterator<Item = impl Into<String>>) {
        self.types = types
            .into_iter()
            .map(Into::into)
            .filter(|t| t != DEFAULT_TYPE)
            .collect();
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }

    /// Set the file extension, with or without the leading dot.
    pub fn set_extension(&mut self, extension: &str) {
        self.extension = if extension.is_empty() || extension.starts_with('.') {
            extension.to_string()
        } else {
            format!(".{}", extension)
        };
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Every candidate path for a reference, in resolution order.
    pub fn candidates(&self, reference: &TemplateReference<'_>) -> Vec<PathBuf> {
        let Some(roots) = self.registry.roots(reference.registry) else {
            return Vec::new();
        };
        let file_name = format!("{}{}", reference.file, self.extension);
        let types = self
            .types
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(DEFAULT_TYPE));

        let mut candidates = Vec::with_capacity(roots.len() * (self.types.len() + 1));
        for entry in roots {
            for ty in types.clone() {
                candidates.push(entry.root.join(ty).join(&file_name));
            }
        }
        candidates
    }

    /// Resolve a reference to the first existing file.
    ///
    /// Malformed references and unknown registries resolve to `None`.
    pub fn resolve(&self, reference: &str, fs: &dyn FileSystem) -> Option<PathBuf> {
        let parsed = TemplateReference::parse(reference)?;
        let found = self
            .candidates(&parsed)
            .into_iter()
            .find(|candidate| {
                let exists = fs.is_file(candidate);
                tracing::trace!(candidate = %candidate.display(), exists, "Checking template candidate");
                exists
            });
        match &found {
            Some(path) => tracing::debug!(reference, path = %path.display(), "Resolved template"),
            None => tracing::debug!(reference, "Template reference did not resolve"),
        }
        found
    }

    /// Resolve a reference and read its source text.
    pub fn read_source(&self, reference: &str, fs: &dyn FileSystem) -> TemplateResult<String> {
        let path = self
            .resolve(reference, fs)
            .ok_or_else(|| TemplateError::not_found(reference))?;
        Ok(fs.file_read_string(&path)?)
    }
}

/// Expand an include list such as `a,b,c@main` into full references.
///
/// Bare names inherit the trailing registry; a segment that carries its own
/// `@registry` is used as-is.
pub fn expand_include_list(list: &str) -> Vec<String> {
    let (names, registry) = match list.rsplit_once('@') {
        Some((names, registry)) if !registry.contains(',') => (names, Some(registry)),
        _ => (list, None),
    };
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| match (name.contains('@'), registry) {
            (false, Some(registry)) => format!("{}@{}", name, registry),
            _ => name.to_string(),
        })
        .collect()
}
