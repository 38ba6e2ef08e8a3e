/*
 * config.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Engine configuration loaded from TOML.
//!
//! ```toml
//! extension = ".tpl"
//! debug = false
//! types = ["mobile"]
//! max_include_depth = 50
//!
//! [[paths]]
//! name = "main"
//! root = "templates"
//! priority = 10
//! ```

use crate::compiler::DEFAULT_MAX_INCLUDE_DEPTH;
use crate::error::TemplateResult;
use crate::resolver::DEFAULT_EXTENSION;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration for an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// File extension appended to template names.
    pub extension: String,

    /// Bypass the artifact cache for reads and writes.
    pub debug: bool,

    /// Type directories tried before `default`, in order.
    pub types: Vec<String>,

    /// Maximum include nesting.
    pub max_include_depth: usize,

    /// Registry roots.
    pub paths: Vec<PathConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extension: DEFAULT_EXTENSION.to_string(),
            debug: false,
            types: Vec::new(),
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            paths: Vec::new(),
        }
    }
}

/// One `[[paths]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathConfig {
    pub name: String,
    pub root: PathBuf,
    #[serde(default)]
    pub priority: i32,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> TemplateResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config file. Relative roots are taken relative to the
    /// directory containing the file.
    pub fn from_file(path: &Path) -> TemplateResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            for entry in &mut config.paths {
                if entry.root.is_relative() {
                    entry.root = base.join(&entry.root);
                }
            }
        }
        tracing::debug!(path = %path.display(), paths = config.paths.len(), "Loaded engine config");
        Ok(config)
    }
}
