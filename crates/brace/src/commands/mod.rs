/*
 * mod.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Command implementations
 */

pub mod compile;
pub mod render;

use anyhow::{Context, Result, bail};
use brace_template::{DirectoryCache, Engine, EngineConfig};
use std::path::PathBuf;
use std::sync::Arc;

use crate::EngineArgs;

/// Build an engine from the config file (if any) plus command-line overrides.
pub fn build_engine(args: &EngineArgs) -> Result<Engine> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let mut engine = Engine::from_config(&config);

    for spec in &args.paths {
        let (name, root, priority) = parse_path_arg(spec)?;
        engine.add_path(name, root, priority);
    }
    if !args.types.is_empty() {
        engine.set_types(args.types.iter().cloned());
    }
    if let Some(dir) = &args.cache_dir {
        engine.set_cache(Arc::new(DirectoryCache::new(dir)));
    }
    if args.debug {
        engine.set_debug(true);
    }
    Ok(engine)
}

/// Parse `NAME=DIR` or `NAME=DIR:PRIORITY`.
fn parse_path_arg(spec: &str) -> Result<(String, PathBuf, i32)> {
    let Some((name, rest)) = spec.split_once('=') else {
        bail!("Invalid --path '{}': expected NAME=DIR", spec);
    };
    if name.is_empty() || rest.is_empty() {
        bail!("Invalid --path '{}': expected NAME=DIR", spec);
    }
    let (root, priority) = match rest.rsplit_once(':') {
        Some((root, priority)) if !root.is_empty() => match priority.parse::<i32>() {
            Ok(priority) => (root, priority),
            Err(_) => (rest, 0),
        },
        _ => (rest, 0),
    };
    Ok((name.to_string(), PathBuf::from(root), priority))
}
