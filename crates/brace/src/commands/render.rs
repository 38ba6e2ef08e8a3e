/*
 * render.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Render command implementation
 */

//! Render command implementation.
//!
//! Data comes from an optional JSON file (`--data`), then individual
//! `--set KEY=VALUE` bindings, which win over the file.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use brace_template::{DataContext, Value};
use tracing::{debug, info};

use crate::EngineArgs;

/// Arguments for the render command
#[derive(Debug)]
pub struct RenderArgs {
    /// Template reference
    pub reference: Option<String>,
    /// Inline template source
    pub source: Option<String>,
    /// JSON data file
    pub data: Option<PathBuf>,
    /// KEY=VALUE bindings
    pub values: Vec<String>,
    /// Output file path
    pub output: Option<PathBuf>,
    pub engine: EngineArgs,
}

/// Execute the render command
pub fn execute(args: RenderArgs) -> Result<()> {
    let engine = super::build_engine(&args.engine)?;
    let data = load_data(args.data.as_ref(), &args.values)?;
    debug!(bindings = data.len(), "Loaded template data");

    let output = match (&args.reference, &args.source) {
        (_, Some(source)) => engine.render_from_string(source, &data, None)?,
        (Some(reference), None) => engine
            .render_from_file(reference, &data, None)
            .with_context(|| format!("Failed to render {}", reference))?,
        (None, None) => bail!("Either a template reference or --source is required"),
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, &output)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), bytes = output.len(), "Wrote output");
        }
        None => print!("{}", output),
    }
    Ok(())
}

fn load_data(file: Option<&PathBuf>, values: &[String]) -> Result<DataContext> {
    let mut data = match file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read data file {}", path.display()))?;
            let json: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?;
            DataContext::from_json(json)
                .with_context(|| format!("Data file {} must hold a JSON object", path.display()))?
        }
        None => DataContext::new(),
    };
    for binding in values {
        let (key, value) = parse_binding(binding)?;
        data.assign(key, value);
    }
    Ok(data)
}

/// Parse `KEY=VALUE`; VALUE is JSON when it parses as JSON, a string otherwise.
fn parse_binding(binding: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = binding.split_once('=') else {
        bail!("Invalid --set '{}': expected KEY=VALUE", binding);
    };
    if key.is_empty() {
        bail!("Invalid --set '{}': empty key", binding);
    }
    let value = serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw));
    Ok((key.to_string(), value))
}
