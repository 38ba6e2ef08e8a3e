/*
 * compile.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Compile command implementation
 */

use anyhow::{Context, Result, bail};

use crate::EngineArgs;

/// Arguments for the compile command
#[derive(Debug)]
pub struct CompileArgs {
    pub reference: Option<String>,
    pub source: Option<String>,
    pub engine: EngineArgs,
}

/// Print the host script a template compiles to.
pub fn execute(args: CompileArgs) -> Result<()> {
    let engine = super::build_engine(&args.engine)?;
    let code = match (&args.reference, &args.source) {
        (_, Some(source)) => engine.compile_string(source)?,
        (Some(reference), None) => engine
            .compile_file(reference)
            .with_context(|| format!("Failed to compile {}", reference))?,
        (None, None) => bail!("Either a template reference or --source is required"),
    };
    print!("{}", code);
    Ok(())
}
