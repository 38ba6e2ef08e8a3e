//! brace CLI - Main entry point

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "brace")]
#[command(version)]
#[command(about = "Render brace-tag templates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Engine setup shared by every command.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Engine configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Register a template root (NAME=DIR or NAME=DIR:PRIORITY)
    #[arg(short, long = "path", value_name = "NAME=DIR")]
    paths: Vec<String>,

    /// Type directory tried before `default` (repeatable)
    #[arg(long = "type", value_name = "TYPE")]
    types: Vec<String>,

    /// Store compiled artifacts in DIR
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Bypass the artifact cache
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template reference or inline source
    Render {
        /// Template reference (file@registry)
        #[arg(required_unless_present = "source", conflicts_with = "source")]
        reference: Option<String>,

        /// Render this template text instead of a reference
        #[arg(short, long)]
        source: Option<String>,

        /// JSON file with template data
        #[arg(short, long, value_name = "FILE")]
        data: Option<PathBuf>,

        /// Data value (KEY=VALUE, VALUE parsed as JSON when possible)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        values: Vec<String>,

        /// Write output to FILE instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Print the compiled host script for a template
    Compile {
        /// Template reference (file@registry)
        #[arg(required_unless_present = "source", conflicts_with = "source")]
        reference: Option<String>,

        /// Compile this template text instead of a reference
        #[arg(short, long)]
        source: Option<String>,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brace=info,brace_template=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            reference,
            source,
            data,
            values,
            output,
            engine,
        } => commands::render::execute(commands::render::RenderArgs {
            reference,
            source,
            data,
            values,
            output,
            engine,
        }),
        Commands::Compile {
            reference,
            source,
            engine,
        } => commands::compile::execute(commands::compile::CompileArgs {
            reference,
            source,
            engine,
        }),
    }
}
