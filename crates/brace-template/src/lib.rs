/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Brace-tag template engine.
//!
//! Templates are plain text with tags in braces. They compile to a small host
//! script, which is cached and then executed against a data context:
//!
//! - Interpolation: `{$name}`, `{$user.name}`, `{:expr}`
//! - Blocks: `{if $x}...{elseif $y}...{else}...{/if}`, `{foreach $items as $i}`,
//!   `{for ...}`, `{switch $x}{case 1}...{/case}{default}...{/default}{/switch}`
//! - Functions: `{function row($cells)}...{/function}`
//! - Statements and output: `{php $x = 1}`, `{echo expr}`, `{print expr}`,
//!   `{dump expr}`, raw `{php}...{/php}` regions
//! - Includes: `{include header@main}`, `{include a,b@main}`
//! - Literal blocks: `{literal}...{/literal}` pass through untouched
//!
//! # Architecture
//!
//! - [`compiler`] rewrites tags into host script text, expanding includes
//!   through the [`resolver`] and protecting literal blocks with [`literal`].
//! - [`cache`] stores compiled artifacts under keys derived from their
//!   identity.
//! - [`lexer`], [`parser`] and [`evaluator`] run the host script.
//! - [`engine`] ties these together behind two render entry points.
//!
//! # Example
//!
//! ```ignore
//! use brace_template::{DataContext, Engine};
//!
//! let mut engine = Engine::new();
//! engine.add_path("main", "templates", 0);
//!
//! let mut data = DataContext::new();
//! data.assign("name", "World");
//!
//! // templates/default/hello.tpl: "Hello, {$name}!"
//! let output = engine.render_from_file("hello@main", &data, None)?;
//! assert_eq!(output, "Hello, World!");
//! ```

pub mod artifact;
pub mod ast;
pub mod builtins;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod eval_context;
pub mod evaluator;
pub mod lexer;
pub mod literal;
pub mod parser;
pub mod resolver;
pub mod runtime;

// Re-export main types at crate root
pub use artifact::{CompiledArtifact, render};
pub use cache::{ArtifactCache, CacheLayer, DirectoryCache, MemoryCache, cache_key};
pub use compiler::{Compiler, ExtensionRule, IncludeSource};
pub use config::{EngineConfig, PathConfig};
pub use context::{DataContext, Value};
pub use engine::Engine;
pub use error::{TemplateError, TemplateResult};
pub use eval_context::EvalContext;
pub use literal::LiteralVault;
pub use resolver::{PathRegistry, PathResolver, TemplateReference};
pub use runtime::{FileSystem, MemoryFileSystem, NativeFileSystem};
