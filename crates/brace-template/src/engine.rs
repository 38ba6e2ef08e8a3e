/*
 * engine.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The template engine: path registries, tag rules, the artifact cache and
//! global data behind the two render entry points.
//!
//! Setup methods take `&mut self`; rendering takes `&self`, so a configured
//! engine can be shared between threads behind an `Arc`.
//!
//! ```ignore
//! let mut engine = Engine::new();
//! engine.add_path("main", "/srv/templates", 0);
//! engine.assign("site", "Example");
//!
//! let mut data = DataContext::new();
//! data.assign("title", "Home");
//! let html = engine.render_from_file("page@main", &data, None)?;
//! ```

use crate::artifact::CompiledArtifact;
use crate::cache::{ArtifactCache, CacheLayer, cache_key, string_identity};
use crate::compiler::{Compiler, ExtensionRule, IncludeSource};
use crate::config::EngineConfig;
use crate::context::{DataContext, Value};
use crate::error::TemplateResult;
use crate::resolver::{PathRegistry, PathResolver};
use crate::runtime::{FileSystem, NativeFileSystem};
use regex::Captures;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Engine {
    resolver: PathResolver,
    compiler: Compiler,
    cache: CacheLayer,
    fs: Arc<dyn FileSystem>,
    globals: DataContext,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("resolver", &self.resolver)
            .field("compiler", &self.compiler)
            .field("cache", &self.cache)
            .field("globals", &self.globals)
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine reading templates from the local disk.
    pub fn new() -> Self {
        Self::with_file_system(Arc::new(NativeFileSystem))
    }

    pub fn with_file_system(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            resolver: PathResolver::new(),
            compiler: Compiler::new(),
            cache: CacheLayer::new(),
            fs,
            globals: DataContext::new(),
        }
    }

    /// Build an engine from a loaded configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut engine = Self::new();
        engine.apply_config(config);
        engine
    }

    /// Apply a configuration on top of the current settings.
    pub fn apply_config(&mut self, config: &EngineConfig) -> &mut Self {
        self.set_extension(&config.extension);
        self.set_types(config.types.iter().cloned());
        self.set_debug(config.debug);
        self.compiler.set_max_include_depth(config.max_include_depth);
        for entry in &config.paths {
            self.add_path(entry.name.clone(), entry.root.clone(), entry.priority);
        }
        self
    }

    /// Add a root directory to a named registry.
    pub fn add_path(
        &mut self,
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        priority: i32,
    ) -> &mut Self {
        self.resolver.registry_mut().add_path(name, root, priority);
        self
    }

    /// Remove a named registry. Always succeeds.
    pub fn remove_path(&mut self, name: &str) -> bool {
        self.resolver.registry_mut().remove_path(name)
    }

    pub fn paths(&self) -> &PathRegistry {
        self.resolver.registry()
    }

    pub fn set_types(&mut self, types: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.resolver.set_types(types);
        self
    }

    pub fn set_extension(&mut self, extension: &str) -> &mut Self {
        self.resolver.set_extension(extension);
        self
    }

    pub fn set_debug(&mut self, debug: bool) -> &mut Self {
        self.cache.set_debug(debug);
        self
    }

    pub fn set_cache(&mut self, cache: Arc<dyn ArtifactCache>) -> &mut Self {
        self.cache.set_cache(cache);
        self
    }

    /// Register a custom tag rule. Rules apply after the built-in ones, in
    /// registration order.
    pub fn extend(
        &mut self,
        pattern: &str,
        rewrite: impl Fn(&Captures<'_>) -> String + Send + Sync + 'static,
    ) -> TemplateResult<&mut Self> {
        self.compiler.extend(ExtensionRule::new(pattern, rewrite)?);
        Ok(self)
    }

    /// Bind a global value visible to every render.
    pub fn assign(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.globals.assign(name, value);
        self
    }

    /// Bind several global values at once.
    pub fn assign_all<K, V>(&mut self, bindings: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.globals.assign_all(bindings);
        self
    }

    pub fn globals(&self) -> &DataContext {
        &self.globals
    }

    /// Resolve a `file@registry` reference to a path.
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        self.resolver.resolve(reference, self.fs.as_ref())
    }

    /// Compile template source to host script text.
    pub fn compile_string(&self, source: &str) -> TemplateResult<String> {
        self.compiler.compile(source, self.includes())
    }

    /// Resolve, read and compile a template reference.
    pub fn compile_file(&self, reference: &str) -> TemplateResult<String> {
        let source = self.resolver.read_source(reference, self.fs.as_ref())?;
        self.compile_string(&source)
    }

    /// Render a template reference. The cache key defaults to one derived
    /// from the reference.
    pub fn render_from_file(
        &self,
        reference: &str,
        data: &DataContext,
        key: Option<&str>,
    ) -> TemplateResult<String> {
        let key = cache_key(key.unwrap_or(reference));
        let artifact = self
            .cache
            .get_or_compile(&key, || self.compile_file(reference))?;
        tracing::debug!(reference, key = %key, "Rendering template");
        self.render_artifact(&artifact, data)
    }

    /// Render template source text. The cache key defaults to one derived
    /// from a digest of the source.
    pub fn render_from_string(
        &self,
        source: &str,
        data: &DataContext,
        key: Option<&str>,
    ) -> TemplateResult<String> {
        let key = match key {
            Some(key) => cache_key(key),
            None => cache_key(&string_identity(source)),
        };
        let artifact = self
            .cache
            .get_or_compile(&key, || self.compile_string(source))?;
        self.render_artifact(&artifact, data)
    }

    /// Globals first, then per-call data; per-call values win.
    fn render_artifact(
        &self,
        artifact: &CompiledArtifact,
        data: &DataContext,
    ) -> TemplateResult<String> {
        if self.globals.is_empty() {
            return artifact.render(data);
        }
        let mut merged = self.globals.clone();
        merged.merge(data);
        artifact.render(&merged)
    }

    fn includes(&self) -> IncludeSource<'_> {
        IncludeSource {
            resolver: &self.resolver,
            fs: self.fs.as_ref(),
        }
    }
}
