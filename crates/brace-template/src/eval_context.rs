/*
 * eval_context.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Evaluation context for template rendering.
//!
//! This module provides [`EvalContext`], which is threaded through all evaluation
//! functions to support:
//!
//! 1. **Output**: The render output plus a stack of capture buffers
//!    (`ob_start` / `ob_get_clean`)
//! 2. **Functions**: Template-defined functions, visible from every frame
//! 3. **State tracking**: Call nesting depth for recursion protection
//!
//! Variable bindings live in a [`Frame`]. The top-level frame starts from the
//! render's data context; each function call gets a fresh frame holding only
//! its parameters.

use crate::ast::FunctionDef;
use crate::builtins::is_builtin;
use crate::context::{DataContext, Value};
use crate::error::{TemplateError, TemplateResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Default limit on nested template function calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 128;

/// Variable bindings for one scope.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    variables: HashMap<String, Value>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Top-level frame seeded from a data context.
    pub fn from_data(data: &DataContext) -> Self {
        Self {
            variables: data
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Mutable slot for `name`, created as null if unbound.
    pub fn slot(&mut self, name: &str) -> &mut Value {
        self.variables.entry(name.to_string()).or_default()
    }
}

/// Interpreter state shared by every frame of one render.
#[derive(Debug)]
pub struct EvalContext {
    functions: HashMap<String, Arc<FunctionDef>>,

    /// Output buffers; the bottom one is the render output.
    buffers: Vec<String>,

    /// Current function nesting depth.
    pub call_depth: usize,

    /// Maximum function nesting depth before error.
    pub max_call_depth: usize,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalContext {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
            buffers: vec![String::new()],
            call_depth: 0,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    /// Set the maximum function nesting depth.
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Append to the innermost output buffer.
    pub fn write(&mut self, text: &str) {
        if let Some(buffer) = self.buffers.last_mut() {
            buffer.push_str(text);
        }
    }

    /// Begin capturing output.
    pub fn start_buffer(&mut self) {
        self.buffers.push(String::new());
    }

    /// Stop capturing and return what was captured, or `None` if no capture
    /// is active.
    pub fn end_buffer(&mut self) -> Option<String> {
        if self.buffers.len() > 1 {
            self.buffers.pop()
        } else {
            None
        }
    }

    /// Register a template function.
    ///
    /// Defining the same definition twice is a no-op, which lets hoisted
    /// top-level functions run their definition statement again. Defining a
    /// different function under a taken name, or under a built-in name, is
    /// an error.
    pub fn define_function(&mut self, def: &Arc<FunctionDef>) -> TemplateResult<()> {
        if is_builtin(&def.name) {
            return Err(TemplateError::FunctionRedeclared {
                name: def.name.clone(),
            });
        }
        match self.functions.get(&def.name) {
            Some(existing) if Arc::ptr_eq(existing, def) => Ok(()),
            Some(_) => Err(TemplateError::FunctionRedeclared {
                name: def.name.clone(),
            }),
            None => {
                self.functions.insert(def.name.clone(), Arc::clone(def));
                Ok(())
            }
        }
    }

    pub fn function(&self, name: &str) -> Option<Arc<FunctionDef>> {
        self.functions.get(name).cloned()
    }

    /// Finish the render. Captures still open are flushed in order.
    pub fn into_output(self) -> String {
        self.buffers.concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str) -> Arc<FunctionDef> {
        Arc::new(FunctionDef {
            name: name.to_string(),
            params: vec![],
            body: vec![],
        })
    }

    #[test]
    fn test_output_buffers() {
        let mut ctx = EvalContext::new();
        ctx.write("a");
        ctx.start_buffer();
        ctx.write("b");
        assert_eq!(ctx.end_buffer(), Some("b".to_string()));
        assert_eq!(ctx.end_buffer(), None);
        ctx.write("c");
        assert_eq!(ctx.into_output(), "ac");
    }

    #[test]
    fn test_unclosed_buffers_are_flushed() {
        let mut ctx = EvalContext::new();
        ctx.write("a");
        ctx.start_buffer();
        ctx.write("b");
        assert_eq!(ctx.into_output(), "ab");
    }

    #[test]
    fn test_define_function() {
        let mut ctx = EvalContext::new();
        let greet = def("greet");
        ctx.define_function(&greet).unwrap();
        ctx.define_function(&greet).unwrap();
        assert!(ctx.function("greet").is_some());

        let err = ctx.define_function(&def("greet")).unwrap_err();
        assert!(matches!(err, TemplateError::FunctionRedeclared { .. }));

        let err = ctx.define_function(&def("count")).unwrap_err();
        assert!(matches!(err, TemplateError::FunctionRedeclared { ref name } if name == "count"));
    }

    #[test]
    fn test_frame_from_data() {
        let mut data = DataContext::new();
        data.assign("a", 1);
        let mut frame = Frame::from_data(&data);
        assert_eq!(frame.get("a"), Some(&Value::Int(1)));
        *frame.slot("b") = Value::from("x");
        assert_eq!(frame.get("b"), Some(&Value::from("x")));
        assert_eq!(Frame::new().get("a"), None);
    }
}
