/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template compilation and rendering.

use thiserror::Error;

/// Errors that can occur during template operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A template reference could not be resolved to a file.
    ///
    /// Raised for unknown registries, references with an empty file or
    /// registry part, and references with no matching file under any
    /// root/type combination. Includes report the same error.
    #[error("template file \"{reference}\" is not found")]
    TemplateNotFound { reference: String },

    /// Includes nested deeper than the configured limit.
    #[error("Recursive include detected (depth > {max_depth}): {reference}")]
    RecursiveInclude { reference: String, max_depth: usize },

    /// A user-registered tag pattern failed to compile.
    #[error("Invalid tag pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The compiled artifact is not valid host script.
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { message: String, offset: usize },

    /// A variable was read before being bound.
    #[error("Undefined variable: ${name}")]
    UndefinedVariable { name: String },

    /// A map key or list index was not present.
    #[error("Undefined array key: {key}")]
    UndefinedKey { key: String },

    /// Call to a function that is neither built in nor defined by the template.
    #[error("Call to undefined function {name}()")]
    UndefinedFunction { name: String },

    /// A template defined the same function twice.
    #[error("Cannot redeclare function {name}()")]
    FunctionRedeclared { name: String },

    /// Template functions recursed deeper than the interpreter allows.
    #[error("Maximum function nesting level of {max_depth} reached in {name}()")]
    CallDepthExceeded { name: String, max_depth: usize },

    #[error("Division by zero")]
    DivisionByZero,

    /// An operation was applied to a value of the wrong type.
    #[error("Type error: {message}")]
    TypeMismatch { message: String },

    /// Engine configuration could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O error (e.g., reading a template file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TemplateError {
    pub(crate) fn not_found(reference: impl Into<String>) -> Self {
        TemplateError::TemplateNotFound {
            reference: reference.into(),
        }
    }

    pub(crate) fn syntax(message: impl Into<String>, offset: usize) -> Self {
        TemplateError::Syntax {
            message: message.into(),
            offset,
        }
    }

    pub(crate) fn type_mismatch(message: impl Into<String>) -> Self {
        TemplateError::TypeMismatch {
            message: message.into(),
        }
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;
