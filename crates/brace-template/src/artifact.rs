/*
 * artifact.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiled artifacts and the renderer that executes them.
//!
//! An artifact is the host script text produced by the tag compiler. The
//! text is what gets cached; the parsed [`Program`] is derived lazily on
//! first render and then reused by every later render of the same artifact.

use crate::ast::Program;
use crate::context::DataContext;
use crate::error::TemplateResult;
use crate::eval_context::EvalContext;
use crate::evaluator::execute;
use crate::parser::parse;
use once_cell::sync::OnceCell;

/// The executable form of a template.
#[derive(Debug, Clone, Default)]
pub struct CompiledArtifact {
    code: String,
    program: OnceCell<Program>,
}

impl CompiledArtifact {
    /// Wrap compiled host script text.
    pub fn from_code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            program: OnceCell::new(),
        }
    }

    /// The compiled text, as stored by artifact caches.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Parsed program, parsed once per artifact.
    pub fn program(&self) -> TemplateResult<&Program> {
        self.program.get_or_try_init(|| parse(&self.code))
    }

    /// Execute against `data` and return everything the artifact emitted.
    pub fn render(&self, data: &DataContext) -> TemplateResult<String> {
        self.render_with(data, EvalContext::new())
    }

    /// Execute with a preconfigured evaluation context.
    pub fn render_with(&self, data: &DataContext, ctx: EvalContext) -> TemplateResult<String> {
        if self.is_empty() {
            return Ok(String::new());
        }
        execute(self.program()?, data, ctx)
    }
}

/// Render an artifact if there is one; a missing artifact renders as empty.
pub fn render(artifact: Option<&CompiledArtifact>, data: &DataContext) -> TemplateResult<String> {
    match artifact {
        Some(artifact) => artifact.render(data),
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateError;

    #[test]
    fn test_empty_artifact_renders_empty() {
        let data = DataContext::new();
        assert_eq!(CompiledArtifact::default().render(&data).unwrap(), "");
        assert_eq!(render(None, &data).unwrap(), "");
    }

    #[test]
    fn test_render_binds_data() {
        let artifact = CompiledArtifact::from_code("Hi <?tpl echo $name; ?>");
        let mut data = DataContext::new();
        data.assign("name", "Ann");
        assert_eq!(render(Some(&artifact), &data).unwrap(), "Hi Ann");
        data.assign("name", "Bob");
        assert_eq!(artifact.render(&data).unwrap(), "Hi Bob");
    }

    #[test]
    fn test_program_is_parsed_once() {
        let artifact = CompiledArtifact::from_code("x");
        let first = artifact.program().unwrap() as *const Program;
        let second = artifact.program().unwrap() as *const Program;
        assert_eq!(first, second);
    }

    #[test]
    fn test_syntax_error_surfaces_on_render() {
        let artifact = CompiledArtifact::from_code("<?tpl if( ?>");
        let err = artifact.render(&DataContext::new()).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }
}
