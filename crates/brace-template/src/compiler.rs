/*
 * compiler.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tag compiler.
//!
//! Turns brace-tag template syntax into host script text (see
//! [`crate::parser`]). Compilation is three passes over the whole text:
//!
//! 1. protect `{literal}` blocks ([`LiteralVault::protect`]),
//! 2. apply every rewrite rule in order, built-ins first and then user
//!    extensions; each rule rewrites all of its matches before the next rule
//!    runs,
//! 3. restore the protected blocks.
//!
//! Rule patterns are matched case-insensitively, with `.` matching newlines
//! and with quantifiers lazy by default. Text no rule matches is left alone,
//! so stray braces in templates pass through untouched.

use crate::error::{TemplateError, TemplateResult};
use crate::literal::LiteralVault;
use crate::resolver::{PathResolver, expand_include_list};
use crate::runtime::FileSystem;
use once_cell::sync::Lazy;
use regex::{Captures, Regex, RegexBuilder};
use std::fmt;
use std::sync::Arc;

/// Default limit on nested `{include}` expansion.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 50;

/// Callback of a user-registered tag rule.
///
/// Receives the captures of one match and returns its replacement. Extension
/// rules run after every built-in rule, so they see already rewritten text.
pub type ExtensionFn = dyn Fn(&Captures<'_>) -> String + Send + Sync;

/// The built-in rewrite rules, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltinTag {
    /// `{foreach|if|for|switch EXPR}`
    BlockOpen,
    /// `{function SIGNATURE}`
    FunctionOpen,
    /// `{php STATEMENT}`
    Statement,
    /// `{dump EXPR}`
    Dump,
    /// `{print EXPR}`
    Print,
    /// `{echo EXPR}`
    Echo,
    /// `{case EXPR}`
    Case,
    /// `{default}`
    Default,
    /// `{php}`
    RawOpen,
    /// `{/php}`
    RawClose,
    /// `{/foreach}` and friends
    BlockClose,
    /// `{/case}`, `{/default}`
    BranchClose,
    /// `{elseif EXPR}`
    ElseIf,
    /// `{else}` or `{else/}`
    Else,
    /// `{include a,b@registry}`
    Include,
    /// `{$var.key.key2}`
    PathInterpolation,
    /// `{$expr}`
    Interpolation,
    /// `{:expr}`
    ShortEcho,
    /// `?>` + whitespace + `<?tpl`
    MergeAdjacent,
}

const BUILTIN_PATTERNS: &[(&str, BuiltinTag)] = &[
    (r"\{(foreach|if|for|switch)\s+(.*)\}", BuiltinTag::BlockOpen),
    (r"\{function\s+(.*)\}", BuiltinTag::FunctionOpen),
    (r"\{php\s+(.*)\s*;?\s*\}", BuiltinTag::Statement),
    (r"\{dump\s+(.*)\s*;?\s*\}", BuiltinTag::Dump),
    (r"\{print\s+(.*)\s*;?\s*\}", BuiltinTag::Print),
    (r"\{echo\s+(.*)\s*;?\s*\}", BuiltinTag::Echo),
    (r"\{case\s+(.*)\}", BuiltinTag::Case),
    (r"\{default\s*\}", BuiltinTag::Default),
    (r"\{php\}", BuiltinTag::RawOpen),
    (r"\{/php\}", BuiltinTag::RawClose),
    (r"\{/(foreach|if|for|function|switch)\}", BuiltinTag::BlockClose),
    (r"\{/(case|default)\}", BuiltinTag::BranchClose),
    (r"\{(elseif)\s+(.*)\}", BuiltinTag::ElseIf),
    (r"\{else/?\}", BuiltinTag::Else),
    (r"\{include\s*([\w\-.,@/]*)\}", BuiltinTag::Include),
    (r#"\{(\$[^{}'"]*)((\.[^{}'"]+)+)\}"#, BuiltinTag::PathInterpolation),
    (r"\{(\$[^{}]*)\}", BuiltinTag::Interpolation),
    (r"\{:([^{}]*)\s*;?\s*\}", BuiltinTag::ShortEcho),
    (r"\?>\s*<\?tpl", BuiltinTag::MergeAdjacent),
];

static BUILTIN_RULES: Lazy<Vec<(Regex, BuiltinTag)>> = Lazy::new(|| {
    BUILTIN_PATTERNS
        .iter()
        .map(|(pattern, tag)| (build_pattern(pattern).unwrap(), *tag))
        .collect()
});

/// Compile a rule pattern with the tag-rule flags.
fn build_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .swap_greed(true)
        .build()
}

/// A user-registered rule.
#[derive(Clone)]
pub struct ExtensionRule {
    pattern: String,
    regex: Regex,
    rewrite: Arc<ExtensionFn>,
}

impl ExtensionRule {
    pub fn new(
        pattern: &str,
        rewrite: impl Fn(&Captures<'_>) -> String + Send + Sync + 'static,
    ) -> TemplateResult<Self> {
        let regex = build_pattern(pattern).map_err(|source| TemplateError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            rewrite: Arc::new(rewrite),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Debug for ExtensionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRule")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Where included templates come from during a compile.
#[derive(Clone, Copy)]
pub struct IncludeSource<'a> {
    pub resolver: &'a PathResolver,
    pub fs: &'a dyn FileSystem,
}

/// State owned by a single compile call.
struct CompileScope<'a> {
    source: IncludeSource<'a>,
    vault: LiteralVault,
    depth: usize,
}

/// The ordered rule set: built-in rules followed by extensions.
#[derive(Debug, Clone)]
pub struct Compiler {
    extensions: Vec<ExtensionRule>,
    max_include_depth: usize,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            extensions: Vec::new(),
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }

    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    pub fn set_max_include_depth(&mut self, depth: usize) {
        self.max_include_depth = depth;
    }

    /// Register an extension rule.
    ///
    /// Rules run in registration order. Registering a pattern that is already
    /// present replaces its rewrite but keeps its position.
    pub fn extend(&mut self, rule: ExtensionRule) {
        match self
            .extensions
            .iter_mut()
            .find(|existing| existing.pattern == rule.pattern)
        {
            Some(existing) => *existing = rule,
            None => self.extensions.push(rule),
        }
    }

    pub fn extensions(&self) -> &[ExtensionRule] {
        &self.extensions
    }

    /// Compile template source into host script text.
    pub fn compile(&self, source: &str, includes: IncludeSource<'_>) -> TemplateResult<String> {
        let mut scope = CompileScope {
            source: includes,
            vault: LiteralVault::new(),
            depth: 0,
        };
        let rewritten = self.rewrite(source, &mut scope)?;
        let code = scope.vault.restore(&rewritten);
        tracing::debug!(
            source_len = source.len(),
            code_len = code.len(),
            literals = scope.vault.len(),
            "Compiled template"
        );
        Ok(code)
    }

    /// Protect literals and apply every rule. Restoration is left to the
    /// outermost call so literals inside includes are restored exactly once.
    fn rewrite(&self, source: &str, scope: &mut CompileScope<'_>) -> TemplateResult<String> {
        let mut text = scope.vault.protect(source);
        for (regex, tag) in BUILTIN_RULES.iter() {
            text = replace_all_fallible(regex, &text, |caps| self.apply_builtin(*tag, caps, scope))?;
        }
        for rule in &self.extensions {
            text = rule
                .regex
                .replace_all(&text, |caps: &Captures<'_>| (rule.rewrite)(caps))
                .into_owned();
        }
        Ok(text)
    }

    fn apply_builtin(
        &self,
        tag: BuiltinTag,
        caps: &Captures<'_>,
        scope: &mut CompileScope<'_>,
    ) -> TemplateResult<String> {
        let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());
        let code = match tag {
            BuiltinTag::BlockOpen => format!("<?tpl {}({}){{ ?>", group(1), group(2)),
            BuiltinTag::FunctionOpen => format!("<?tpl function {}{{ ?>", group(1)),
            BuiltinTag::Statement => format!("<?tpl {}; ?>", group(1)),
            BuiltinTag::Dump => format!(
                "<pre><?tpl ob_start(); var_dump({}); echo htmlspecialchars(ob_get_clean()); ?></pre>",
                group(1)
            ),
            BuiltinTag::Print => format!(
                "<pre><?tpl echo htmlspecialchars(print_r({}, true)); ?></pre>",
                group(1)
            ),
            BuiltinTag::Echo => format!("<?tpl echo {}; ?>", group(1)),
            BuiltinTag::Case => format!("<?tpl case {}: ?>", group(1)),
            BuiltinTag::Default => "<?tpl default: ?>".to_string(),
            BuiltinTag::RawOpen => "<?tpl ".to_string(),
            BuiltinTag::RawClose => " ?>".to_string(),
            BuiltinTag::BlockClose => "<?tpl } ?>".to_string(),
            BuiltinTag::BranchClose => "<?tpl break; ?>".to_string(),
            BuiltinTag::ElseIf => format!("<?tpl }}elseif({}){{ ?>", group(2)),
            BuiltinTag::Else => "<?tpl }else{ ?>".to_string(),
            BuiltinTag::Include => self.expand_include(group(1), scope)?,
            BuiltinTag::PathInterpolation => format!(
                "<?tpl echo htmlspecialchars({}{}); ?>",
                group(1),
                index_chain(group(2))
            ),
            BuiltinTag::Interpolation | BuiltinTag::ShortEcho => {
                format!("<?tpl echo htmlspecialchars({}); ?>", group(1))
            }
            BuiltinTag::MergeAdjacent => String::new(),
        };
        Ok(code)
    }

    /// Read, concatenate and compile every template named by an include tag.
    fn expand_include(&self, list: &str, scope: &mut CompileScope<'_>) -> TemplateResult<String> {
        let references = expand_include_list(list);
        if references.is_empty() {
            return Err(TemplateError::not_found(list));
        }
        if scope.depth >= self.max_include_depth {
            return Err(TemplateError::RecursiveInclude {
                reference: references.join(","),
                max_depth: self.max_include_depth,
            });
        }

        let mut html = String::new();
        for reference in &references {
            html.push_str(&scope.source.resolver.read_source(reference, scope.source.fs)?);
        }
        tracing::debug!(references = ?references, depth = scope.depth + 1, "Expanding include");

        scope.depth += 1;
        let expanded = self.rewrite(&html, scope);
        scope.depth -= 1;
        expanded
    }
}

/// Turn `.a.b` into `['a']['b']`.
fn index_chain(path: &str) -> String {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(|segment| format!("['{}']", segment))
        .collect()
}

/// `Regex::replace_all` with a replacement that can fail.
fn replace_all_fallible(
    regex: &Regex,
    text: &str,
    mut replace: impl FnMut(&Captures<'_>) -> TemplateResult<String>,
) -> TemplateResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in regex.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&replace(&caps)?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MemoryFileSystem;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> String {
        compile_with(&Compiler::new(), source, &PathResolver::new(), &MemoryFileSystem::new())
            .expect("template should compile")
    }

    fn compile_with(
        compiler: &Compiler,
        source: &str,
        resolver: &PathResolver,
        fs: &MemoryFileSystem,
    ) -> TemplateResult<String> {
        compiler.compile(source, IncludeSource { resolver, fs })
    }

    #[test]
    fn test_builtin_patterns_compile() {
        assert_eq!(BUILTIN_RULES.len(), BUILTIN_PATTERNS.len());
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(compile("Hello, world!"), "Hello, world!");
        assert_eq!(compile("a { b } c {d}"), "a { b } c {d}");
        assert_eq!(compile("function() { return 1; }"), "function() { return 1; }");
    }

    #[test]
    fn test_interpolation() {
        assert_eq!(
            compile("Hi {$name}!"),
            "Hi <?tpl echo htmlspecialchars($name); ?>!"
        );
        assert_eq!(
            compile("{$user['name']}"),
            "<?tpl echo htmlspecialchars($user['name']); ?>"
        );
    }

    #[test]
    fn test_path_interpolation() {
        assert_eq!(
            compile("{$user.name}"),
            "<?tpl echo htmlspecialchars($user['name']); ?>"
        );
        assert_eq!(
            compile("{$a.b.c}"),
            "<?tpl echo htmlspecialchars($a['b']['c']); ?>"
        );
    }

    #[test]
    fn test_short_echo() {
        assert_eq!(
            compile("{:count($items)}"),
            "<?tpl echo htmlspecialchars(count($items)); ?>"
        );
    }

    #[test]
    fn test_conditionals_merge_adjacent_regions() {
        assert_eq!(
            compile("{if 1>0}A{else}B{/if}"),
            "<?tpl if(1>0){ ?>A<?tpl }else{ ?>B<?tpl } ?>"
        );
        assert_eq!(
            compile("{if $a}{elseif $b}x{/if}"),
            "<?tpl if($a){  }elseif($b){ ?>x<?tpl } ?>"
        );
    }

    #[test]
    fn test_merge_swallows_whitespace_between_regions() {
        assert_eq!(
            compile("{switch $x}\n  {case 1}one{/case}\n{/switch}"),
            "<?tpl switch($x){  case 1: ?>one<?tpl break;  } ?>"
        );
    }

    #[test]
    fn test_case_insensitive_tags() {
        assert_eq!(compile("{IF $a}x{/IF}"), "<?tpl IF($a){ ?>x<?tpl } ?>");
        assert_eq!(compile("{Else/}"), "<?tpl }else{ ?>");
    }

    #[test]
    fn test_statement_tags() {
        assert_eq!(compile("{php $a = 1;}"), "<?tpl $a = 1; ?>");
        assert_eq!(compile("{echo $raw}"), "<?tpl echo $raw; ?>");
        assert_eq!(compile("{php}$a = 1;{/php}"), "<?tpl $a = 1; ?>");
        assert_eq!(
            compile("{function greet($n)}Hi{/function}"),
            "<?tpl function greet($n){ ?>Hi<?tpl } ?>"
        );
    }

    #[test]
    fn test_debug_tags() {
        assert_eq!(
            compile("{print $x}"),
            "<pre><?tpl echo htmlspecialchars(print_r($x, true)); ?></pre>"
        );
        assert_eq!(
            compile("{dump $x}"),
            "<pre><?tpl ob_start(); var_dump($x); echo htmlspecialchars(ob_get_clean()); ?></pre>"
        );
    }

    #[test]
    fn test_literal_blocks_are_not_rewritten() {
        assert_eq!(
            compile("{literal}{if $x}<b>{/if}{/literal}{$y}"),
            "{if $x}&lt;b&gt;{/if}<?tpl echo htmlspecialchars($y); ?>"
        );
    }

    #[test]
    fn test_include_inlines_compiled_source() {
        let mut resolver = PathResolver::new();
        resolver.registry_mut().add_path("main", "/t", 0);
        let fs = MemoryFileSystem::with_files([
            ("/t/default/header.tpl", "<h1>{$title}</h1>"),
            ("/t/default/footer.tpl", "{literal}{$raw}{/literal}"),
        ]);

        let code = compile_with(
            &Compiler::new(),
            "{include header,footer@main}body",
            &resolver,
            &fs,
        )
        .unwrap();
        assert_eq!(
            code,
            "<h1><?tpl echo htmlspecialchars($title); ?></h1>{$raw}body"
        );
    }

    #[test]
    fn test_missing_include_names_reference() {
        let mut resolver = PathResolver::new();
        resolver.registry_mut().add_path("main", "/t", 0);
        let err = compile_with(
            &Compiler::new(),
            "{include header@main}",
            &resolver,
            &MemoryFileSystem::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::TemplateNotFound { ref reference } if reference == "header@main"));
    }

    #[test]
    fn test_recursive_include_is_bounded() {
        let mut resolver = PathResolver::new();
        resolver.registry_mut().add_path("main", "/t", 0);
        let fs = MemoryFileSystem::with_files([("/t/default/loop.tpl", "x{include loop@main}")]);
        let err = compile_with(
            &Compiler::new().with_max_include_depth(3),
            "{include loop@main}",
            &resolver,
            &fs,
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::RecursiveInclude { max_depth: 3, .. }));
    }

    #[test]
    fn test_extensions_run_after_builtins_in_order() {
        let mut compiler = Compiler::new();
        compiler.extend(
            ExtensionRule::new(r"\{upper\s+(.*)\}", |caps| {
                format!("<?tpl echo strtoupper({}); ?>", &caps[1])
            })
            .unwrap(),
        );
        compiler.extend(ExtensionRule::new(r"strtoupper", |_| "strtolower".to_string()).unwrap());

        let code = compile_with(
            &compiler,
            "{upper $name}",
            &PathResolver::new(),
            &MemoryFileSystem::new(),
        )
        .unwrap();
        assert_eq!(code, "<?tpl echo strtolower($name); ?>");
    }

    #[test]
    fn test_extension_sees_rewritten_text() {
        let mut compiler = Compiler::new();
        compiler.extend(ExtensionRule::new(r"htmlspecialchars", |_| "strtoupper".to_string()).unwrap());
        let code = compile_with(
            &compiler,
            "{$x}",
            &PathResolver::new(),
            &MemoryFileSystem::new(),
        )
        .unwrap();
        assert_eq!(code, "<?tpl echo strtoupper($x); ?>");
    }

    #[test]
    fn test_reregistering_pattern_keeps_position() {
        let mut compiler = Compiler::new();
        compiler.extend(ExtensionRule::new("a", |_| "1".to_string()).unwrap());
        compiler.extend(ExtensionRule::new("b", |_| "2".to_string()).unwrap());
        compiler.extend(ExtensionRule::new("a", |_| "3".to_string()).unwrap());
        let patterns: Vec<_> = compiler.extensions().iter().map(ExtensionRule::pattern).collect();
        assert_eq!(patterns, vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_extension_pattern() {
        let err = ExtensionRule::new("(unclosed", |_| String::new()).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidPattern { .. }));
    }
}
