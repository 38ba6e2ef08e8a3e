/*
 * literal.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Verbatim block protection.
//!
//! `{literal}...{/literal}` regions must survive tag rewriting untouched.
//! Before any rule runs, each region is swapped for an opaque placeholder
//! and its HTML-escaped content is stored in a [`LiteralVault`]. Once every
//! rule (including recursive includes) has run, the placeholders are
//! swapped back.
//!
//! A vault lives for exactly one compile. Never share one across compiles.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex, RegexBuilder};
use sha2::{Digest, Sha256};

/// Matches a verbatim block, lazily, case-insensitively, across newlines.
static LITERAL_BLOCK: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\{literal\}(.*)\{/literal\}")
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .swap_greed(true)
        .build()
        .unwrap()
});

/// Per-compile store of extracted verbatim content.
#[derive(Debug, Clone, Default)]
pub struct LiteralVault {
    entries: IndexMap<String, String>,
}

impl LiteralVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every verbatim block in `text` with a placeholder.
    ///
    /// The escaped block content is recorded under the placeholder. Identical
    /// blocks share a placeholder, since the key is derived from the content.
    pub fn protect(&mut self, text: &str) -> String {
        LITERAL_BLOCK
            .replace_all(text, |caps: &Captures| {
                let content = &caps[1];
                let key = placeholder_for(content);
                self.entries
                    .entry(key.clone())
                    .or_insert_with(|| escape_html(content));
                key
            })
            .into_owned()
    }

    /// Substitute every recorded placeholder with its escaped content.
    pub fn restore(&self, text: &str) -> String {
        let mut restored = text.to_string();
        for (key, content) in &self.entries {
            if restored.contains(key.as_str()) {
                restored = restored.replace(key.as_str(), content);
            }
        }
        restored
    }

    /// Escaped content recorded under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `#` + first 16 bytes of the content's SHA-256, hex encoded, + `#`.
fn placeholder_for(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("#{}#", hex::encode(&digest[..16]))
}

/// Escape HTML special characters.
pub(crate) fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
