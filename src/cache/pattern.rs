//! Key Pattern Module
//!
//! Matchers for pattern invalidation. Globs support `*` (any run of
//! characters) and `?` (exactly one character) and are anchored at both ends.
//! Regexes are used as given, so they match anywhere unless anchored.

use regex::Regex;

use crate::error::{CacheError, Result};

// == Key Pattern ==
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compiles a glob such as `user:*:profile`.
    pub fn glob(pattern: &str) -> Result<Self> {
        // `*` must also cross newlines inside keys
        let mut translated = String::with_capacity(pattern.len() + 12);
        translated.push_str("(?s)^");
        let mut literal = String::new();
        for ch in pattern.chars() {
            match ch {
                '*' | '?' => {
                    translated.push_str(&regex::escape(&literal));
                    literal.clear();
                    translated.push_str(if ch == '*' { ".*" } else { "." });
                }
                other => literal.push(other),
            }
        }
        translated.push_str(&regex::escape(&literal));
        translated.push('$');

        Self::compile(pattern, &translated)
    }

    /// Compiles a regular expression.
    pub fn regex(pattern: &str) -> Result<Self> {
        Self::compile(pattern, pattern)
    }

    fn compile(source: &str, expr: &str) -> Result<Self> {
        let regex = Regex::new(expr).map_err(|e| CacheError::InvalidPattern(e.to_string()))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
