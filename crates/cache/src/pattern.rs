//! Glob patterns for bulk key deletion.
//!
//! Supports the subset of Redis `MATCH` syntax the cache uses: `*` matches
//! any run of characters and `?` matches exactly one. Everything else is
//! literal, so the file backend deletes exactly what Redis would.

use regex::Regex;

use crate::backend::{StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> StoreResult<Self> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        let mut literal = String::new();
        for ch in pattern.chars() {
            match ch {
                '*' | '?' => {
                    expr.push_str(&regex::escape(&literal));
                    literal.clear();
                    expr.push_str(if ch == '*' { ".*" } else { "." });
                }
                other => literal.push(other),
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|e| StoreError::Operation(format!("invalid pattern '{}': {}", pattern, e)))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
