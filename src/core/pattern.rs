//! Wildcard matching for entry names
//!
//! Supports:
//! - `*` - any run of characters (e.g., `*.dff`, `veh*`)
//! - `?` - exactly one character (e.g., `cop??.txd`)
//!
//! Matching is case-insensitive, like name lookup.

use crate::error::Result;
use regex::{Regex, RegexBuilder};

/// Compiled entry-name pattern
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    /// Compile a wildcard pattern
    ///
    /// # Examples
    /// ```
    /// use img_factory_rs::pattern::NamePattern;
    ///
    /// let pattern = NamePattern::new("*.dff").unwrap();
    /// assert!(pattern.matches("infernus.DFF"));
    /// assert!(!pattern.matches("infernus.txd"));
    /// ```
    pub fn new(pattern: &str) -> Result<Self> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                _ => expr.push_str(&regex::escape(&c.to_string())),
            }
        }
        expr.push('$');

        let regex = RegexBuilder::new(&expr).case_insensitive(true).build()?;

        Ok(NamePattern {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Check a name against the pattern
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// The pattern as given
    pub fn as_str(&self) -> &str {
        &self.source
    }
}
