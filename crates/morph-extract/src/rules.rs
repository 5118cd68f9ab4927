//! Replacement rules: carve a known literal out of an expression.
//!
//! A rule names the note tags it is restricted to, a regex, and the literal
//! morphemes that stand in for the matched span. Applying a rule splits the
//! text at the first match into `(prefix, suffix)`; the caller analyzes both
//! halves and places the literals in between.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid replacement regex `{pattern}`: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to read rules from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed rules file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Rule as written in configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub filter_tags: Vec<String>,
    pub regex: String,
    #[serde(default)]
    pub morphemes: Vec<String>,
}

impl RuleConfig {
    pub fn compile(&self) -> Result<ReplaceRule, RuleError> {
        let regex = Regex::new(&self.regex).map_err(|source| RuleError::Regex {
            pattern: self.regex.clone(),
            source,
        })?;
        Ok(ReplaceRule {
            filter_tags: self.filter_tags.iter().cloned().collect(),
            regex,
            morphemes: self.morphemes.clone(),
        })
    }
}

/// Compiled replacement rule.
#[derive(Clone, Debug)]
pub struct ReplaceRule {
    filter_tags: HashSet<String>,
    regex: Regex,
    morphemes: Vec<String>,
}

impl ReplaceRule {
    pub fn new(
        filter_tags: impl IntoIterator<Item = impl Into<String>>,
        regex: &str,
        morphemes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, RuleError> {
        RuleConfig {
            filter_tags: filter_tags.into_iter().map(Into::into).collect(),
            regex: regex.to_string(),
            morphemes: morphemes.into_iter().map(Into::into).collect(),
        }
        .compile()
    }

    /// Literal strings that replace the matched span.
    pub fn morphemes(&self) -> &[String] {
        &self.morphemes
    }

    /// Whether every filter tag is present on the note.
    pub fn matches_tags(&self, tags: &HashSet<String>) -> bool {
        self.filter_tags.is_subset(tags)
    }

    /// Split `text` around the first match.
    ///
    /// Returns `None` when nothing matches or when either side would be as
    /// long as `text` itself, which would recurse forever.
    pub fn split<'t>(&self, text: &'t str) -> Option<(&'t str, &'t str)> {
        let found = self.regex.find(text)?;
        let prefix = &text[..found.start()];
        let suffix = &text[found.end()..];
        if prefix.len() >= text.len() || suffix.len() >= text.len() {
            return None;
        }
        Some((prefix, suffix))
    }
}

/// Compile an ordered rule list.
pub fn compile_rules(configs: &[RuleConfig]) -> Result<Vec<ReplaceRule>, RuleError> {
    configs.iter().map(RuleConfig::compile).collect()
}

/// Load and compile a JSON list of [`RuleConfig`] objects.
pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<ReplaceRule>, RuleError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| RuleError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let configs: Vec<RuleConfig> =
        serde_json::from_str(&raw).map_err(|source| RuleError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    compile_rules(&configs)
}
