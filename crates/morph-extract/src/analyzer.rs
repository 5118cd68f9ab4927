use std::sync::LazyLock;

use morph_types::{CJK_CHAR_TAG, Morpheme, UNKNOWN_TAG};
use regex::Regex;
use thiserror::Error;

static WORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").expect("word pattern is valid"));
static HAN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\p{Han}").expect("han pattern is valid"));

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("failed to start analyzer `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("analyzer i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("analyzer closed its output before answering")]
    Desync,
    #[error("analyzer worker is out of sync and must be restarted")]
    Poisoned,
    #[error("`{program}` has an unsupported dictionary: {reason}")]
    Dictionary { program: String, reason: String },
}

/// Turns raw text into an ordered morpheme sequence.
///
/// `description` must be stable across runs: it is part of the extraction
/// cache key.
pub trait Analyzer: Send + Sync {
    fn description(&self) -> &str;

    fn extract(&self, text: &str) -> Result<Vec<Morpheme>, AnalyzerError>;
}

/// Analyzer for languages that separate words with spaces.
///
/// Cannot recover base forms, so every word is its own literal morpheme.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpaceAnalyzer;

impl Analyzer for SpaceAnalyzer {
    fn description(&self) -> &str {
        "Language with spaces"
    }

    fn extract(&self, text: &str) -> Result<Vec<Morpheme>, AnalyzerError> {
        Ok(WORD_PATTERN
            .find_iter(text)
            .map(|m| Morpheme::literal(m.as_str()))
            .collect())
    }
}

/// Analyzer keeping only logographic (Han) characters, one morpheme each.
#[derive(Clone, Copy, Debug, Default)]
pub struct CjkCharAnalyzer;

impl Analyzer for CjkCharAnalyzer {
    fn description(&self) -> &str {
        "CJK characters"
    }

    fn extract(&self, text: &str) -> Result<Vec<Morpheme>, AnalyzerError> {
        Ok(HAN_PATTERN
            .find_iter(text)
            .map(|m| {
                let ch = m.as_str();
                Morpheme::new(ch, ch, CJK_CHAR_TAG, UNKNOWN_TAG, ch)
            })
            .collect())
    }
}

/// Names accepted by [`analyzer_by_name`].
pub const BUILTIN_ANALYZERS: &[&str] = &["space", "cjk"];

/// Look up one of the in-process analyzers by its short name.
pub fn analyzer_by_name(name: &str) -> Option<Box<dyn Analyzer>> {
    match name.to_ascii_lowercase().as_str() {
        "space" => Some(Box::new(SpaceAnalyzer)),
        "cjk" => Some(Box::new(CjkCharAnalyzer)),
        _ => None,
    }
}
