//! Morpheme extraction with memoization.
//!
//! Running a tagger is the slow part of building a morpheme database, so
//! every `(analyzer, text)` pair is resolved once and remembered in an
//! [`ExtractionCache`] that is persisted in batches. Before the analyzer is
//! consulted, optional [`ReplaceRule`]s may cut a known literal out of the
//! text; the spans on either side are resolved recursively through the same
//! cache.
//!
//! # How it works
//! 1. Look up `(analyzer.description(), text)` in the cache.
//! 2. On a miss with note tags, try the replacement rules in order.
//! 3. Otherwise call [`Analyzer::extract`].
//! 4. Store the result; every `flush_every` writes persist the cache.
//!
//! # Example
//! ```
//! use morph_extract::{CacheConfig, ExtractionCache, ReplaceRule, SpaceAnalyzer};
//! use std::collections::HashSet;
//!
//! # fn main() -> anyhow::Result<()> {
//! let rules = vec![ReplaceRule::new(["names"], "New York", ["New York"])?];
//! let cache = ExtractionCache::open(CacheConfig { rules, ..CacheConfig::default() });
//! let tags: HashSet<String> = ["names".to_string()].into();
//!
//! let ms = cache.lookup_or_compute(&SpaceAnalyzer, "off to New York today", Some(&tags))?;
//! let bases: Vec<&str> = ms.iter().map(|m| m.base()).collect();
//! assert_eq!(bases, ["off", "to", "New York", "today"]);
//! # Ok(()) }
//! ```

pub mod analyzer;
pub mod cache;
pub mod process;
pub mod rules;
pub mod storage;

pub use analyzer::{
    Analyzer, AnalyzerError, BUILTIN_ANALYZERS, CjkCharAnalyzer, SpaceAnalyzer, analyzer_by_name,
};
pub use cache::{CacheConfig, DEFAULT_FLUSH_EVERY, ExtractionCache, MAX_RULE_DEPTH};
pub use process::{DictionaryCheck, ProcessAnalyzer, ProcessConfig};
pub use rules::{ReplaceRule, RuleConfig, RuleError, compile_rules, load_rules};
pub use storage::StorageError;
