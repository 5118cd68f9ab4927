//! Memoized morpheme extraction.
//!
//! [`ExtractionCache`] maps `(analyzer description, text)` to the morphemes
//! the analyzer produced for it. A miss runs the replacement rules and the
//! analyzer, stores the result and, every `flush_every` writes, persists the
//! whole map. The map is a [`DashMap`], so concurrent callers never race on
//! it; two threads missing the same key simply compute the same value twice.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use morph_types::Morpheme;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analyzer::{Analyzer, AnalyzerError};
use crate::rules::ReplaceRule;
use crate::storage::{self, Format, StorageError};

/// Number of writes between automatic flushes.
pub const DEFAULT_FLUSH_EVERY: u64 = 100;

/// Rule recursion deeper than this analyzes the remaining span directly.
///
/// Spans cut short by the bound are returned but never cached, and a cached
/// entry is only reused where its own rule nesting still fits under the bound,
/// so a lookup returns the same value whatever the cache already holds.
pub const MAX_RULE_DEPTH: usize = 32;

const CACHE_FORMAT: Format = Format {
    magic: *b"MCCH",
    version: 1,
};

type CacheKey = (String, String);
type CacheEntries = Vec<(CacheKey, CachedExtraction)>;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CachedExtraction {
    morphemes: Vec<Morpheme>,
    /// Levels of rule application below this span; 0 for direct analysis.
    rule_depth: usize,
}

/// Result of resolving one span. `rule_depth` is `None` when the depth bound
/// stopped a rule that would otherwise have applied.
struct Resolution {
    morphemes: Vec<Morpheme>,
    rule_depth: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Where the cache is persisted; `None` keeps it in memory only.
    pub path: Option<PathBuf>,
    /// Flush after this many writes; 0 disables automatic flushing.
    pub flush_every: u64,
    pub rules: Vec<ReplaceRule>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            flush_every: DEFAULT_FLUSH_EVERY,
            rules: Vec::new(),
        }
    }
}

pub struct ExtractionCache {
    entries: DashMap<CacheKey, CachedExtraction>,
    path: Option<PathBuf>,
    flush_every: u64,
    writes: AtomicU64,
    rules: Vec<ReplaceRule>,
}

impl ExtractionCache {
    /// Memory-only cache without replacement rules.
    pub fn in_memory() -> Self {
        Self::open(CacheConfig::default())
    }

    /// Open the cache described by `config`.
    ///
    /// Missing, unreadable or corrupt storage yields an empty cache: cached
    /// values only save time, they never change results.
    pub fn open(config: CacheConfig) -> Self {
        let mut entries = DashMap::new();
        if let Some(path) = &config.path {
            match storage::load::<CacheEntries>(path, CACHE_FORMAT) {
                Ok((_, stored)) => {
                    info!(
                        "loaded {} cached extractions from {}",
                        stored.len(),
                        path.display()
                    );
                    entries.extend(stored);
                }
                Err(err) if err.is_not_found() => {
                    debug!("no extraction cache at {}, starting empty", path.display());
                }
                Err(err) => warn!("ignoring unreadable extraction cache: {err}"),
            }
        }
        Self {
            entries,
            path: config.path,
            flush_every: config.flush_every,
            writes: AtomicU64::new(0),
            rules: config.rules,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn rules(&self) -> &[ReplaceRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached entry (storage is untouched until the next flush).
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Cached morphemes for `text` under `analyzer`, computing them on a miss.
    ///
    /// `tags` are the note tags used to select replacement rules; with `None`
    /// no rule is considered.
    pub fn lookup_or_compute(
        &self,
        analyzer: &dyn Analyzer,
        text: &str,
        tags: Option<&HashSet<String>>,
    ) -> Result<Vec<Morpheme>, AnalyzerError> {
        Ok(self.resolve(analyzer, text, tags, 0)?.morphemes)
    }

    fn resolve(
        &self,
        analyzer: &dyn Analyzer,
        text: &str,
        tags: Option<&HashSet<String>>,
        depth: usize,
    ) -> Result<Resolution, AnalyzerError> {
        let key = (analyzer.description().to_string(), text.to_string());
        if let Some(hit) = self.entries.get(&key)
            && depth + hit.rule_depth <= MAX_RULE_DEPTH
        {
            return Ok(Resolution {
                morphemes: hit.morphemes.clone(),
                rule_depth: Some(hit.rule_depth),
            });
        }

        let resolution = match self.apply_rules(analyzer, text, tags, depth)? {
            Some(resolution) => resolution,
            None => Resolution {
                morphemes: analyzer.extract(text)?,
                rule_depth: Some(0),
            },
        };

        match resolution.rule_depth {
            Some(rule_depth) => {
                let cached = CachedExtraction {
                    morphemes: resolution.morphemes.clone(),
                    rule_depth,
                };
                self.entries.insert(key, cached);
                self.record_write();
            }
            None => debug!("not caching {text:?}, cut short by the rule depth limit"),
        }
        Ok(resolution)
    }

    fn apply_rules(
        &self,
        analyzer: &dyn Analyzer,
        text: &str,
        tags: Option<&HashSet<String>>,
        depth: usize,
    ) -> Result<Option<Resolution>, AnalyzerError> {
        let Some(tags) = tags else {
            return Ok(None);
        };
        let applicable = self
            .rules
            .iter()
            .filter(|rule| rule.matches_tags(tags))
            .find_map(|rule| rule.split(text).map(|split| (rule, split)));
        let Some((rule, (prefix, suffix))) = applicable else {
            return Ok(None);
        };
        if depth >= MAX_RULE_DEPTH {
            debug!("rule depth limit reached, analyzing {text:?} directly");
            return Ok(Some(Resolution {
                morphemes: analyzer.extract(text)?,
                rule_depth: None,
            }));
        }

        debug!("replacement rule hit in {text:?}");
        let prefix = self.resolve(analyzer, prefix, Some(tags), depth + 1)?;
        let suffix = self.resolve(analyzer, suffix, Some(tags), depth + 1)?;
        let rule_depth = prefix
            .rule_depth
            .zip(suffix.rule_depth)
            .map(|(before, after)| 1 + before.max(after));

        let mut morphemes = prefix.morphemes;
        morphemes.extend(rule.morphemes().iter().map(Morpheme::literal));
        morphemes.extend(suffix.morphemes);
        Ok(Some(Resolution {
            morphemes,
            rule_depth,
        }))
    }

    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if self.flush_every == 0 || writes % self.flush_every != 0 {
            return;
        }
        if let Err(err) = self.save() {
            warn!("extraction cache flush failed, keeping entries in memory: {err}");
        }
    }

    /// Persist the whole cache now. A memory-only cache is a no-op.
    pub fn save(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot: CacheEntries = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        storage::save(path, CACHE_FORMAT, &snapshot)?;
        debug!(
            "saved {} cached extractions to {}",
            snapshot.len(),
            path.display()
        );
        Ok(())
    }
}
