//! Morpheme evidence database.
//!
//! A [`MorphDb`] maps every distinct [`Morpheme`] to the set of [`Location`]s
//! it was seen at. Databases grow by adding (morpheme, location) pairs, by
//! importing text files through an [`ExtractionCache`], or by merging another
//! database; frequency and maturity figures are derived from the evidence.
//!
//! Public access is read-only apart from the mutation methods, so derived
//! statistics can be invalidated reliably whenever the evidence changes.
//!
//! # Example
//! ```no_run
//! use morph_db::{LoadPolicy, MorphDb};
//! use morph_extract::{ExtractionCache, SpaceAnalyzer};
//!
//! # fn main() -> anyhow::Result<()> {
//! let cache = ExtractionCache::in_memory();
//! let mut known = MorphDb::open("dbs/known.db", LoadPolicy::Lenient)?;
//! let added = known.import_file("reading/chapter1.txt", &cache, &SpaceAnalyzer, 21)?;
//! println!("{added} new locations, {} morphemes", known.len());
//! known.save("dbs/known.db")?;
//! # Ok(()) }
//! ```
//!
//! For a runnable demo, see `cargo run -p morph-db --example stats -- <db>`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use morph_extract::storage::{self, Format};
use morph_extract::{Analyzer, AnalyzerError, ExtractionCache, StorageError};
use morph_types::{FactId, Location, Morpheme, show_morphemes};
use thiserror::Error;
use tracing::info;

/// Newest database format this build reads and writes.
pub const FORMAT_VERSION: u32 = 1;

const DB_FORMAT: Format = Format {
    magic: *b"MRDB",
    version: FORMAT_VERSION,
};

type DbEntries = Vec<(Morpheme, Vec<Location>)>;

/// Location → morphemes observed there.
pub type LocDb = HashMap<Location, HashSet<Morpheme>>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("analyzer failed on {path}:{line}: {source}")]
    Analyzer {
        path: PathBuf,
        line: usize,
        #[source]
        source: AnalyzerError,
    },
}

/// What to do when a database file does not exist.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LoadPolicy {
    /// A missing file is an error.
    #[default]
    Strict,
    /// A missing file loads as an empty database.
    Lenient,
}

/// Totals computed by [`MorphDb::analyze`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DbStats {
    pub count: usize,
    pub pos_breakdown: BTreeMap<String, usize>,
}

#[derive(Clone, Debug, Default)]
pub struct MorphDb {
    db: HashMap<Morpheme, HashSet<Location>>,
    stats: Option<DbStats>,
}

impl PartialEq for MorphDb {
    fn eq(&self, other: &Self) -> bool {
        self.db == other.db
    }
}

impl Eq for MorphDb {}

impl MorphDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a database file and analyze it.
    pub fn open(path: impl AsRef<Path>, policy: LoadPolicy) -> Result<Self, DbError> {
        let mut db = Self::new();
        db.load(path, policy)?;
        db.analyze();
        Ok(db)
    }

    /// Load `a` and `b`, merge `b` into `a`, and optionally save the result to `dest`.
    ///
    /// Returns the merged database and the number of new (morpheme, location) pairs.
    pub fn merge_files(
        a: impl AsRef<Path>,
        b: impl AsRef<Path>,
        dest: Option<&Path>,
        policy: LoadPolicy,
    ) -> Result<(Self, usize), DbError> {
        let mut merged = Self::open(a, policy)?;
        let other = Self::open(b, policy)?;
        let added = merged.merge(&other);
        info!("merged {added} new locations");
        if let Some(dest) = dest {
            merged.save(dest)?;
        }
        Ok((merged, added))
    }

    /// Build a database from a single text file.
    pub fn from_file(
        path: impl AsRef<Path>,
        cache: &ExtractionCache,
        analyzer: &dyn Analyzer,
        maturity: u32,
    ) -> Result<Self, DbError> {
        let mut db = Self::new();
        db.import_file(path, cache, analyzer, maturity)?;
        Ok(db)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    pub fn contains(&self, m: &Morpheme) -> bool {
        self.db.contains_key(m)
    }

    pub fn locations(&self, m: &Morpheme) -> Option<&HashSet<Location>> {
        self.db.get(m)
    }

    pub fn morphemes(&self) -> impl Iterator<Item = &Morpheme> + '_ {
        self.db.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Morpheme, &HashSet<Location>)> + '_ {
        self.db.iter()
    }

    /// Number of (morpheme, location) pairs.
    pub fn pair_count(&self) -> usize {
        self.db.values().map(HashSet::len).sum()
    }

    // Persistence

    /// Atomically write the database to `path`, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DbError> {
        let path = path.as_ref();
        let entries: DbEntries = self
            .db
            .iter()
            .map(|(m, locs)| (m.clone(), locs.iter().cloned().collect()))
            .collect();
        storage::save(path, DB_FORMAT, &entries)?;
        info!("saved {} morphemes to {}", entries.len(), path.display());
        Ok(())
    }

    /// Replace the contents with the database stored at `path`.
    ///
    /// Returns `false` when the file is missing and `policy` is lenient; the
    /// database is then empty. On any error the current contents are kept.
    pub fn load(&mut self, path: impl AsRef<Path>, policy: LoadPolicy) -> Result<bool, DbError> {
        let path = path.as_ref();
        let entries: DbEntries = match storage::load(path, DB_FORMAT) {
            Ok((_, entries)) => entries,
            Err(err) if err.is_not_found() && policy == LoadPolicy::Lenient => {
                info!("no database at {}, starting empty", path.display());
                self.clear();
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };

        let mut db: HashMap<Morpheme, HashSet<Location>> = HashMap::with_capacity(entries.len());
        for (m, locs) in entries {
            if locs.is_empty() {
                continue;
            }
            db.entry(m).or_default().extend(locs);
        }
        info!("loaded {} morphemes from {}", db.len(), path.display());
        self.db = db;
        self.stats = None;
        Ok(true)
    }

    // Adding

    pub fn clear(&mut self) {
        self.db.clear();
        self.stats = None;
    }

    /// Record each location under its morpheme.
    pub fn add_mls(&mut self, pairs: impl IntoIterator<Item = (Morpheme, Location)>) {
        for (m, loc) in pairs {
            self.db.entry(m).or_default().insert(loc);
        }
        self.stats = None;
    }

    /// Record several locations for one morpheme.
    pub fn add_ml_set(&mut self, m: Morpheme, locs: impl IntoIterator<Item = Location>) {
        let mut locs = locs.into_iter().peekable();
        if locs.peek().is_none() {
            return;
        }
        self.db.entry(m).or_default().extend(locs);
        self.stats = None;
    }

    /// Record one location for every morpheme in `ms`.
    pub fn add_msl(&mut self, ms: impl IntoIterator<Item = Morpheme>, loc: &Location) {
        self.add_mls(ms.into_iter().map(|m| (m, loc.clone())));
    }

    /// Inverse-oriented bulk insert from a location → morphemes map.
    pub fn add_from_loc_db(&mut self, loc_db: LocDb) {
        for (loc, ms) in loc_db {
            self.add_msl(ms, &loc);
        }
    }

    /// Union `other` into `self`, returning how many (morpheme, location)
    /// pairs were not present before.
    pub fn merge(&mut self, other: &MorphDb) -> usize {
        let mut added = 0;
        for (m, locs) in &other.db {
            let entry = self.db.entry(m.clone()).or_default();
            for loc in locs {
                if entry.insert(loc.clone()) {
                    added += 1;
                }
            }
        }
        self.stats = None;
        added
    }

    /// Import every line of a UTF-8 text file as `TextFile` evidence.
    ///
    /// Nothing is committed unless the whole file was read and analyzed.
    /// Returns the number of new (morpheme, location) pairs.
    pub fn import_file(
        &mut self,
        path: impl AsRef<Path>,
        cache: &ExtractionCache,
        analyzer: &dyn Analyzer,
        maturity: u32,
    ) -> Result<usize, DbError> {
        self.import_file_with_tags(path, cache, analyzer, maturity, None)
    }

    /// [`import_file`](Self::import_file) with note tags for replacement rules.
    pub fn import_file_with_tags(
        &mut self,
        path: impl AsRef<Path>,
        cache: &ExtractionCache,
        analyzer: &dyn Analyzer,
        maturity: u32,
        tags: Option<&HashSet<String>>,
    ) -> Result<usize, DbError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| DbError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut staged = MorphDb::new();
        let mut lines = 0usize;
        for (idx, line) in contents.lines().enumerate() {
            let line_no = idx + 1;
            let ms = cache
                .lookup_or_compute(analyzer, line.trim(), tags)
                .map_err(|source| DbError::Analyzer {
                    path: path.to_path_buf(),
                    line: line_no,
                    source,
                })?;
            staged.add_msl(ms, &Location::text_file(path, line_no, maturity));
            lines = line_no;
        }

        let added = self.merge(&staged);
        info!(
            "imported {} lines from {} ({added} new locations)",
            lines,
            path.display()
        );
        Ok(added)
    }

    // Analysis (local)

    /// Sum of location weights for `m`; 0 if `m` was never seen.
    pub fn frequency(&self, m: &Morpheme) -> u64 {
        self.db
            .get(m)
            .map(|locs| locs.iter().map(|l| u64::from(l.weight())).sum::<u64>())
            .unwrap_or(0)
    }

    /// Euclidean norm of location maturities for `m`; 0.0 if `m` was never seen.
    ///
    /// Many immature sightings grow the value slowly while a few mature ones
    /// dominate it.
    pub fn maturity(&self, m: &Morpheme) -> f64 {
        self.db
            .get(m)
            .map(|locs| {
                locs.iter()
                    .map(|l| f64::from(l.maturity()).powi(2))
                    .sum::<f64>()
                    .sqrt()
            })
            .unwrap_or(0.0)
    }

    // Analysis (global)

    pub fn loc_db(&self) -> LocDb {
        let mut out: LocDb = HashMap::new();
        for (m, locs) in &self.db {
            for loc in locs {
                out.entry(loc.clone()).or_default().insert(m.clone());
            }
        }
        out
    }

    /// Flashcard fields by `(note_id, guid, field_name)`.
    pub fn fid_db(&self) -> HashMap<FactId, Location> {
        self.db
            .values()
            .flatten()
            .filter_map(|loc| loc.fact_id().map(|fid| (fid, loc.clone())))
            .collect()
    }

    pub fn count_by_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for m in self.db.keys() {
            *counts.entry(m.pos().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Recompute and cache the totals.
    pub fn analyze(&mut self) -> &DbStats {
        let stats = DbStats {
            count: self.db.len(),
            pos_breakdown: self.count_by_type(),
        };
        self.stats.insert(stats)
    }

    /// Totals from the last [`analyze`](Self::analyze), or `None` if the
    /// database changed since.
    pub fn stats(&self) -> Option<&DbStats> {
        self.stats.as_ref()
    }

    // Reports

    pub fn show(&self) -> String {
        let mut out = String::new();
        for (m, locs) in self.sorted_entries() {
            out.push_str(&m.show());
            out.push('\n');
            for loc in sorted_locations(locs) {
                out.push_str(&format!("  {loc}\n"));
            }
        }
        out
    }

    pub fn show_loc_db(&self) -> String {
        let loc_db = self.loc_db();
        let mut locs: Vec<(&Location, &HashSet<Morpheme>)> = loc_db.iter().collect();
        locs.sort_by_cached_key(|(loc, _)| loc.to_string());

        let mut out = String::new();
        for (loc, ms) in locs {
            out.push_str(&format!("{loc}\n"));
            let mut lines: Vec<String> = ms.iter().map(Morpheme::show).collect();
            lines.sort();
            for line in lines {
                out.push_str(&format!("  {line}\n"));
            }
        }
        out
    }

    pub fn show_ms(&self) -> String {
        show_morphemes(self.sorted_entries().into_iter().map(|(m, _)| m))
    }

    /// Human readable totals, re-analyzing first.
    pub fn analyze_report(&mut self) -> String {
        let stats = self.analyze();
        let total = stats.count;
        let breakdown = stats
            .pos_breakdown
            .iter()
            .map(|(pos, n)| {
                let pct = if total == 0 { 0 } else { n * 100 / total };
                format!("{n}\t{pct}%\t{pos}")
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!("Total morphemes: {total}\nBy part of speech:\n{breakdown}")
    }

    fn sorted_entries(&self) -> Vec<(&Morpheme, &HashSet<Location>)> {
        let mut entries: Vec<_> = self.db.iter().collect();
        entries.sort_by_cached_key(|(m, _)| m.show());
        entries
    }
}

fn sorted_locations(locs: &HashSet<Location>) -> Vec<&Location> {
    let mut sorted: Vec<&Location> = locs.iter().collect();
    sorted.sort_by_cached_key(|loc| loc.to_string());
    sorted
}
