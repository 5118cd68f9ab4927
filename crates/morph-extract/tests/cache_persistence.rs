use std::sync::atomic::{AtomicUsize, Ordering};

use morph_extract::{Analyzer, AnalyzerError, CacheConfig, ExtractionCache, SpaceAnalyzer};
use morph_types::Morpheme;

struct Tally {
    calls: AtomicUsize,
}

impl Analyzer for Tally {
    fn description(&self) -> &str {
        "tally"
    }

    fn extract(&self, text: &str) -> Result<Vec<Morpheme>, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.chars().map(|c| Morpheme::literal(c.to_string())).collect())
    }
}

fn config(path: std::path::PathBuf) -> CacheConfig {
    CacheConfig {
        path: Some(path),
        ..CacheConfig::default()
    }
}

#[test]
fn entries_survive_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dbs").join("morph_cache.db");
    let analyzer = Tally {
        calls: AtomicUsize::new(0),
    };

    let first = ExtractionCache::open(config(path.clone()));
    let computed = first.lookup_or_compute(&analyzer, "猫犬", None).unwrap();
    first.save().unwrap();

    let second = ExtractionCache::open(config(path));
    assert_eq!(second.len(), 1);
    let cached = second.lookup_or_compute(&analyzer, "猫犬", None).unwrap();
    assert_eq!(cached, computed);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn analyzers_do_not_share_entries() {
    let cache = ExtractionCache::in_memory();
    let tally = Tally {
        calls: AtomicUsize::new(0),
    };
    let by_char = cache.lookup_or_compute(&tally, "ab cd", None).unwrap();
    let by_word = cache.lookup_or_compute(&SpaceAnalyzer, "ab cd", None).unwrap();
    assert_eq!(by_char.len(), 5);
    assert_eq!(by_word.len(), 2);
    assert_eq!(cache.len(), 2);
}

#[test]
fn corrupt_storage_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("morph_cache.db");
    std::fs::write(&path, b"definitely not a cache").unwrap();

    let cache = ExtractionCache::open(config(path.clone()));
    assert!(cache.is_empty());
    let ms = cache
        .lookup_or_compute(&SpaceAnalyzer, "still usable", None)
        .unwrap();
    assert_eq!(ms.len(), 2);

    // The next save replaces the corrupt file with a readable one.
    cache.save().unwrap();
    assert_eq!(ExtractionCache::open(config(path)).len(), 1);
}

#[test]
fn concurrent_lookups_agree() {
    let cache = ExtractionCache::in_memory();
    let tally = Tally {
        calls: AtomicUsize::new(0),
    };
    let (cache_ref, tally_ref) = (&cache, &tally);
    let results: Vec<Vec<Morpheme>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(move || {
                    cache_ref
                        .lookup_or_compute(tally_ref, "並行", None)
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(cache.len(), 1);
}
