use std::path::PathBuf;

use morph_db::{DbError, LoadPolicy, MorphDb};
use morph_extract::StorageError;
use morph_types::{DeckField, Location, Morpheme};

fn sample() -> MorphDb {
    let mut db = MorphDb::new();
    let walk = Morpheme::new("歩く", "歩い", "動詞", "自立", "アルク");
    db.add_msl(
        [walk.clone(), Morpheme::new("犬", "犬", "名詞", "一般", "イヌ")],
        &Location::text_file("story.txt", 3, 21),
    );
    db.add_ml_set(
        walk,
        [
            Location::corpus("subtitles", 40),
            Location::nowhere(1, 0),
            Location::from(DeckField::new(7, "Expression", "歩いて", "abc", vec![4, 30])),
        ],
    );
    db
}

fn db_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("dbs").join("all.db")
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    let db = sample();
    db.save(&path).unwrap();

    let loaded = MorphDb::open(&path, LoadPolicy::Strict).unwrap();
    assert_eq!(loaded, db);
    assert_eq!(loaded.pair_count(), db.pair_count());
    assert_eq!(loaded.stats().map(|s| s.count), Some(2));
}

#[test]
fn missing_file_depends_on_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);

    let err = MorphDb::open(&path, LoadPolicy::Strict).unwrap_err();
    assert!(matches!(err, DbError::Storage(ref e) if e.is_not_found()));

    let empty = MorphDb::open(&path, LoadPolicy::Lenient).unwrap();
    assert!(empty.is_empty());

    let mut db = sample();
    assert!(!db.load(&path, LoadPolicy::Lenient).unwrap());
    assert!(db.is_empty());
}

#[test]
fn corrupt_file_leaves_contents_intact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.db");
    std::fs::write(&path, b"MRDB\x01\x00\x00\x00not zstd at all").unwrap();

    let mut db = sample();
    let before = db.clone();
    let err = db.load(&path, LoadPolicy::Lenient).unwrap_err();
    assert!(matches!(err, DbError::Storage(_)));
    assert_eq!(db, before);
}

#[test]
fn rejects_newer_format_versions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");
    std::fs::write(&path, b"MRDB\x09\x00\x00\x00").unwrap();

    let err = MorphDb::open(&path, LoadPolicy::Strict).unwrap_err();
    assert!(matches!(
        err,
        DbError::Storage(StorageError::UnsupportedVersion { found: 9, .. })
    ));
}

#[test]
fn save_replaces_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = db_path(&dir);
    sample().save(&path).unwrap();

    let mut smaller = MorphDb::new();
    smaller.add_msl([Morpheme::literal("x")], &Location::nowhere(0, 1));
    smaller.save(&path).unwrap();

    assert_eq!(MorphDb::open(&path, LoadPolicy::Strict).unwrap(), smaller);
    let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[test]
fn merge_files_writes_destination() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.db");
    let b = dir.path().join("b.db");
    let dest = dir.path().join("out").join("merged.db");

    sample().save(&a).unwrap();
    let mut other = MorphDb::new();
    other.add_msl([Morpheme::literal("y")], &Location::text_file("b.txt", 1, 0));
    other.save(&b).unwrap();

    let (merged, added) =
        MorphDb::merge_files(&a, &b, Some(dest.as_path()), LoadPolicy::Strict).unwrap();
    assert_eq!(merged.len(), 3);
    assert_eq!(added, 1);
    assert_eq!(MorphDb::open(&dest, LoadPolicy::Strict).unwrap(), merged);

    let (lenient, added) =
        MorphDb::merge_files(&a, dir.path().join("absent.db"), None, LoadPolicy::Lenient).unwrap();
    assert_eq!(lenient, sample());
    assert_eq!(added, 0);
}
