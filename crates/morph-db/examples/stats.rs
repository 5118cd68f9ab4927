use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use morph_db::{LoadPolicy, MorphDb};

fn main() -> Result<()> {
    let db_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: cargo run -p morph-db --example stats -- <path-to-db>")?;

    let mut db = MorphDb::open(&db_path, LoadPolicy::Strict)
        .with_context(|| format!("loading morpheme db from {}", db_path.display()))?;

    println!("Database: {}", db_path.display());
    println!("Locations    : {}", db.pair_count());
    println!("Distinct locs: {}", db.loc_db().len());
    println!("Note fields  : {}", db.fid_db().len());
    println!("{}", db.analyze_report());

    // Spot-check the most frequent morphemes.
    let mut ranked: Vec<_> = db
        .morphemes()
        .map(|m| (db.frequency(m), db.maturity(m), m.clone()))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.2.show().cmp(&b.2.show())));
    println!("\nMost frequent:");
    for (freq, maturity, m) in ranked.iter().take(10) {
        println!("  {:>6} {:>8.1}  {}", freq, maturity, m);
    }

    Ok(())
}
