use std::io::Write;

use anyhow::{Context, Result};
use morph_db::{LoadPolicy, MorphDb};
use morph_extract::ExtractionCache;
use morph_types::show_morphemes;
use tracing::{info, warn};

use crate::cli::{Cli, Command};

/// Execute one parsed invocation, writing human output to `out`.
pub fn run(cli: &Cli, out: &mut impl Write) -> Result<()> {
    let cache = cli.settings.open_cache()?;
    let result = dispatch(&cli.command, &cache, out);
    if let Err(err) = cache.save() {
        warn!("failed to save extraction cache: {err}");
    }
    result
}

fn dispatch(command: &Command, cache: &ExtractionCache, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Import {
            file,
            db,
            maturity,
            analyzer,
        } => {
            let tagger = analyzer.build()?;
            let mut morph_db = MorphDb::open(db, LoadPolicy::Lenient)
                .with_context(|| format!("opening {}", db.display()))?;
            let added = morph_db.import_file_with_tags(
                file,
                cache,
                tagger.as_ref(),
                *maturity,
                analyzer.tag_set().as_ref(),
            )?;
            morph_db.save(db)?;
            writeln!(
                out,
                "{added} new locations; {} morphemes in {}",
                morph_db.len(),
                db.display()
            )?;
        }
        Command::Merge {
            a,
            b,
            out: dest,
            lenient,
        } => {
            let policy = if *lenient {
                LoadPolicy::Lenient
            } else {
                LoadPolicy::Strict
            };
            let (merged, added) = MorphDb::merge_files(a, b, dest.as_deref(), policy)
                .with_context(|| format!("merging {} into {}", b.display(), a.display()))?;
            match dest {
                Some(dest) => info!("wrote merged database to {}", dest.display()),
                None => info!("no --out given, merged database not saved"),
            }
            writeln!(out, "{added} new locations; {} morphemes", merged.len())?;
        }
        Command::Stats { db } => {
            let mut morph_db = MorphDb::open(db, LoadPolicy::Strict)
                .with_context(|| format!("opening {}", db.display()))?;
            writeln!(out, "{}", morph_db.analyze_report())?;
        }
        Command::Show { db, by_location } => {
            let morph_db = MorphDb::open(db, LoadPolicy::Strict)
                .with_context(|| format!("opening {}", db.display()))?;
            let report = if *by_location {
                morph_db.show_loc_db()
            } else {
                morph_db.show()
            };
            write!(out, "{report}")?;
        }
        Command::Extract { text, analyzer } => {
            let tagger = analyzer.build()?;
            let morphemes =
                cache.lookup_or_compute(tagger.as_ref(), text, analyzer.tag_set().as_ref())?;
            writeln!(out, "{}", show_morphemes(&morphemes))?;
        }
    }
    Ok(())
}
