use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use morph_extract::{
    Analyzer, CacheConfig, ExtractionCache, ProcessAnalyzer, ProcessConfig, analyzer_by_name,
    load_rules,
};

const USAGE: &str = "usage: cargo run -p morph-extract --example extract -- <space|cjk|mecab> <text> [rules.json] [tag,...]";

fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let name = args.next().context(USAGE)?;
    let text = args.next().context(USAGE)?;
    let rules_path = args.next().map(PathBuf::from);
    let tags: Option<HashSet<String>> = args
        .next()
        .map(|raw| raw.split(',').map(str::to_string).collect());
    if args.next().is_some() {
        bail!("too many arguments\n{USAGE}");
    }

    let analyzer: Box<dyn Analyzer> = if name == "mecab" {
        Box::new(ProcessAnalyzer::new(ProcessConfig::mecab()))
    } else {
        analyzer_by_name(&name).with_context(|| format!("unknown analyzer `{name}`"))?
    };
    let rules = match &rules_path {
        Some(path) => {
            load_rules(path).with_context(|| format!("loading rules from {}", path.display()))?
        }
        None => Vec::new(),
    };

    let cache = ExtractionCache::open(CacheConfig {
        rules,
        ..CacheConfig::default()
    });
    let morphemes = cache.lookup_or_compute(analyzer.as_ref(), &text, tags.as_ref())?;

    println!("Analyzer: {}", analyzer.description());
    println!("Input   : {text}");
    for m in &morphemes {
        println!(
            "  {:<12} {:<12} {:<8} {:<8} {}",
            m.base(),
            m.inflected(),
            m.pos(),
            m.sub_pos(),
            m.reading()
        );
    }
    Ok(())
}
