use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use morph_extract::{
    Analyzer, CacheConfig, DEFAULT_FLUSH_EVERY, ExtractionCache, ProcessAnalyzer, ProcessConfig,
    analyzer_by_name, load_rules,
};

#[derive(Debug, Parser)]
#[command(name = "morphman")]
#[command(about = "Build, merge and inspect morpheme databases")]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,
    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Persist the extraction cache at this path.
    #[arg(long, global = true, env = "MORPHMAN_CACHE")]
    pub cache: Option<PathBuf>,
    /// JSON file of replacement rules.
    #[arg(long, global = true, env = "MORPHMAN_RULES")]
    pub rules: Option<PathBuf>,
    /// Flush the cache after this many new entries (0 = only on exit).
    #[arg(long, global = true, env = "MORPHMAN_FLUSH_EVERY", default_value_t = DEFAULT_FLUSH_EVERY)]
    pub flush_every: u64,
}

impl Settings {
    pub fn open_cache(&self) -> Result<ExtractionCache> {
        let rules = match &self.rules {
            Some(path) => load_rules(path)
                .with_context(|| format!("loading rules from {}", path.display()))?,
            None => Vec::new(),
        };
        Ok(ExtractionCache::open(CacheConfig {
            path: self.cache.clone(),
            flush_every: self.flush_every,
            rules,
        }))
    }
}

#[derive(Debug, Clone, Args)]
pub struct AnalyzerArgs {
    /// Built-in analyzer: space, cjk or mecab.
    #[arg(long, default_value = "space")]
    pub analyzer: String,
    /// External tagger speaking the node line protocol; overrides --analyzer.
    #[arg(long)]
    pub cmd: Option<String>,
    /// Argument passed to --cmd (repeatable).
    #[arg(long = "arg", requires = "cmd", allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Note tag enabling matching replacement rules (repeatable).
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

impl AnalyzerArgs {
    pub fn build(&self) -> Result<Box<dyn Analyzer>> {
        if let Some(program) = &self.cmd {
            let description = std::iter::once(program.as_str())
                .chain(self.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ");
            return Ok(Box::new(ProcessAnalyzer::new(ProcessConfig {
                args: self.args.clone(),
                ..ProcessConfig::new(program, description)
            })));
        }
        if self.analyzer.eq_ignore_ascii_case("mecab") {
            return Ok(Box::new(ProcessAnalyzer::new(ProcessConfig::mecab())));
        }
        analyzer_by_name(&self.analyzer)
            .with_context(|| format!("unknown analyzer `{}`", self.analyzer))
    }

    /// `None` when no tags were given, so tag-filtered rules stay off.
    pub fn tag_set(&self) -> Option<HashSet<String>> {
        if self.tags.is_empty() {
            None
        } else {
            Some(self.tags.iter().cloned().collect())
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import a text file into a database, creating it if needed.
    Import {
        file: PathBuf,
        #[arg(long)]
        db: PathBuf,
        #[arg(long, default_value_t = 0)]
        maturity: u32,
        #[command(flatten)]
        analyzer: AnalyzerArgs,
    },
    /// Merge database B into A.
    Merge {
        a: PathBuf,
        b: PathBuf,
        /// Write the merged database here.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Treat missing inputs as empty databases.
        #[arg(long, default_value_t = false)]
        lenient: bool,
    },
    /// Print totals and the part-of-speech breakdown.
    Stats { db: PathBuf },
    /// Dump morphemes with their locations.
    Show {
        db: PathBuf,
        /// Group by location instead of by morpheme.
        #[arg(long, default_value_t = false)]
        by_location: bool,
    },
    /// Analyze a piece of text and print its morphemes.
    Extract {
        text: String,
        #[command(flatten)]
        analyzer: AnalyzerArgs,
    },
}
