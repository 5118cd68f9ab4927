pub mod cli;
pub mod commands;

pub use cli::{AnalyzerArgs, Cli, Command, Settings};
pub use commands::run;
