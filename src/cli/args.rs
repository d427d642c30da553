//! Command-line argument parsing for ranking-ingest
//!
//! This module defines the CLI structure using clap derive macros: one
//! ingestion run, aggregate inspection, a manual score writer and
//! configuration management.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::app::models::AssetType;

/// ranking-ingest - collect ranked artwork and keep score statistics
#[derive(Parser, Debug)]
#[command(
    name = "ranking-ingest",
    version,
    about = "Ingest ranked assets from pixiv, danbooru and sankaku",
    long_about = "Polls the ranking listings of each enabled source, downloads every listed asset once
into content storage and maintains per-provider score statistics."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (trace level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - only warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Data directory holding the document snapshot and blobs
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one ingestion cycle and wait until every download has settled
    Run(RunArgs),

    /// Show per-provider score statistics
    Stats(StatsArgs),

    /// Set or clear one provider's score on a stored asset
    Score(ScoreArgs),

    /// Show or initialize the configuration file
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Source to poll; repeat for several. Defaults to every enabled source
    #[arg(short, long = "source", value_name = "NAME")]
    pub sources: Vec<AssetType>,

    /// Ranking date (YYYY-MM-DD); defaults to yesterday (UTC)
    #[arg(short, long, value_name = "DATE")]
    pub date: Option<NaiveDate>,

    /// Stop waiting for downloads after this long, e.g. "30m"
    #[arg(short, long, value_name = "DURATION", value_parser = humantime_serde::re::humantime::parse_duration)]
    pub timeout: Option<Duration>,
}

impl RunArgs {
    /// Date to fetch, defaulting to yesterday in UTC
    pub fn resolved_date(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| {
            let today = chrono::Utc::now().date_naive();
            today.pred_opt().unwrap_or(today)
        })
    }
}

/// Arguments for the stats command
#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    /// Recount every canonical record and report drift
    #[arg(long)]
    pub verify: bool,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the score command
#[derive(Args, Debug, Clone)]
pub struct ScoreArgs {
    /// Storage key of the asset, e.g. "danbooru/7.jpg"
    #[arg(value_name = "KEY")]
    pub key: String,

    /// Scoring provider name
    #[arg(value_name = "PROVIDER")]
    pub provider: String,

    /// Numeric score, or "none" to remove it
    #[arg(value_name = "VALUE", value_parser = parse_score)]
    pub value: ScoreValue,
}

/// Parsed score argument
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreValue {
    Set(f64),
    Remove,
}

impl ScoreValue {
    pub fn as_option(self) -> Option<f64> {
        match self {
            ScoreValue::Set(value) => Some(value),
            ScoreValue::Remove => None,
        }
    }
}

fn parse_score(raw: &str) -> Result<ScoreValue, String> {
    if raw.eq_ignore_ascii_case("none") {
        return Ok(ScoreValue::Remove);
    }
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("'{}' is neither a number nor \"none\"", raw))?;
    if !value.is_finite() {
        return Err(format!("score must be finite, got {}", raw));
    }
    Ok(ScoreValue::Set(value))
}

/// Arguments for configuration management
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write a commented default configuration file
    Init {
        /// Target path; defaults to the per-user config location
        #[arg(value_name = "FILE")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Log level implied by the verbosity flags, if any was given
    pub fn log_level_override(&self) -> Option<&'static str> {
        if self.global.very_verbose {
            Some("trace")
        } else if self.global.verbose {
            Some("debug")
        } else if self.global.quiet {
            Some("warn")
        } else {
            None
        }
    }
}
