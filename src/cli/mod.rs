//! Command-line interface components
//!
//! Argument parsing, startup helpers, progress display and the command
//! handlers for the `ranking-ingest` binary.

pub mod args;
pub mod commands;
pub mod progress;
pub mod startup;

pub use args::{Cli, Commands, ConfigAction, ConfigArgs, GlobalArgs, RunArgs, ScoreArgs, StatsArgs};
pub use commands::{handle_config, handle_run, handle_score, handle_stats};
pub use progress::RunProgress;
pub use startup::{build_pipeline, load_config, open_stores, select_sources, Stores};
