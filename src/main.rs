//! ranking-ingest CLI application
//!
//! Polls artwork ranking listings, downloads each listed asset once and
//! keeps per-provider score statistics up to date.

use std::process;

use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use ranking_ingest::cli::{handle_config, handle_run, handle_score, handle_stats, Cli, Commands};
use ranking_ingest::config::AppConfig;
use ranking_ingest::constants::logging;
use ranking_ingest::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();
    init_logging(&cli).await;

    info!("ranking-ingest v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run(args) => {
            debug!("Executing run command");
            handle_run(&cli.global, args).await
        }
        Commands::Stats(args) => {
            debug!("Executing stats command");
            handle_stats(&cli.global, args).await
        }
        Commands::Score(args) => {
            debug!("Executing score command");
            handle_score(&cli.global, args).await
        }
        Commands::Config(args) => handle_config(&cli.global, args).await,
    }
}

/// Initialize logging from the verbosity flags, falling back to
/// `[logging].level`
///
/// `RUST_LOG` directives are honoured on top of the crate level.
async fn init_logging(cli: &Cli) {
    let log_level = match cli.log_level_override() {
        Some(level) => level.to_string(),
        None => AppConfig::load(cli.global.config.clone())
            .await
            .map(|config| config.logging.level.to_ascii_lowercase())
            .unwrap_or_else(|_| logging::DEFAULT_LOG_LEVEL.to_string()),
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("ranking_ingest={}", log_level).parse() {
        filter = filter.add_directive(directive);
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose || cli.global.verbose)
        .with_writer(std::io::stderr)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
