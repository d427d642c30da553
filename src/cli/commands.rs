//! Command handlers for the ranking-ingest CLI
//!
//! Each handler loads the configuration, opens the stores it needs and
//! delegates to the application layer. Human-readable output goes to
//! stdout; diagnostics go through `tracing`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Instant;

use tracing::{info, warn};

use crate::app::aggregate::{self, AggregateMaintainer, AggregateMismatch};
use crate::app::models::AggregateStatRecord;
use crate::app::pipeline::{Quiescence, RunSummary, SignalHandler};
use crate::app::store::DocumentStore;
use crate::cli::args::{ConfigAction, ConfigArgs, GlobalArgs, RunArgs, ScoreArgs, StatsArgs};
use crate::cli::progress::{RunProgress, REFRESH_INTERVAL};
use crate::cli::startup::{build_pipeline, load_config, open_stores, select_sources};
use crate::config::AppConfig;
use crate::constants::{pipeline, storage};
use crate::errors::{AppError, Result};

/// Handle the run command
///
/// Fetches every selected source's listings for the date, waits for the
/// resulting downloads to settle and persists the document snapshot. A run
/// that times out is saved and then reported as an error.
pub async fn handle_run(global: &GlobalArgs, args: RunArgs) -> Result<()> {
    let started = Instant::now();
    let config = load_config(global).await?;
    let sources = select_sources(&config, &args.sources)?;
    let date = args.resolved_date();
    let stores = open_stores(&config).await?;

    let mut pipeline = build_pipeline(&config, &stores, &sources)?;
    info!(
        "Starting run for {} with {} source(s)",
        date,
        sources.len()
    );

    let signals = SignalHandler::new(pipeline.shutdown_handle()).setup();
    let spinner = RunProgress::new(!global.quiet);

    pipeline.run_cycle(date).await;
    let quiescence = {
        let wait = pipeline.wait_until_idle(args.timeout);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                quiescence = &mut wait => break quiescence,
                _ = tokio::time::sleep(REFRESH_INTERVAL) => {
                    spinner.update(&pipeline.progress().await);
                }
            }
        }
    };
    spinner.finish();

    let summary = pipeline.shutdown(quiescence, started.elapsed()).await;
    signals.abort();
    stores.save().await?;

    if !global.quiet {
        print!("{}", render_run_summary(&summary));
    }

    if summary.abandoned_events > 0 {
        return Err(AppError::generic(format!(
            "{} change events could not be applied; run `stats --verify`",
            summary.abandoned_events
        )));
    }
    match summary.quiescence {
        Quiescence::Idle => Ok(()),
        Quiescence::Interrupted => {
            warn!("Run interrupted; undispatched tasks will be rediscovered next run");
            Ok(())
        }
        Quiescence::TimedOut => Err(AppError::generic(
            "run timed out before every download settled",
        )),
    }
}

/// Handle the stats command
pub async fn handle_stats(global: &GlobalArgs, args: StatsArgs) -> Result<()> {
    let config = load_config(global).await?;
    let stores = open_stores(&config).await?;
    let store: &dyn DocumentStore = stores.documents.as_ref();

    let aggregates = aggregate::read_aggregates(store).await?;
    let mismatches = if args.verify {
        Some(aggregate::verify(store).await?)
    } else {
        None
    };

    if args.json {
        let output = serde_json::json!({
            "assets": stores.documents.count(storage::ASSETS_COLLECTION).await,
            "providers": aggregates,
            "mismatches": mismatches,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).map_err(|e| AppError::generic(e.to_string()))?
        );
    } else {
        println!(
            "{} canonical assets",
            stores.documents.count(storage::ASSETS_COLLECTION).await
        );
        print!("{}", render_aggregates(&aggregates));
        if let Some(mismatches) = &mismatches {
            print!("{}", render_mismatches(mismatches));
        }
    }

    match mismatches {
        Some(found) if !found.is_empty() => Err(AppError::generic(format!(
            "{} aggregate(s) disagree with a full recount",
            found.len()
        ))),
        _ => Ok(()),
    }
}

/// Handle the score command
///
/// Writes the score, then applies the resulting aggregate delta before
/// saving, so the snapshot never holds a score without its aggregate.
pub async fn handle_score(global: &GlobalArgs, args: ScoreArgs) -> Result<()> {
    let config = load_config(global).await?;
    let stores = open_stores(&config).await?;

    let mut feed = stores.documents.subscribe(storage::ASSETS_COLLECTION);
    let maintainer = AggregateMaintainer::new(stores.documents.clone());

    let value = args.value.as_option();
    aggregate::set_score(stores.documents.as_ref(), &args.key, &args.provider, value).await?;
    let touched = maintainer.drain(&mut feed).await?;
    aggregate::prune_applied_events(stores.documents.as_ref(), pipeline::APPLIED_EVENT_RETENTION)
        .await?;
    stores.save().await?;

    match value {
        Some(value) => info!("Set {} score on {} to {}", args.provider, args.key, value),
        None => info!("Removed {} score from {}", args.provider, args.key),
    }
    if !global.quiet {
        println!(
            "Updated {} ({} aggregate{} changed)",
            args.key,
            touched,
            if touched == 1 { "" } else { "s" }
        );
    }
    Ok(())
}

/// Handle the config command
pub async fn handle_config(global: &GlobalArgs, args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = load_config(global).await?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        ConfigAction::Init { path, force } => {
            let path = match path {
                Some(path) => path,
                None => AppConfig::default_config_path()?,
            };
            AppConfig::write_default(&path, force).await?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

/// Human-readable run summary
pub fn render_run_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let status = match summary.quiescence {
        Quiescence::Idle => "complete",
        Quiescence::TimedOut => "timed out",
        Quiescence::Interrupted => "interrupted",
    };
    let _ = writeln!(
        out,
        "Run {} in {:.1}s",
        status,
        summary.duration.as_secs_f64()
    );
    for source in &summary.sources {
        let _ = writeln!(
            out,
            "  {:<9} pages {} ok / {} failed, {} records, {} downloaded, {} present, {} skipped, {} abandoned",
            source.asset_type.as_str(),
            source.pages_ok,
            source.pages_failed,
            source.records_written,
            source.workers.downloaded,
            source.workers.already_present,
            source.workers.skipped,
            source.queue.abandoned_count
        );
    }
    let _ = writeln!(
        out,
        "  total     {} downloaded ({} bytes), {} failed deliveries",
        summary.workers.downloaded, summary.workers.bytes_downloaded, summary.workers.failed
    );
    if summary.abandoned_events > 0 {
        let _ = writeln!(
            out,
            "  warning   {} change events abandoned; aggregates may be stale",
            summary.abandoned_events
        );
    }
    out
}

/// Table of provider aggregates
pub fn render_aggregates(aggregates: &BTreeMap<String, AggregateStatRecord>) -> String {
    if aggregates.is_empty() {
        return "No scores recorded\n".to_string();
    }
    let mut out = format!("{:<24} {:>8} {:>14} {:>10}\n", "provider", "count", "sum", "mean");
    for record in aggregates.values() {
        let mean = record
            .mean()
            .map_or_else(|| "-".to_string(), |mean| format!("{:.3}", mean));
        let _ = writeln!(
            out,
            "{:<24} {:>8} {:>14.3} {:>10}",
            record.provider, record.count, record.sum, mean
        );
    }
    out
}

fn render_mismatches(mismatches: &[AggregateMismatch]) -> String {
    if mismatches.is_empty() {
        return "Aggregates match a full recount\n".to_string();
    }
    let mut out = String::from("Aggregate drift:\n");
    for mismatch in mismatches {
        let _ = writeln!(
            out,
            "  {}: stored count {} sum {}, expected count {} sum {}",
            mismatch.provider,
            mismatch.stored.count,
            mismatch.stored.sum,
            mismatch.expected.count,
            mismatch.expected.sum
        );
    }
    out
}
