//! Backfill run command

use crate::adapters::AdapterSet;
use crate::backfill::{BackfillJob, BackfillRunner, JobOutcome, RangeOptions, RangeReport, RunnerSettings};
use crate::calendar::ChunkGranularity;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::progress::job_progress_bar;
use crate::registry::SourceRegistry;
use crate::store::SqliteStore;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// What `backfill run` should cover
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    /// One year of one product
    Chunk {
        source_id: String,
        product_id: String,
        year: i32,
    },
    /// A year range of one product
    Range {
        source_id: String,
        product_id: String,
        from: i32,
        to: i32,
    },
    /// Every product of one source
    Source { source_id: String, from: i32, to: i32 },
    /// Every product of every active source
    All { from: i32, to: i32 },
}

#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub source: Option<String>,
    pub product: Option<String>,
    pub year: Option<i32>,
    pub from: Option<i32>,
    pub to: Option<i32>,
    pub all: bool,
}

impl RunTarget {
    /// Resolve CLI flags. Without `--from`/`--to` a range covers the
    /// configured start year through the current year.
    pub fn from_overrides(overrides: RunOverrides, config: &Config) -> Result<Self> {
        let current_year = Utc::now().year();
        let from = overrides.from.unwrap_or(current_year);
        let to = overrides.to.unwrap_or(config.coverage.start_year);

        if overrides.all {
            if overrides.source.is_some() || overrides.product.is_some() {
                return Err(Error::Config("--all cannot be combined with --source or --product".into()));
            }
            return Ok(RunTarget::All { from, to });
        }

        let Some(source_id) = overrides.source else {
            return Err(Error::Config("Specify --source (and --product) or --all".into()));
        };

        match (overrides.product, overrides.year) {
            (Some(product_id), Some(year)) => Ok(RunTarget::Chunk {
                source_id,
                product_id,
                year,
            }),
            (Some(product_id), None) => Ok(RunTarget::Range {
                source_id,
                product_id,
                from,
                to,
            }),
            (None, Some(_)) => Err(Error::Config("--year requires --product".into())),
            (None, None) => Ok(RunTarget::Source { source_id, from, to }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides `[backfill] granularity`
    pub granularity: Option<ChunkGranularity>,
    pub force: bool,
}

/// Totals of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub ranges: Vec<RangeReport>,
    pub failures: Vec<JobOutcome>,
    pub chunks_run: usize,
    pub inserted: u64,
    pub skipped: u64,
    pub errors: u64,
    pub paused: bool,
}

impl RunSummary {
    fn absorb(&mut self, range: RangeReport) {
        self.chunks_run += range.chunks.len();
        self.inserted += range.inserted;
        self.skipped += range.skipped;
        self.errors += range.errors;
        self.paused |= range.paused;
        self.ranges.push(range);
    }
}

/// Run a backfill against the configured store
pub async fn cmd_run(
    config: &Config,
    store: Arc<SqliteStore>,
    registry: Arc<SourceRegistry>,
    target: RunTarget,
    options: RunOptions,
) -> Result<RunSummary> {
    let adapters = AdapterSet::from_registry(&registry, config)?;
    let runner = BackfillRunner::new(
        store,
        Arc::clone(&registry),
        adapters,
        RunnerSettings::from(&config.backfill),
    );
    let range_options = RangeOptions {
        granularity: options.granularity.unwrap_or(config.backfill.granularity),
        force: options.force,
    };

    let mut summary = RunSummary::default();

    match target {
        RunTarget::Chunk {
            source_id,
            product_id,
            year,
        } => {
            info!(source = %source_id, product = %product_id, year, "Backfilling chunk");
            let report = runner
                .backfill_chunk(&source_id, &product_id, year, range_options.granularity)
                .await?;
            summary.absorb(RangeReport {
                source_id,
                product_id,
                inserted: report.inserted,
                skipped: report.skipped,
                errors: report.errors,
                paused: report.paused,
                chunks: vec![report],
                ..Default::default()
            });
        }
        RunTarget::Range {
            source_id,
            product_id,
            from,
            to,
        } => {
            info!(source = %source_id, product = %product_id, from, to, "Backfilling range");
            let range = runner
                .backfill_range(&source_id, &product_id, from, to, range_options)
                .await?;
            summary.absorb(range);
        }
        RunTarget::Source { source_id, from, to } => {
            let source = registry.source(&source_id)?;
            let jobs: Vec<BackfillJob> = source
                .products
                .iter()
                .map(|p| BackfillJob {
                    source_id: source.id.clone(),
                    product_id: p.id.clone(),
                    start_year: from,
                    end_year: to,
                })
                .collect();
            run_jobs(&runner, jobs, range_options, &mut summary).await;
        }
        RunTarget::All { from, to } => {
            let jobs = runner.jobs_for_active_sources(from, to);
            info!(jobs = jobs.len(), "Backfilling all active sources");
            run_jobs(&runner, jobs, range_options, &mut summary).await;
        }
    }

    Ok(summary)
}

async fn run_jobs(
    runner: &BackfillRunner<SqliteStore>,
    jobs: Vec<BackfillJob>,
    options: RangeOptions,
    summary: &mut RunSummary,
) {
    let pb = job_progress_bar(jobs.len(), "backfilling");
    let outcomes = runner.backfill_many(jobs, options, pb.clone()).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    for outcome in outcomes {
        match outcome.report {
            Some(range) => summary.absorb(range),
            None => summary.failures.push(outcome),
        }
    }
}

pub fn print_run_summary(summary: &RunSummary) {
    println!("\n✓ Backfill complete");
    println!("  Chunks run: {}", summary.chunks_run);
    println!("  Observations inserted: {}", summary.inserted);
    println!("  Observations skipped (already stored): {}", summary.skipped);
    println!("  Step errors: {}", summary.errors);

    for range in &summary.ranges {
        let mut notes = Vec::new();
        if !range.skipped_completed.is_empty() {
            notes.push(format!("{} completed years skipped", range.skipped_completed.len()));
        }
        if !range.unavailable_years.is_empty() {
            notes.push(format!("{} years unavailable", range.unavailable_years.len()));
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!(" ({})", notes.join(", "))
        };
        println!(
            "  • {}/{}: +{} new, {} errors{}",
            range.source_id, range.product_id, range.inserted, range.errors, notes
        );
    }

    if summary.paused {
        println!("\n⏸  Paused. Re-run the same command to resume.");
    }

    if !summary.failures.is_empty() {
        println!("\n⚠️  {} jobs failed:", summary.failures.len());
        for failure in &summary.failures {
            println!(
                "  • {}/{}: {}",
                failure.job.source_id,
                failure.job.product_id,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
