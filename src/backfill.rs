//! Backfill runner
//!
//! A chunk is one calendar year of one product, clipped to the product's
//! availability window. The chunk is cut into steps (year, month or day) and
//! each step is fetched, written and checkpointed in one transaction, most
//! recent first. A rerun of an interrupted chunk resumes after the last
//! committed step. Fetch failures are logged on the checkpoint and the run
//! moves on; storage failures fail the checkpoint and stop.

use crate::adapters::{AdapterSet, FetchBatch, SourceAdapter};
use crate::calendar::{chunk_spine, spine, year_end, year_start, years_descending, ChunkGranularity};
use crate::config::BackfillConfig;
use crate::error::{Error, Result};
use crate::registry::{Product, SourceRegistry};
use crate::store::{
    Checkpoint, CheckpointError, CheckpointRepository, CheckpointStatus, FetchRun, FetchRunStatus,
    Observation, RawPayload, StepCommit,
};
use chrono::{Datelike, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Runner tuning taken from `[backfill]`
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub error_log_limit: usize,
    pub max_concurrent_jobs: usize,
}

impl From<&BackfillConfig> for RunnerSettings {
    fn from(config: &BackfillConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            error_log_limit: config.error_log_limit.max(1),
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
        }
    }
}

/// Options of a range backfill
#[derive(Debug, Clone, Copy)]
pub struct RangeOptions {
    pub granularity: ChunkGranularity,
    /// Re-run chunks whose checkpoint is already completed
    pub force: bool,
}

impl Default for RangeOptions {
    fn default() -> Self {
        Self {
            granularity: ChunkGranularity::Year,
            force: false,
        }
    }
}

/// Result of one chunk run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReport {
    pub checkpoint_id: String,
    pub source_id: String,
    pub product_id: String,
    pub chunk: String,
    pub status: CheckpointStatus,
    /// Steps committed by this invocation
    pub steps_processed: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub errors: u64,
    pub resumed: bool,
    pub paused: bool,
}

/// Result of a range run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeReport {
    pub source_id: String,
    pub product_id: String,
    pub chunks: Vec<ChunkReport>,
    /// Years skipped because their checkpoint was already completed
    pub skipped_completed: Vec<i32>,
    /// Years outside the availability window
    pub unavailable_years: Vec<i32>,
    pub paused: bool,
    pub inserted: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// One (source, product, years) unit for [`BackfillRunner::backfill_many`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillJob {
    pub source_id: String,
    pub product_id: String,
    pub start_year: i32,
    pub end_year: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job: BackfillJob,
    pub report: Option<RangeReport>,
    pub error: Option<String>,
}

/// Keys currently held by a runner in this process
#[derive(Clone, Default)]
struct ActiveKeys {
    inner: Arc<Mutex<HashSet<String>>>,
}

struct KeyGuard {
    key: String,
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveKeys {
    fn acquire(&self, key: &str) -> Result<KeyGuard> {
        let mut held = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key.to_string()) {
            return Err(Error::CheckpointBusy(key.to_string()));
        }
        Ok(KeyGuard {
            key: key.to_string(),
            inner: Arc::clone(&self.inner),
        })
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut held = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.key);
    }
}

/// A step window inside a chunk
#[derive(Debug, Clone)]
struct Step {
    label: String,
    start: NaiveDate,
    end: NaiveDate,
}

/// Year batch shared by the sub-year steps of one chunk
struct ChunkFetch {
    start: NaiveDate,
    end: NaiveDate,
    batch: Option<FetchBatch>,
}

fn plan_steps(start: NaiveDate, end: NaiveDate, granularity: ChunkGranularity) -> Vec<Step> {
    let mut steps: Vec<Step> = chunk_spine(&spine(start, end), granularity)
        .into_iter()
        .map(|c| Step {
            label: c.label,
            start: c.start,
            end: c.end,
        })
        .collect();
    steps.reverse();
    steps
}

/// Orchestrates adapters, the registry and the checkpoint store
pub struct BackfillRunner<S> {
    store: Arc<S>,
    registry: Arc<SourceRegistry>,
    adapters: AdapterSet,
    settings: RunnerSettings,
    active: ActiveKeys,
    current_year: i32,
}

impl<S: CheckpointRepository + 'static> BackfillRunner<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<SourceRegistry>,
        adapters: AdapterSet,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            registry,
            adapters,
            settings,
            active: ActiveKeys::default(),
            current_year: Utc::now().year(),
        }
    }

    /// Override the year that closes open-ended availability windows
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = year;
        self
    }

    fn resolve(&self, source_id: &str, product_id: &str) -> Result<(Product, Arc<dyn SourceAdapter>)> {
        let source = self.registry.source(source_id)?;
        if !source.ready {
            return Err(Error::SourceNotReady(source_id.to_string()));
        }
        let product = self.registry.product(product_id)?;
        if product.source_id != source_id {
            return Err(Error::ProductNotFound(format!(
                "{} is not published by {}",
                product_id, source_id
            )));
        }
        let adapter = self.adapters.require(source_id)?;
        Ok((product.clone(), adapter))
    }

    /// Backfill one year of one product
    pub async fn backfill_chunk(
        &self,
        source_id: &str,
        product_id: &str,
        year: i32,
        granularity: ChunkGranularity,
    ) -> Result<ChunkReport> {
        let (product, adapter) = self.resolve(source_id, product_id)?;

        if !product.is_available_in(year, self.current_year) {
            return Err(Error::ProductUnavailable {
                product: product_id.to_string(),
                year,
            });
        }
        let (lo, hi) = match (year_start(year), year_end(year)) {
            (Some(lo), Some(hi)) => product.clip(lo, hi).ok_or(Error::ProductUnavailable {
                product: product_id.to_string(),
                year,
            })?,
            _ => return Err(Error::Other(format!("invalid year {}", year))),
        };

        let label = year.to_string();
        let checkpoint_id = Checkpoint::key_id(source_id, product_id, &label);
        let _guard = self.active.acquire(&checkpoint_id)?;

        let existing = self.store.get_checkpoint(&checkpoint_id).await?;
        let (checkpoint, resumed) = match existing {
            Some(cp) if cp.is_resumable() => {
                if cp.status == CheckpointStatus::Paused {
                    self.store
                        .set_checkpoint_status(&cp.id, CheckpointStatus::Running)
                        .await?;
                }
                info!(
                    checkpoint = %cp.id,
                    product = product_id,
                    year,
                    processed = cp.processed_steps,
                    "Resuming checkpoint"
                );
                (cp, true)
            }
            previous => {
                // keep the original granularity of a resumable run; a fresh
                // or restarted chunk uses the requested one
                let total = plan_steps(lo, hi, granularity).len() as i64;
                let cp = Checkpoint::new(source_id, product_id, &label, lo, hi, granularity, total);
                if let Some(old) = previous {
                    debug!(checkpoint = %old.id, status = %old.status, "Restarting checkpoint");
                }
                self.store.save_checkpoint(&cp).await?;
                (cp, false)
            }
        };

        let steps: Vec<Step> = plan_steps(checkpoint.chunk_start, checkpoint.chunk_end, checkpoint.granularity)
            .into_iter()
            .filter(|s| match (resumed, checkpoint.last_position) {
                (true, Some(last)) => s.start < last,
                _ => true,
            })
            .collect();

        let mut report = ChunkReport {
            checkpoint_id: checkpoint.id.clone(),
            source_id: source_id.to_string(),
            product_id: product_id.to_string(),
            chunk: label,
            status: CheckpointStatus::Running,
            steps_processed: 0,
            inserted: 0,
            skipped: 0,
            errors: 0,
            resumed,
            paused: false,
        };

        let mut chunk = ChunkFetch {
            start: checkpoint.chunk_start,
            end: checkpoint.chunk_end,
            batch: None,
        };

        for step in steps {
            // operator pause is observed between steps, never mid-step
            let current = match self.store.get_checkpoint(&checkpoint.id).await {
                Ok(Some(cp)) => cp,
                Ok(None) => return Err(Error::CheckpointNotFound(checkpoint.id.clone())),
                Err(e) => return Err(self.fail(&checkpoint.id, e).await),
            };
            if current.status == CheckpointStatus::Paused {
                info!(checkpoint = %checkpoint.id, step = %step.label, "Checkpoint paused by operator");
                report.status = CheckpointStatus::Paused;
                report.paused = true;
                return Ok(report);
            }

            let commit = self
                .run_step(adapter.as_ref(), &product, &checkpoint.id, &step, &mut chunk)
                .await;
            let commit = match commit {
                Ok(commit) => commit,
                Err(e) => return Err(self.fail(&checkpoint.id, e).await),
            };
            let had_error = commit.error.is_some();

            match self.store.commit_step(&commit).await {
                Ok(outcome) => {
                    report.steps_processed += 1;
                    report.inserted += outcome.inserted;
                    report.skipped += outcome.skipped;
                    if had_error {
                        report.errors += 1;
                    }
                    debug!(
                        checkpoint = %checkpoint.id,
                        step = %step.label,
                        inserted = outcome.inserted,
                        skipped = outcome.skipped,
                        "Step committed"
                    );
                }
                Err(e) => return Err(self.fail(&checkpoint.id, e).await),
            }
        }

        if self
            .store
            .finish_checkpoint(&checkpoint.id, CheckpointStatus::Completed)
            .await?
        {
            report.status = CheckpointStatus::Completed;
        } else {
            report.status = CheckpointStatus::Paused;
            report.paused = true;
        }

        info!(
            source = source_id,
            product = product_id,
            chunk = %report.chunk,
            inserted = report.inserted,
            skipped = report.skipped,
            errors = report.errors,
            "Chunk finished"
        );
        Ok(report)
    }

    /// Fetch one step and assemble what it writes. Only fatal errors escape.
    async fn run_step(
        &self,
        adapter: &dyn SourceAdapter,
        product: &Product,
        checkpoint_id: &str,
        step: &Step,
        chunk: &mut ChunkFetch,
    ) -> Result<StepCommit> {
        let mut run = FetchRun::new(&product.source_id, &product.id, Some(checkpoint_id), &step.label);
        let mut observations = Vec::new();
        let mut payload = None;
        let mut error = None;

        match self.fetch_step(adapter, product, step, chunk).await {
            Ok(batch) => {
                run.url = batch.url.clone();
                payload = batch.raw.map(RawPayload::new);
                run.payload_hash = payload.as_ref().map(|p: &RawPayload| p.hash.clone());
                run.status = if batch.observations.is_empty() {
                    FetchRunStatus::Empty
                } else {
                    FetchRunStatus::Success
                };
                observations = batch
                    .observations
                    .into_iter()
                    .filter(|o| o.date >= step.start && o.date <= step.end)
                    .map(|o| {
                        Observation::new(product, o.date, o.value)
                            .with_provenance(&run.id, run.payload_hash.as_deref())
                    })
                    .collect::<Vec<_>>();
                run.observation_count = observations.len() as i64;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(product = %product.id, step = %step.label, "Fetch failed: {}", e);
                run.status = FetchRunStatus::Failed;
                run.error = Some(e.to_string());
                error = Some(CheckpointError {
                    step: step.label.clone(),
                    message: e.to_string(),
                    at: Utc::now().to_rfc3339(),
                });
            }
        }
        run.completed_at = Some(Utc::now().to_rfc3339());

        Ok(StepCommit {
            checkpoint_id: checkpoint_id.to_string(),
            position: step.start,
            fetch_run: run,
            payload,
            observations,
            error,
            error_log_limit: self.settings.error_log_limit,
        })
    }

    /// Fetch the window of one step. Adapters that fetch whole years are
    /// called once per chunk and the batch is sliced for every later step.
    async fn fetch_step(
        &self,
        adapter: &dyn SourceAdapter,
        product: &Product,
        step: &Step,
        chunk: &mut ChunkFetch,
    ) -> Result<FetchBatch> {
        let whole_chunk = step.start <= chunk.start && step.end >= chunk.end;
        if whole_chunk || !adapter.slices_years() {
            return self
                .fetch_with_retry(adapter, product, step, step.start, step.end)
                .await;
        }

        if chunk.batch.is_none() {
            let fetched = self
                .fetch_with_retry(adapter, product, step, chunk.start, chunk.end)
                .await?;
            chunk.batch = Some(fetched);
        }
        let mut batch = chunk.batch.clone().unwrap_or_default();
        batch.retain_range(step.start, step.end);
        Ok(batch)
    }

    async fn fetch_with_retry(
        &self,
        adapter: &dyn SourceAdapter,
        product: &Product,
        step: &Step,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchBatch> {
        let mut attempt = 0;
        loop {
            match adapter.fetch_period(product, start, end).await {
                Ok(batch) => return Ok(batch),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let wait = self.settings.retry_backoff * attempt;
                    debug!(
                        product = %product.id,
                        step = %step.label,
                        attempt,
                        "Retrying after {:?}: {}", wait, e
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Mark a checkpoint failed after a fatal error and hand the error back
    async fn fail(&self, checkpoint_id: &str, err: Error) -> Error {
        error!(checkpoint = checkpoint_id, "Backfill failed: {}", err);
        if let Err(e) = self
            .store
            .finish_checkpoint(checkpoint_id, CheckpointStatus::Failed)
            .await
        {
            warn!(checkpoint = checkpoint_id, "Could not mark checkpoint failed: {}", e);
        }
        err
    }

    /// Backfill `[start_year, end_year]`, most recent year first
    pub async fn backfill_range(
        &self,
        source_id: &str,
        product_id: &str,
        start_year: i32,
        end_year: i32,
        options: RangeOptions,
    ) -> Result<RangeReport> {
        let (product, _) = self.resolve(source_id, product_id)?;
        let mut range = RangeReport {
            source_id: source_id.to_string(),
            product_id: product_id.to_string(),
            ..Default::default()
        };

        for year in years_descending(start_year, end_year) {
            if !product.is_available_in(year, self.current_year) {
                debug!(product = product_id, year, "Outside availability window");
                range.unavailable_years.push(year);
                continue;
            }

            if !options.force {
                let id = Checkpoint::key_id(source_id, product_id, &year.to_string());
                if let Some(cp) = self.store.get_checkpoint(&id).await? {
                    if cp.status == CheckpointStatus::Completed {
                        range.skipped_completed.push(year);
                        continue;
                    }
                }
            }

            let report = self
                .backfill_chunk(source_id, product_id, year, options.granularity)
                .await?;
            range.inserted += report.inserted;
            range.skipped += report.skipped;
            range.errors += report.errors;
            let paused = report.paused;
            range.chunks.push(report);

            if paused {
                range.paused = true;
                break;
            }
        }

        Ok(range)
    }

    /// Run independent jobs concurrently
    pub async fn backfill_many(
        &self,
        jobs: Vec<BackfillJob>,
        options: RangeOptions,
        progress: Option<ProgressBar>,
    ) -> Vec<JobOutcome> {
        stream::iter(jobs)
            .map(|job| {
                let progress = progress.clone();
                async move {
                    let result = self
                        .backfill_range(
                            &job.source_id,
                            &job.product_id,
                            job.start_year,
                            job.end_year,
                            options,
                        )
                        .await;
                    if let Some(pb) = &progress {
                        pb.inc(1);
                    }
                    match result {
                        Ok(report) => JobOutcome {
                            job,
                            report: Some(report),
                            error: None,
                        },
                        Err(e) => {
                            warn!(source = %job.source_id, product = %job.product_id, "Job failed: {}", e);
                            JobOutcome {
                                job,
                                report: None,
                                error: Some(e.to_string()),
                            }
                        }
                    }
                }
            })
            .buffer_unordered(self.settings.max_concurrent_jobs)
            .collect()
            .await
    }

    /// One job per product of every active, ready source with an adapter
    pub fn jobs_for_active_sources(&self, start_year: i32, end_year: i32) -> Vec<BackfillJob> {
        self.registry
            .active_sources()
            .into_iter()
            .filter(|s| s.ready && self.adapters.get(&s.id).is_some())
            .flat_map(|s| {
                s.products.iter().map(move |p| BackfillJob {
                    source_id: s.id.clone(),
                    product_id: p.id.clone(),
                    start_year,
                    end_year,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FetchedObservation, WorldBankAdapter, SourcePacer};
    use crate::adapters::http::build_client;
    use crate::config::Config;
    use crate::coverage::CoverageMapper;
    use crate::store::{ObservationFilter, ObservationRepository, SqliteStore, StepOutcome};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Notify;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn settings() -> RunnerSettings {
        RunnerSettings {
            max_retries: 2,
            retry_backoff: Duration::from_millis(1),
            error_log_limit: 3,
            max_concurrent_jobs: 4,
        }
    }

    async fn setup_store() -> (Arc<SqliteStore>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("test.db")).await.unwrap();
        (Arc::new(store), tmp)
    }

    /// Returns one observation per month and fails for configured months
    struct FakeAdapter {
        source: String,
        calls: AtomicUsize,
        fail_months: Vec<u32>,
        transient_failures: AtomicUsize,
    }

    impl FakeAdapter {
        fn new(source: &str) -> Self {
            Self {
                source: source.to_string(),
                calls: AtomicUsize::new(0),
                fail_months: Vec::new(),
                transient_failures: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn source_id(&self) -> &str {
            &self.source
        }

        fn slices_years(&self) -> bool {
            false
        }

        async fn fetch(&self, _product: &Product, year: i32) -> Result<FetchBatch> {
            Ok(FetchBatch {
                observations: (1..=12)
                    .map(|m| FetchedObservation::new(d(year, m, 1), Some(100.0 + m as f64)))
                    .collect(),
                raw: Some(format!("payload-{}", year)),
                url: None,
            })
        }

        async fn fetch_period(
            &self,
            product: &Product,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<FetchBatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.transient_failures.load(Ordering::SeqCst) > 0 {
                self.transient_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Fetch("HTTP 503: flaky".into()));
            }
            if self.fail_months.contains(&start.month()) && start.month() == end.month() {
                return Err(Error::Fetch(format!("HTTP 500: month {}", start.month())));
            }
            let mut batch = self.fetch(product, start.year()).await?;
            batch.retain_range(start, end);
            Ok(batch)
        }
    }

    fn runner_with(
        store: Arc<SqliteStore>,
        adapter: Arc<dyn SourceAdapter>,
    ) -> BackfillRunner<SqliteStore> {
        let registry = Arc::new(SourceRegistry::builtin().unwrap());
        let mut adapters = AdapterSet::new();
        adapters.insert(adapter);
        BackfillRunner::new(store, registry, adapters, settings()).with_current_year(2026)
    }

    #[tokio::test]
    async fn test_chunk_is_idempotent() {
        let (store, _tmp) = setup_store().await;
        let runner = runner_with(store.clone(), Arc::new(FakeAdapter::new("imf-ifs")));

        let first = runner
            .backfill_chunk("imf-ifs", "imf-cpi", 2020, ChunkGranularity::Month)
            .await
            .unwrap();
        assert_eq!(first.status, CheckpointStatus::Completed);
        assert_eq!(first.steps_processed, 12);
        assert_eq!(first.inserted, 12);

        let second = runner
            .backfill_chunk("imf-ifs", "imf-cpi", 2020, ChunkGranularity::Month)
            .await
            .unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, first.inserted);

        let stored = store
            .list_observations(&ObservationFilter::default())
            .await
            .unwrap();
        assert_eq!(stored.len(), 12);
        assert!(stored.iter().all(|o| o.fetch_run_id.is_some() && o.payload_hash.is_some()));
    }

    #[tokio::test]
    async fn test_steps_run_most_recent_first() {
        let (store, _tmp) = setup_store().await;
        let runner = runner_with(store.clone(), Arc::new(FakeAdapter::new("imf-ifs")));
        let report = runner
            .backfill_chunk("imf-ifs", "imf-cpi", 2021, ChunkGranularity::Month)
            .await
            .unwrap();

        let runs = store.list_fetch_runs(&report.checkpoint_id).await.unwrap();
        let labels: Vec<_> = runs.iter().map(|r| r.step_label.as_str()).collect();
        assert_eq!(labels.first(), Some(&"2021-12"));
        assert_eq!(labels.last(), Some(&"2021-01"));
    }

    #[tokio::test]
    async fn test_resume_after_interruption() {
        let (store, _tmp) = setup_store().await;
        let adapter = Arc::new(FakeAdapter::new("imf-ifs"));
        let runner = runner_with(store.clone(), adapter.clone());

        // simulate a crash after the December..September steps committed
        let mut cp = Checkpoint::new(
            "imf-ifs",
            "imf-cpi",
            "2022",
            d(2022, 1, 1),
            d(2022, 12, 31),
            ChunkGranularity::Month,
            12,
        );
        cp.processed_steps = 4;
        cp.last_position = Some(d(2022, 9, 1));
        store.save_checkpoint(&cp).await.unwrap();

        let report = runner
            .backfill_chunk("imf-ifs", "imf-cpi", 2022, ChunkGranularity::Year)
            .await
            .unwrap();
        assert!(report.resumed);
        assert_eq!(report.steps_processed, 8);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 8);

        let dates: Vec<NaiveDate> = store
            .list_observations(&ObservationFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.date)
            .collect();
        assert_eq!(dates.len(), 8);
        assert!(dates.iter().all(|d| *d < self::d(2022, 9, 1)));

        let done = store.get_checkpoint(&cp.id).await.unwrap().unwrap();
        assert_eq!(done.status, CheckpointStatus::Completed);
        assert_eq!(done.processed_steps, 12);
    }

    #[tokio::test]
    async fn test_fetch_errors_are_logged_not_fatal() {
        let (store, _tmp) = setup_store().await;
        let mut fake = FakeAdapter::new("imf-ifs");
        fake.fail_months = vec![2, 4, 6, 8, 10];
        let runner = runner_with(store.clone(), Arc::new(fake));

        let report = runner
            .backfill_chunk("imf-ifs", "imf-cpi", 2019, ChunkGranularity::Month)
            .await
            .unwrap();
        assert_eq!(report.status, CheckpointStatus::Completed);
        assert_eq!(report.errors, 5);
        assert_eq!(report.inserted, 7);

        let cp = store.get_checkpoint(&report.checkpoint_id).await.unwrap().unwrap();
        assert_eq!(cp.error_count, 5);
        // the rolling log keeps the newest entries only
        let log = cp.errors();
        assert_eq!(log.len(), 3);
        assert_eq!(log.last().unwrap().step, "2019-02");
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let (store, _tmp) = setup_store().await;
        let fake = FakeAdapter::new("imf-ifs");
        fake.transient_failures.store(2, Ordering::SeqCst);
        let runner = runner_with(store, Arc::new(fake));

        let report = runner
            .backfill_chunk("imf-ifs", "imf-cpi", 2018, ChunkGranularity::Year)
            .await
            .unwrap();
        assert_eq!(report.errors, 0);
        assert_eq!(report.inserted, 12);
    }

    /// Counts whole-year requests
    struct YearAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for YearAdapter {
        fn source_id(&self) -> &str {
            "imf-ifs"
        }

        async fn fetch(&self, _product: &Product, year: i32) -> Result<FetchBatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchBatch {
                observations: (1..=12)
                    .map(|m| FetchedObservation::new(d(year, m, 15), Some(m as f64)))
                    .collect(),
                raw: Some(format!("year-{}", year)),
                url: None,
            })
        }
    }

    #[tokio::test]
    async fn test_daily_steps_share_one_year_request() {
        let (store, _tmp) = setup_store().await;
        let adapter = Arc::new(YearAdapter {
            calls: AtomicUsize::new(0),
        });
        let runner = runner_with(store.clone(), adapter.clone());

        let report = runner
            .backfill_chunk("imf-ifs", "imf-cpi", 2020, ChunkGranularity::Day)
            .await
            .unwrap();
        assert_eq!(report.status, CheckpointStatus::Completed);
        assert_eq!(report.steps_processed, 366);
        assert_eq!(report.inserted, 12);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);

        // each observation is attributed to the day step it falls in
        let runs = store.list_fetch_runs(&report.checkpoint_id).await.unwrap();
        let with_data: Vec<_> = runs
            .iter()
            .filter(|r| r.observation_count > 0)
            .map(|r| r.step_label.as_str())
            .collect();
        assert_eq!(with_data.len(), 12);
        assert!(with_data.contains(&"2020-02-15"));
    }

    /// SQLite checkpoints whose reads start failing after `fail_from` calls
    struct FailingReads {
        inner: SqliteStore,
        reads: AtomicUsize,
        fail_from: usize,
    }

    #[async_trait]
    impl CheckpointRepository for FailingReads {
        async fn get_checkpoint(&self, id: &str) -> Result<Option<Checkpoint>> {
            if self.reads.fetch_add(1, Ordering::SeqCst) >= self.fail_from {
                return Err(Error::Database(sqlx::Error::PoolClosed));
            }
            self.inner.get_checkpoint(id).await
        }

        async fn list_checkpoints(&self, status: Option<CheckpointStatus>) -> Result<Vec<Checkpoint>> {
            self.inner.list_checkpoints(status).await
        }

        async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
            self.inner.save_checkpoint(checkpoint).await
        }

        async fn set_checkpoint_status(&self, id: &str, status: CheckpointStatus) -> Result<()> {
            self.inner.set_checkpoint_status(id, status).await
        }

        async fn pause_checkpoint(&self, id: &str) -> Result<bool> {
            self.inner.pause_checkpoint(id).await
        }

        async fn finish_checkpoint(&self, id: &str, status: CheckpointStatus) -> Result<bool> {
            self.inner.finish_checkpoint(id, status).await
        }

        async fn commit_step(&self, step: &StepCommit) -> Result<StepOutcome> {
            self.inner.commit_step(step).await
        }

        async fn list_fetch_runs(&self, checkpoint_id: &str) -> Result<Vec<FetchRun>> {
            self.inner.list_fetch_runs(checkpoint_id).await
        }
    }

    #[tokio::test]
    async fn test_storage_error_between_steps_fails_checkpoint() {
        let tmp = TempDir::new().unwrap();
        let inner = SqliteStore::open(&tmp.path().join("test.db")).await.unwrap();
        // the existing-checkpoint lookup and the first pause check succeed
        let store = Arc::new(FailingReads {
            inner,
            reads: AtomicUsize::new(0),
            fail_from: 2,
        });
        let registry = Arc::new(SourceRegistry::builtin().unwrap());
        let mut adapters = AdapterSet::new();
        adapters.insert(Arc::new(FakeAdapter::new("imf-ifs")));
        let runner = BackfillRunner::new(store.clone(), registry, adapters, settings()).with_current_year(2026);

        let result = runner
            .backfill_chunk("imf-ifs", "imf-cpi", 2021, ChunkGranularity::Month)
            .await;
        assert!(matches!(result, Err(Error::Database(_))));

        let id = Checkpoint::key_id("imf-ifs", "imf-cpi", "2021");
        let cp = store.inner.get_checkpoint(&id).await.unwrap().unwrap();
        assert_eq!(cp.status, CheckpointStatus::Failed);
        assert_eq!(cp.processed_steps, 1);
    }

    /// Blocks inside the first fetch until released
    struct GatedAdapter {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl SourceAdapter for GatedAdapter {
        fn source_id(&self) -> &str {
            "imf-ifs"
        }

        async fn fetch(&self, _product: &Product, year: i32) -> Result<FetchBatch> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(FetchBatch {
                observations: vec![FetchedObservation::new(d(year, 12, 1), Some(1.0))],
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_pause_and_single_flight() {
        let (store, _tmp) = setup_store().await;
        let gated = Arc::new(GatedAdapter {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let runner = Arc::new(runner_with(store.clone(), gated.clone()));

        let background = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                runner
                    .backfill_chunk("imf-ifs", "imf-cpi", 2024, ChunkGranularity::Month)
                    .await
            })
        };
        gated.entered.notified().await;

        // a second runner on the same key is rejected
        let busy = runner
            .backfill_chunk("imf-ifs", "imf-cpi", 2024, ChunkGranularity::Month)
            .await;
        assert!(matches!(busy, Err(Error::CheckpointBusy(_))));

        // operator pause while the December step is in flight
        let id = Checkpoint::key_id("imf-ifs", "imf-cpi", "2024");
        assert!(store.pause_checkpoint(&id).await.unwrap());
        gated.release.notify_one();

        let report = background.await.unwrap().unwrap();
        assert!(report.paused);
        assert_eq!(report.status, CheckpointStatus::Paused);
        assert_eq!(report.steps_processed, 1);

        let cp = store.get_checkpoint(&id).await.unwrap().unwrap();
        assert_eq!(cp.status, CheckpointStatus::Paused);
        assert_eq!(cp.last_position, Some(d(2024, 12, 1)));
    }

    #[tokio::test]
    async fn test_unavailable_and_completed_years_are_skipped() {
        let (store, _tmp) = setup_store().await;
        let runner = runner_with(store, Arc::new(FakeAdapter::new("cby-aden")));

        // cby-aden-reserves is available from 2016
        let first = runner
            .backfill_range("cby-aden", "cby-aden-reserves", 2014, 2017, RangeOptions::default())
            .await
            .unwrap();
        assert_eq!(first.unavailable_years, vec![2015, 2014]);
        assert_eq!(first.chunks.len(), 2);

        let second = runner
            .backfill_range("cby-aden", "cby-aden-reserves", 2014, 2017, RangeOptions::default())
            .await
            .unwrap();
        assert_eq!(second.skipped_completed, vec![2017, 2016]);
        assert!(second.chunks.is_empty());

        let unavailable = runner
            .backfill_chunk("cby-aden", "cby-aden-reserves", 2010, ChunkGranularity::Year)
            .await;
        assert!(matches!(unavailable, Err(Error::ProductUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_backfill_many_runs_jobs() {
        let (store, _tmp) = setup_store().await;
        let runner = runner_with(store, Arc::new(FakeAdapter::new("imf-ifs")));
        let jobs = vec![
            BackfillJob {
                source_id: "imf-ifs".into(),
                product_id: "imf-cpi".into(),
                start_year: 2020,
                end_year: 2021,
            },
            BackfillJob {
                source_id: "imf-ifs".into(),
                product_id: "imf-reserves".into(),
                start_year: 2020,
                end_year: 2021,
            },
            BackfillJob {
                source_id: "wb-wdi".into(),
                product_id: "wb-gdp".into(),
                start_year: 2020,
                end_year: 2020,
            },
        ];
        let outcomes = runner.backfill_many(jobs, RangeOptions::default(), None).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.iter().filter(|o| o.report.is_some()).count(), 2);
        // no adapter registered for wb-wdi in this runner
        assert!(outcomes
            .iter()
            .any(|o| o.error.as_deref().is_some_and(|e| e.contains("No adapter"))));
    }

    /// World Bank style response for whatever year is requested
    struct WorldBankResponder;

    impl Respond for WorldBankResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let year = request
                .url
                .query_pairs()
                .find(|(k, _)| k == "date")
                .map(|(_, v)| v.to_string())
                .unwrap_or_default();
            ResponseTemplate::new(200).set_body_json(json!([
                {"page": 1, "pages": 1, "per_page": 1000, "total": 1},
                [{"date": year, "value": 20000000000.0}]
            ]))
        }
    }

    #[tokio::test]
    async fn test_end_to_end_world_bank_gdp() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/country/YE/indicator/NY\.GDP\.MKTP\.CD$"))
            .respond_with(WorldBankResponder)
            .mount(&server)
            .await;

        let (store, _tmp) = setup_store().await;
        let registry = SourceRegistry::builtin().unwrap();
        let mut source = registry.get_source("wb-wdi").unwrap().clone();
        source.base_url = Some(server.uri());
        let client = build_client(&Config::default().http).unwrap();
        let adapter =
            WorldBankAdapter::new(source, client, SourcePacer::unlimited(), "YE").unwrap();
        let runner = runner_with(store.clone(), Arc::new(adapter));

        let report = runner
            .backfill_range("wb-wdi", "wb-gdp", 2026, 2020, RangeOptions::default())
            .await
            .unwrap();

        let years: Vec<_> = report.chunks.iter().map(|c| c.chunk.clone()).collect();
        assert_eq!(
            years,
            vec!["2026", "2025", "2024", "2023", "2022", "2021", "2020"]
        );
        for chunk in &report.chunks {
            assert_eq!(chunk.status, CheckpointStatus::Completed);
            assert_eq!(chunk.errors, 0);
        }
        assert_eq!(store.list_checkpoints(None).await.unwrap().len(), 7);

        let mapper = CoverageMapper::new(store.clone(), Arc::new(registry), Default::default());
        let stats = mapper.quick_stats().await.unwrap();
        assert_eq!(stats.total_observations, 7);
        assert_eq!(stats.indicators, 1);
        assert_eq!(stats.latest_date, Some(d(2026, 12, 31)));
    }
}
