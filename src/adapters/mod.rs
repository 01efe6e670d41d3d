//! Source adapters
//!
//! Each adapter turns one external API (or a drop directory) into
//! [`FetchedObservation`]s for a product and year. Adapters pace themselves
//! against the source's hourly budget; an empty result is a normal outcome,
//! distinct from a fetch failure.

pub mod file_drop;
pub mod http;
pub mod imf_sdmx;
pub mod ocha_fts;
mod pacing;
pub mod unhcr;
pub mod wfp_vam;
pub mod world_bank;

pub use file_drop::FileDropAdapter;
pub use imf_sdmx::ImfSdmxAdapter;
pub use ocha_fts::OchaFtsAdapter;
pub use pacing::SourcePacer;
pub use unhcr::UnhcrAdapter;
pub use wfp_vam::WfpVamAdapter;
pub use world_bank::WorldBankAdapter;

use crate::calendar::{period_of, year_end, year_start};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::Frequency;
use crate::registry::{AdapterKind, Product, Source, SourceRegistry};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// A data point as returned by a source, before provenance is attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedObservation {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

impl FetchedObservation {
    pub fn new(date: NaiveDate, value: Option<f64>) -> Self {
        Self { date, value }
    }
}

/// Result of one adapter call
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub observations: Vec<FetchedObservation>,
    /// Response body as received
    pub raw: Option<String>,
    /// Request URL (or drop file path)
    pub url: Option<String>,
}

impl FetchBatch {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Keep only observations dated within `[start, end]`
    pub fn retain_range(&mut self, start: NaiveDate, end: NaiveDate) {
        self.observations
            .retain(|o| o.date >= start && o.date <= end);
    }
}

/// Outcome of a connectivity probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityReport {
    pub source_id: String,
    pub product_id: String,
    pub year: i32,
    pub ok: bool,
    pub observations: usize,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Uniform contract over external sources
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry id of the source this adapter serves
    fn source_id(&self) -> &str;

    /// Observations of `product` for calendar `year`
    async fn fetch(&self, product: &Product, year: i32) -> Result<FetchBatch>;

    /// Whether `fetch_period` is a filtered whole-year fetch. Sub-year steps
    /// of one chunk can then share a single year request.
    fn slices_years(&self) -> bool {
        true
    }

    /// Observations dated within `[start, end]`.
    ///
    /// The default fetches each calendar year touched and filters.
    async fn fetch_period(
        &self,
        product: &Product,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchBatch> {
        let mut merged = FetchBatch::default();
        let mut bodies = Vec::new();
        let mut urls = Vec::new();

        for year in start.year()..=end.year() {
            let batch = self.fetch(product, year).await?;
            merged.observations.extend(batch.observations);
            bodies.extend(batch.raw);
            urls.extend(batch.url);
        }

        merged.retain_range(start, end);
        merged.raw = (!bodies.is_empty()).then(|| bodies.join("\n"));
        merged.url = (!urls.is_empty()).then(|| urls.join(" "));
        Ok(merged)
    }

    /// Lightweight health check against one product/year
    async fn test_connectivity(&self, product: &Product, year: i32) -> ConnectivityReport {
        let started = Instant::now();
        let result = self.fetch(product, year).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (ok, observations, error) = match result {
            Ok(batch) => (true, batch.observations.len(), None),
            Err(e) => (false, 0, Some(e.to_string())),
        };

        ConnectivityReport {
            source_id: self.source_id().to_string(),
            product_id: product.id.clone(),
            year,
            ok,
            observations,
            latency_ms,
            error,
        }
    }
}

/// Source id → adapter
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source_id().to_string(), adapter);
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(source_id).cloned()
    }

    /// Like [`get`](Self::get) but an error when absent
    pub fn require(&self, source_id: &str) -> Result<Arc<dyn SourceAdapter>> {
        self.get(source_id)
            .ok_or_else(|| Error::NoAdapter(source_id.to_string()))
    }

    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// One adapter per registry source that names (or implies) one
    pub fn from_registry(registry: &SourceRegistry, config: &Config) -> Result<Self> {
        let client = http::build_client(&config.http)?;
        let mut set = Self::new();

        for source in registry.list_sources() {
            let Some(kind) = source.adapter_kind() else {
                debug!(source = %source.id, "No adapter for source");
                continue;
            };
            match build_adapter(kind, source, &client, config) {
                Ok(adapter) => set.insert(adapter),
                Err(e) => warn!(source = %source.id, "Adapter unavailable: {}", e),
            }
        }

        Ok(set)
    }
}

fn build_adapter(
    kind: AdapterKind,
    source: &Source,
    client: &reqwest::Client,
    config: &Config,
) -> Result<Arc<dyn SourceAdapter>> {
    let pacer = SourcePacer::per_hour(source.rate_limit_per_hour);
    let country = &config.adapters;

    let adapter: Arc<dyn SourceAdapter> = match kind {
        AdapterKind::WorldBank => Arc::new(WorldBankAdapter::new(
            source.clone(),
            client.clone(),
            pacer,
            &country.country_iso2,
        )?),
        AdapterKind::ImfSdmx => Arc::new(ImfSdmxAdapter::new(
            source.clone(),
            client.clone(),
            pacer,
            &country.country_iso2,
        )?),
        AdapterKind::Unhcr => Arc::new(UnhcrAdapter::new(
            source.clone(),
            client.clone(),
            pacer,
            &country.country_iso3,
        )?),
        AdapterKind::OchaFts => Arc::new(OchaFtsAdapter::new(
            source.clone(),
            client.clone(),
            pacer,
            &country.country_iso3,
        )?),
        AdapterKind::WfpVam => Arc::new(WfpVamAdapter::new(
            source.clone(),
            client.clone(),
            pacer,
            &country.country_name,
        )?),
        AdapterKind::FileDrop => Arc::new(FileDropAdapter::new(
            &source.id,
            config.paths.drops_dir.clone(),
        )),
    };
    Ok(adapter)
}

/// Base URL of an HTTP source
pub(crate) fn base_url(source: &Source) -> Result<String> {
    source
        .base_url
        .clone()
        .ok_or_else(|| Error::Registry(format!("{} has no url", source.id)))
}

/// API code of a product, required by the HTTP adapters
pub(crate) fn external_code(product: &Product) -> Result<&str> {
    product
        .external_code
        .as_deref()
        .ok_or_else(|| Error::Registry(format!("{} has no external_code", product.id)))
}

/// Date stamp of an annual value
pub(crate) fn annual_date(year: i32) -> Result<NaiveDate> {
    year_end(year).ok_or_else(|| Error::Parse(format!("invalid year {}", year)))
}

/// Aggregate dated values into one observation per native-frequency period,
/// restricted to `year`. Each bucket is dated at the first day of its period
/// that falls inside the year, so a week straddling January 1 stays in the
/// year's chunk.
pub(crate) fn aggregate_by_period(
    values: impl IntoIterator<Item = (NaiveDate, f64)>,
    frequency: Frequency,
    year: i32,
    mode: Aggregate,
) -> Vec<FetchedObservation> {
    let mut buckets: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    let (lo, hi) = (year_start(year), year_end(year));

    for (date, value) in values {
        if lo.map(|lo| date < lo).unwrap_or(false) || hi.map(|hi| date > hi).unwrap_or(false) {
            continue;
        }
        let mut start = period_of(date, frequency).start;
        if let Some(lo) = lo {
            start = start.max(lo);
        }
        let entry = buckets.entry(start).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(date, (sum, count))| {
            let value = match mode {
                Aggregate::Sum => sum,
                Aggregate::Mean => sum / count as f64,
            };
            FetchedObservation::new(date, Some(value))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Aggregate {
    Sum,
    Mean,
}

/// Parse the date prefix of an ISO date or datetime string
pub(crate) fn parse_date_prefix(s: &str) -> Option<NaiveDate> {
    s.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    struct MonthlyFake {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for MonthlyFake {
        fn source_id(&self) -> &str {
            "fake"
        }

        async fn fetch(&self, _product: &Product, year: i32) -> Result<FetchBatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchBatch {
                observations: (1..=12)
                    .map(|m| FetchedObservation::new(d(year, m, 1), Some(m as f64)))
                    .collect(),
                raw: Some(format!("{}", year)),
                url: None,
            })
        }
    }

    fn product() -> Product {
        SourceRegistry::builtin()
            .unwrap()
            .get_product("imf-cpi")
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_fetch_period_filters() {
        let fake = MonthlyFake {
            calls: AtomicUsize::new(0),
        };
        let batch = fake
            .fetch_period(&product(), d(2023, 11, 1), d(2024, 2, 29))
            .await
            .unwrap();
        let months: Vec<_> = batch.observations.iter().map(|o| o.date).collect();
        assert_eq!(
            months,
            vec![d(2023, 11, 1), d(2023, 12, 1), d(2024, 1, 1), d(2024, 2, 1)]
        );
        assert_eq!(fake.calls.load(Ordering::SeqCst), 2);
        assert_eq!(batch.raw.as_deref(), Some("2023\n2024"));
    }

    #[tokio::test]
    async fn test_connectivity_report() {
        let fake = MonthlyFake {
            calls: AtomicUsize::new(0),
        };
        let report = fake.test_connectivity(&product(), 2024).await;
        assert!(report.ok);
        assert_eq!(report.observations, 12);
        assert!(report.error.is_none());
    }

    #[test]
    fn test_aggregate_by_period() {
        let values = vec![
            (d(2023, 1, 5), 10.0),
            (d(2023, 1, 20), 30.0),
            (d(2023, 2, 1), 5.0),
            (d(2022, 12, 31), 99.0),
        ];
        let sums = aggregate_by_period(values.clone(), Frequency::Monthly, 2023, Aggregate::Sum);
        assert_eq!(sums.len(), 2);
        assert_eq!(sums[0], FetchedObservation::new(d(2023, 1, 1), Some(40.0)));

        let means = aggregate_by_period(values, Frequency::Monthly, 2023, Aggregate::Mean);
        assert_eq!(means[0].value, Some(20.0));
    }

    #[test]
    fn test_weekly_bucket_stays_in_year() {
        // 2023-01-01 is a Sunday; its ISO week starts 2022-12-26
        let values = vec![(d(2023, 1, 1), 5.0), (d(2023, 1, 2), 7.0), (d(2023, 1, 8), 1.0)];
        let mut batch = FetchBatch {
            observations: aggregate_by_period(values, Frequency::Weekly, 2023, Aggregate::Sum),
            ..Default::default()
        };
        batch.retain_range(d(2023, 1, 1), d(2023, 12, 31));
        assert_eq!(
            batch.observations,
            vec![
                FetchedObservation::new(d(2023, 1, 1), Some(5.0)),
                FetchedObservation::new(d(2023, 1, 2), Some(8.0)),
            ]
        );
    }

    #[test]
    fn test_registry_adapters() {
        let registry = SourceRegistry::builtin().unwrap();
        let set = AdapterSet::from_registry(&registry, &Config::default()).unwrap();
        let ids = set.source_ids();
        assert!(ids.contains(&"wb-wdi".to_string()));
        assert!(ids.contains(&"cby-aden".to_string()));
        // hdx-hapi names no adapter
        assert!(set.get("hdx-hapi").is_none());
        assert!(matches!(set.require("hdx-hapi"), Err(Error::NoAdapter(_))));
    }
}
