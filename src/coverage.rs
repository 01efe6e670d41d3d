//! Coverage map
//!
//! For every (indicator, regime) series in the registry: how many expected
//! periods between the availability start and today actually hold an
//! observation, and which contiguous runs are missing. Series roll up by
//! sector and by regime with the worst-covered series ranked as gap drivers.

use crate::calendar::{periods, Period};
use crate::config::CoverageConfig;
use crate::error::{Error, Result};
use crate::models::{Frequency, RegimeTag};
use crate::registry::{Product, SourceRegistry};
use crate::store::ObservationRepository;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Timeline a series is measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageBasis {
    /// One expected period per native-frequency period
    Native,
    /// One expected period per calendar day, whatever the frequency
    Daily,
}

impl std::fmt::Display for CoverageBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoverageBasis::Native => write!(f, "native"),
            CoverageBasis::Daily => write!(f, "daily"),
        }
    }
}

impl FromStr for CoverageBasis {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "native" => Ok(CoverageBasis::Native),
            "daily" => Ok(CoverageBasis::Daily),
            _ => Err(Error::Config(format!("Unknown coverage basis: {}", s))),
        }
    }
}

/// A maximal run of expected periods without any observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub periods: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageEntry {
    pub indicator_code: String,
    pub regime_tag: RegimeTag,
    pub sector: String,
    pub frequency: Frequency,
    pub basis: CoverageBasis,
    pub products: Vec<String>,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub earliest_observed: Option<NaiveDate>,
    pub latest_observed: Option<NaiveDate>,
    pub total_expected_periods: usize,
    pub observed_periods: usize,
    pub missing_periods: usize,
    pub coverage_percent: f64,
    pub missing_ranges: Vec<MissingRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapDriver {
    pub indicator_code: String,
    pub regime_tag: RegimeTag,
    pub coverage_percent: f64,
    pub missing_periods: usize,
}

/// Aggregate over the series of one sector or one regime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageRollup {
    pub key: String,
    pub series: usize,
    pub average_coverage_percent: f64,
    pub gap_drivers: Vec<GapDriver>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageMap {
    pub generated_at: String,
    pub basis: CoverageBasis,
    pub entries: Vec<CoverageEntry>,
    pub overall_coverage_percent: f64,
    pub by_sector: Vec<CoverageRollup>,
    pub by_regime: Vec<CoverageRollup>,
}

#[derive(Debug, Clone, Default)]
pub struct CoverageFilter {
    pub sector: Option<String>,
    pub regime: Option<RegimeTag>,
    pub min_coverage: Option<f64>,
    pub max_coverage: Option<f64>,
    /// Overrides the start of every series window
    pub start: Option<NaiveDate>,
    /// Overrides the end of every series window
    pub end: Option<NaiveDate>,
}

/// Store summary for dashboards
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuickStats {
    pub total_observations: i64,
    pub null_values: i64,
    pub indicators: i64,
    pub sources: i64,
    pub earliest_date: Option<NaiveDate>,
    pub latest_date: Option<NaiveDate>,
    pub by_regime: Vec<(RegimeTag, i64)>,
    pub tracked_series: usize,
}

/// Covered periods and missing runs of `expected` given observed dates
pub fn measure(expected: &[Period], observed: &[NaiveDate]) -> (usize, Vec<MissingRange>) {
    let observed: BTreeSet<NaiveDate> = observed.iter().copied().collect();
    let mut covered = 0;
    let mut ranges: Vec<MissingRange> = Vec::new();
    let mut open: Option<MissingRange> = None;

    for period in expected {
        let hit = observed.range(period.start..=period.end).next().is_some();
        if hit {
            covered += 1;
            ranges.extend(open.take());
            continue;
        }
        match open.as_mut() {
            Some(run) => {
                run.end = period.end;
                run.periods += 1;
            }
            None => {
                open = Some(MissingRange {
                    start: period.start,
                    end: period.end,
                    periods: 1,
                })
            }
        }
    }
    ranges.extend(open);
    (covered, ranges)
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Products sharing an (indicator, regime) series
struct Series<'a> {
    indicator_code: String,
    regime: RegimeTag,
    products: Vec<&'a Product>,
}

impl Series<'_> {
    /// Finest native frequency among the products
    fn frequency(&self) -> Frequency {
        self.products
            .iter()
            .map(|p| p.frequency)
            .min()
            .unwrap_or(Frequency::Annual)
    }

    fn sector(&self) -> String {
        self.products
            .iter()
            .find_map(|p| p.sector.clone())
            .unwrap_or_else(|| "unclassified".to_string())
    }

    fn available_from(&self) -> Option<NaiveDate> {
        self.products.iter().map(|p| p.available_from).min()
    }

    /// None when any product is still published
    fn available_to(&self) -> Option<NaiveDate> {
        if self.products.iter().any(|p| p.available_to.is_none()) {
            return None;
        }
        self.products.iter().filter_map(|p| p.available_to).max()
    }
}

pub struct CoverageMapper<S> {
    store: Arc<S>,
    registry: Arc<SourceRegistry>,
    config: CoverageConfig,
    today: NaiveDate,
}

impl<S: ObservationRepository> CoverageMapper<S> {
    pub fn new(store: Arc<S>, registry: Arc<SourceRegistry>, config: CoverageConfig) -> Self {
        Self {
            store,
            registry,
            config,
            today: Utc::now().date_naive(),
        }
    }

    /// Fix the date that closes open windows
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    fn series(&self, filter: &CoverageFilter) -> Vec<Series<'_>> {
        let mut grouped: BTreeMap<(String, RegimeTag), Vec<&Product>> = BTreeMap::new();
        for product in self.registry.list_products() {
            if filter.regime.is_some_and(|r| r != product.regime) {
                continue;
            }
            grouped
                .entry((product.indicator_code().to_string(), product.regime))
                .or_default()
                .push(product);
        }

        grouped
            .into_iter()
            .map(|((indicator_code, regime), products)| Series {
                indicator_code,
                regime,
                products,
            })
            .filter(|s| filter.sector.as_ref().map_or(true, |sector| &s.sector() == sector))
            .collect()
    }

    /// Coverage of one series over `[start, end]`
    pub async fn series_coverage(
        &self,
        indicator_code: &str,
        regime: RegimeTag,
        frequency: Frequency,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CoverageEntry> {
        let timeline = match self.config.basis {
            CoverageBasis::Native => frequency,
            CoverageBasis::Daily => Frequency::Daily,
        };
        let expected = periods(start, end, timeline);
        let observed = if start <= end {
            self.store
                .observed_dates(indicator_code, regime, start, end)
                .await?
        } else {
            Vec::new()
        };
        let (covered, missing_ranges) = measure(&expected, &observed);

        Ok(CoverageEntry {
            indicator_code: indicator_code.to_string(),
            regime_tag: regime,
            sector: String::new(),
            frequency,
            basis: self.config.basis,
            products: Vec::new(),
            window_start: start,
            window_end: end,
            earliest_observed: observed.iter().min().copied(),
            latest_observed: observed.iter().max().copied(),
            total_expected_periods: expected.len(),
            observed_periods: covered,
            missing_periods: expected.len() - covered,
            coverage_percent: percent(covered, expected.len()),
            missing_ranges,
        })
    }

    pub async fn coverage_map(&self, filter: &CoverageFilter) -> Result<CoverageMap> {
        let floor = NaiveDate::from_ymd_opt(self.config.start_year, 1, 1).unwrap_or(NaiveDate::MIN);
        let mut entries = Vec::new();

        for series in self.series(filter) {
            let Some(available_from) = series.available_from() else {
                continue;
            };
            let start = filter.start.unwrap_or_else(|| available_from.max(floor));
            let end = filter.end.unwrap_or_else(|| match series.available_to() {
                Some(to) => to.min(self.today),
                None => self.today,
            });

            let mut entry = self
                .series_coverage(&series.indicator_code, series.regime, series.frequency(), start, end)
                .await?;
            entry.sector = series.sector();
            entry.products = series.products.iter().map(|p| p.id.clone()).collect();

            if filter.min_coverage.is_some_and(|min| entry.coverage_percent < min)
                || filter.max_coverage.is_some_and(|max| entry.coverage_percent > max)
            {
                continue;
            }
            entries.push(entry);
        }

        let overall = average(entries.iter().map(|e| e.coverage_percent));
        let by_sector = self.rollup(&entries, |e| e.sector.clone());
        let by_regime = self.rollup(&entries, |e| e.regime_tag.to_string());
        debug!(series = entries.len(), overall, "Coverage map built");

        Ok(CoverageMap {
            generated_at: Utc::now().to_rfc3339(),
            basis: self.config.basis,
            entries,
            overall_coverage_percent: overall,
            by_sector,
            by_regime,
        })
    }

    fn rollup<F>(&self, entries: &[CoverageEntry], key: F) -> Vec<CoverageRollup>
    where
        F: Fn(&CoverageEntry) -> String,
    {
        let mut groups: BTreeMap<String, Vec<&CoverageEntry>> = BTreeMap::new();
        for entry in entries {
            groups.entry(key(entry)).or_default().push(entry);
        }

        groups
            .into_iter()
            .map(|(key, members)| {
                let mut drivers: Vec<GapDriver> = members
                    .iter()
                    .filter(|e| e.missing_periods > 0)
                    .map(|e| GapDriver {
                        indicator_code: e.indicator_code.clone(),
                        regime_tag: e.regime_tag,
                        coverage_percent: e.coverage_percent,
                        missing_periods: e.missing_periods,
                    })
                    .collect();
                drivers.sort_by(|a, b| {
                    a.coverage_percent
                        .total_cmp(&b.coverage_percent)
                        .then(b.missing_periods.cmp(&a.missing_periods))
                });
                drivers.truncate(self.config.gap_driver_limit);

                CoverageRollup {
                    key,
                    series: members.len(),
                    average_coverage_percent: average(members.iter().map(|e| e.coverage_percent)),
                    gap_drivers: drivers,
                }
            })
            .collect()
    }

    pub async fn quick_stats(&self) -> Result<QuickStats> {
        let stats = self.store.observation_stats().await?;
        Ok(QuickStats {
            total_observations: stats.total_observations,
            null_values: stats.null_values,
            indicators: stats.indicators,
            sources: stats.sources,
            earliest_date: stats.earliest_date,
            latest_date: stats.latest_date,
            by_regime: stats.by_regime,
            tracked_series: self.series(&CoverageFilter::default()).len(),
        })
    }
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Observation, SqliteStore};
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    async fn setup(basis: CoverageBasis) -> (CoverageMapper<SqliteStore>, Arc<SqliteStore>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(&tmp.path().join("test.db")).await.unwrap());
        let registry = Arc::new(SourceRegistry::builtin().unwrap());
        let config = CoverageConfig {
            basis,
            ..Default::default()
        };
        let mapper = CoverageMapper::new(store.clone(), registry, config).with_today(d(2024, 12, 31));
        (mapper, store, tmp)
    }

    async fn insert(store: &SqliteStore, product_id: &str, dates: &[NaiveDate]) {
        let registry = SourceRegistry::builtin().unwrap();
        let product = registry.get_product(product_id).unwrap();
        for date in dates {
            store
                .insert_observation(&Observation::new(product, *date, Some(1.0)))
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_measure_ranges() {
        let expected = periods(d(2023, 1, 1), d(2023, 12, 31), Frequency::Monthly);
        let observed = [d(2023, 1, 1), d(2023, 2, 14), d(2023, 5, 31)];
        let (covered, ranges) = measure(&expected, &observed);
        assert_eq!(covered, 3);
        assert_eq!(
            ranges,
            vec![
                MissingRange {
                    start: d(2023, 3, 1),
                    end: d(2023, 4, 30),
                    periods: 2
                },
                MissingRange {
                    start: d(2023, 6, 1),
                    end: d(2023, 12, 31),
                    periods: 7
                },
            ]
        );
        let missing: usize = ranges.iter().map(|r| r.periods).sum();
        assert_eq!(covered + missing, expected.len());
    }

    #[tokio::test]
    async fn test_native_arithmetic() {
        let (mapper, store, _tmp) = setup(CoverageBasis::Native).await;
        insert(&store, "imf-cpi", &[d(2023, 1, 1), d(2023, 2, 1), d(2023, 5, 1)]).await;

        let entry = mapper
            .series_coverage(
                "imf-cpi",
                RegimeTag::International,
                Frequency::Monthly,
                d(2023, 1, 1),
                d(2023, 12, 31),
            )
            .await
            .unwrap();
        assert_eq!(entry.total_expected_periods, 12);
        assert_eq!(entry.observed_periods, 3);
        assert_eq!(
            entry.observed_periods + entry.missing_periods,
            entry.total_expected_periods
        );
        assert!((entry.coverage_percent - 25.0).abs() < 1e-9);
        assert_eq!(entry.earliest_observed, Some(d(2023, 1, 1)));
        assert_eq!(entry.latest_observed, Some(d(2023, 5, 1)));
    }

    #[tokio::test]
    async fn test_daily_basis_for_annual_series() {
        let (mapper, store, _tmp) = setup(CoverageBasis::Daily).await;
        insert(&store, "wb-gdp", &[d(2023, 12, 31)]).await;

        let entry = mapper
            .series_coverage(
                "wb-gdp",
                RegimeTag::International,
                Frequency::Annual,
                d(2023, 1, 1),
                d(2023, 12, 31),
            )
            .await
            .unwrap();
        assert_eq!(entry.total_expected_periods, 365);
        assert_eq!(entry.observed_periods, 1);
        assert!(entry.coverage_percent < 1.0);
    }

    #[tokio::test]
    async fn test_map_filters_and_rollups() {
        let (mapper, store, _tmp) = setup(CoverageBasis::Native).await;
        let annual: Vec<NaiveDate> = (2010..=2024).map(|y| d(y, 12, 31)).collect();
        insert(&store, "wb-gdp", &annual).await;

        let map = mapper.coverage_map(&CoverageFilter::default()).await.unwrap();
        let gdp = map
            .entries
            .iter()
            .find(|e| e.products.contains(&"wb-gdp".to_string()))
            .unwrap();
        assert_eq!(gdp.total_expected_periods, 15);
        assert!((gdp.coverage_percent - 100.0).abs() < 1e-9);
        assert!(map.by_regime.iter().any(|r| r.key == "international"));
        for rollup in &map.by_sector {
            assert!(rollup.gap_drivers.len() <= 5);
            assert!(rollup
                .gap_drivers
                .windows(2)
                .all(|w| w[0].coverage_percent <= w[1].coverage_percent));
        }

        let full = mapper
            .coverage_map(&CoverageFilter {
                min_coverage: Some(99.0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(full.entries.len(), 1);

        let aden = mapper
            .coverage_map(&CoverageFilter {
                regime: Some(RegimeTag::AdenIrg),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!aden.entries.is_empty());
        assert!(aden.entries.iter().all(|e| e.regime_tag == RegimeTag::AdenIrg));
        assert!(aden.entries.iter().all(|e| e.observed_periods == 0));
    }

    #[tokio::test]
    async fn test_regime_isolation() {
        let (mapper, store, _tmp) = setup(CoverageBasis::Native).await;
        // same indicator code under both authorities
        insert(&store, "cby-sanaa-exchange-rate", &[d(2024, 6, 1)]).await;

        let registry = SourceRegistry::builtin().unwrap();
        let aden = registry.get_product("cby-aden-exchange-rate").unwrap();
        let entry = mapper
            .series_coverage(
                aden.indicator_code(),
                RegimeTag::AdenIrg,
                aden.frequency,
                d(2024, 1, 1),
                d(2024, 12, 31),
            )
            .await
            .unwrap();
        assert_eq!(entry.observed_periods, 0);
    }

    #[tokio::test]
    async fn test_quick_stats() {
        let (mapper, store, _tmp) = setup(CoverageBasis::Native).await;
        insert(&store, "imf-cpi", &[d(2022, 1, 1), d(2022, 2, 1)]).await;
        let stats = mapper.quick_stats().await.unwrap();
        assert_eq!(stats.total_observations, 2);
        assert_eq!(stats.indicators, 1);
        assert!(stats.tracked_series > 0);
    }
}
