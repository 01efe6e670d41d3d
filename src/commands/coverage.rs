//! Coverage command implementation

use crate::config::Config;
use crate::coverage::{CoverageBasis, CoverageFilter, CoverageMap, CoverageMapper, QuickStats};
use crate::error::Result;
use crate::registry::SourceRegistry;
use crate::store::SqliteStore;
use std::sync::Arc;

fn mapper(
    config: &Config,
    store: Arc<SqliteStore>,
    registry: Arc<SourceRegistry>,
    basis: Option<CoverageBasis>,
) -> CoverageMapper<SqliteStore> {
    let mut coverage = config.coverage.clone();
    if let Some(basis) = basis {
        coverage.basis = basis;
    }
    CoverageMapper::new(store, registry, coverage)
}

pub async fn cmd_coverage(
    config: &Config,
    store: Arc<SqliteStore>,
    registry: Arc<SourceRegistry>,
    filter: &CoverageFilter,
    basis: Option<CoverageBasis>,
) -> Result<CoverageMap> {
    mapper(config, store, registry, basis).coverage_map(filter).await
}

pub async fn cmd_coverage_quick(
    config: &Config,
    store: Arc<SqliteStore>,
    registry: Arc<SourceRegistry>,
) -> Result<QuickStats> {
    mapper(config, store, registry, None).quick_stats().await
}

pub fn print_coverage(map: &CoverageMap, show_ranges: bool) {
    println!("\n🗺️  Coverage Map ({} basis)\n", map.basis);

    if map.entries.is_empty() {
        println!("No series match the filter.");
        return;
    }

    for entry in &map.entries {
        let marker = if entry.coverage_percent >= 90.0 {
            "✓"
        } else if entry.coverage_percent >= 50.0 {
            "⚠"
        } else {
            "✗"
        };
        println!(
            "{} {} [{}] {:.1}% ({}/{} {} periods)",
            marker,
            entry.indicator_code,
            entry.regime_tag,
            entry.coverage_percent,
            entry.observed_periods,
            entry.total_expected_periods,
            entry.frequency
        );
        if show_ranges {
            for range in &entry.missing_ranges {
                println!("    missing {} .. {} ({} periods)", range.start, range.end, range.periods);
            }
        }
    }

    println!("\nOverall: {:.1}%", map.overall_coverage_percent);

    for (title, rollups) in [("By sector", &map.by_sector), ("By regime", &map.by_regime)] {
        println!("\n{}:", title);
        for rollup in rollups {
            println!(
                "  {}: {:.1}% across {} series",
                rollup.key, rollup.average_coverage_percent, rollup.series
            );
            for driver in &rollup.gap_drivers {
                println!(
                    "    gap: {} [{}] {:.1}%, {} missing",
                    driver.indicator_code, driver.regime_tag, driver.coverage_percent, driver.missing_periods
                );
            }
        }
    }
}

pub fn print_quick_stats(stats: &QuickStats) {
    println!("\n📈 Observation Store\n");
    println!("Observations: {} ({} null)", stats.total_observations, stats.null_values);
    println!("Indicators: {}", stats.indicators);
    println!("Sources: {}", stats.sources);
    println!("Tracked series: {}", stats.tracked_series);
    if let (Some(first), Some(last)) = (stats.earliest_date, stats.latest_date) {
        println!("Range: {} .. {}", first, last);
    }
    if !stats.by_regime.is_empty() {
        println!("\nBy regime:");
        for (regime, count) in &stats.by_regime {
            println!("  {}: {}", regime, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RegimeTag;
    use crate::store::{Observation, ObservationRepository};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_regime_filter_and_quick_stats() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let store = Arc::new(SqliteStore::open(&tmp.path().join("engine.db")).await.unwrap());
        let registry = Arc::new(SourceRegistry::builtin().unwrap());

        let product = registry.get_product("cby-aden-reserves").unwrap();
        store
            .insert_observation(&Observation::new(
                product,
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
                Some(1.2e9),
            ))
            .await
            .unwrap();

        let filter = CoverageFilter {
            regime: Some(RegimeTag::AdenIrg),
            ..Default::default()
        };
        let map = cmd_coverage(&config, Arc::clone(&store), Arc::clone(&registry), &filter, None)
            .await
            .unwrap();
        assert!(!map.entries.is_empty());
        assert!(map.entries.iter().all(|e| e.regime_tag == RegimeTag::AdenIrg));
        let reserves = map
            .entries
            .iter()
            .find(|e| e.indicator_code == "fx-reserves")
            .unwrap();
        assert_eq!(reserves.observed_periods, 1);

        let stats = cmd_coverage_quick(&config, store, registry).await.unwrap();
        assert_eq!(stats.total_observations, 1);
    }
}
