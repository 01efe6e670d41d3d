//! Source connectivity probe

use crate::adapters::{AdapterSet, ConnectivityReport};
use crate::error::Result;
use crate::registry::SourceRegistry;
use chrono::{Datelike, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub year: i32,
    pub reports: Vec<ConnectivityReport>,
    /// Sources skipped because no adapter serves them
    pub without_adapter: Vec<String>,
}

impl ProbeReport {
    pub fn healthy(&self) -> usize {
        self.reports.iter().filter(|r| r.ok).count()
    }
}

/// Fetch one year of the first available product of each source.
///
/// Defaults to last year, the most recent year annual sources reliably
/// publish.
pub async fn cmd_probe(
    registry: &SourceRegistry,
    adapters: &AdapterSet,
    source_ids: Option<&[String]>,
    year: Option<i32>,
) -> Result<ProbeReport> {
    let current_year = Utc::now().year();
    let year = year.unwrap_or(current_year - 1);

    let mut probes = Vec::new();
    let mut without_adapter = Vec::new();

    for source in registry.list_sources() {
        if let Some(ids) = source_ids {
            if !ids.iter().any(|id| id == &source.id) {
                continue;
            }
        }

        let Some(adapter) = adapters.get(&source.id) else {
            without_adapter.push(source.id.clone());
            continue;
        };
        let Some(product) = source
            .products
            .iter()
            .find(|p| p.is_available_in(year, current_year))
            .cloned()
        else {
            debug!(source = %source.id, year, "No product available to probe");
            continue;
        };

        probes.push(async move { adapter.test_connectivity(&product, year).await });
    }

    info!(sources = probes.len(), year, "Probing sources");
    let reports = join_all(probes).await;

    Ok(ProbeReport {
        year,
        reports,
        without_adapter,
    })
}

pub fn print_probe(report: &ProbeReport) {
    println!("\n🔌 Source Connectivity ({})\n", report.year);

    for r in &report.reports {
        if r.ok {
            println!(
                "✓ {} ({}): {} observations in {}ms",
                r.source_id, r.product_id, r.observations, r.latency_ms
            );
        } else {
            println!(
                "✗ {} ({}): {}",
                r.source_id,
                r.product_id,
                r.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if !report.without_adapter.is_empty() {
        println!("\nNo adapter: {}", report.without_adapter.join(", "));
    }

    println!("\n{}/{} sources healthy", report.healthy(), report.reports.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_probe_drop_sources() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        let registry = SourceRegistry::builtin().unwrap();
        let adapters = AdapterSet::from_registry(&registry, &config).unwrap();

        let ids = vec!["cby-aden".to_string(), "hdx-hapi".to_string()];
        let report = cmd_probe(&registry, &adapters, Some(&ids), Some(2024))
            .await
            .unwrap();

        // a missing drop file reads as an empty, healthy batch
        assert_eq!(report.reports.len(), 1);
        assert!(report.reports[0].ok);
        assert_eq!(report.reports[0].observations, 0);
        assert_eq!(report.without_adapter, vec!["hdx-hapi".to_string()]);
    }
}
