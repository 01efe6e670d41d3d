//! Status command implementation

use crate::config::Config;
use crate::error::Result;
use crate::registry::{RegistryStats, SourceRegistry};
use crate::store::{
    CheckpointRepository, ContradictionRepository, GapTicketRepository, ObservationRepository,
    ObservationStats, SqliteStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// System status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub registry_path: String,
    pub registry: RegistryStats,
    pub lint_errors: usize,
    pub lint_warnings: usize,
    pub observations: ObservationStats,
    pub checkpoints: BTreeMap<String, usize>,
    pub open_contradictions: usize,
    pub open_tickets: usize,
}

/// Get system status
pub async fn cmd_status(
    config: &Config,
    store: &SqliteStore,
    registry: &SourceRegistry,
) -> Result<StatusInfo> {
    info!("Getting status");

    let mut checkpoints = BTreeMap::new();
    for cp in store.list_checkpoints(None).await? {
        *checkpoints.entry(cp.status.to_string()).or_insert(0) += 1;
    }

    let open_contradictions = store
        .list_contradictions(None)
        .await?
        .iter()
        .filter(|c| c.status.is_open())
        .count();

    let open_tickets = store
        .list_tickets(None)
        .await?
        .iter()
        .filter(|t| t.status.is_open())
        .count();

    let lint = registry.lint_report();
    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        registry_path: config.paths.registry_file.display().to_string(),
        registry: registry.stats(),
        lint_errors: lint.errors.len(),
        lint_warnings: lint.warnings.len(),
        observations: store.observation_stats().await?,
        checkpoints,
        open_contradictions,
        open_tickets,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 Backfill Engine Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("Registry: {}", status.registry_path);

    println!("\nSources:");
    println!(
        "  {} total, {} active, {} ready, {} products",
        status.registry.total_sources,
        status.registry.active_sources,
        status.registry.ready_sources,
        status.registry.total_products
    );
    let lint = if status.lint_errors == 0 {
        format!("✓ clean ({} warnings)", status.lint_warnings)
    } else {
        format!(
            "✗ {} errors, {} warnings (run 'backfill lint')",
            status.lint_errors, status.lint_warnings
        )
    };
    println!("  Lint: {}", lint);

    let obs = &status.observations;
    println!("\nObservations:");
    println!("  Total: {} ({} null)", obs.total_observations, obs.null_values);
    println!("  Indicators: {}, Sources: {}", obs.indicators, obs.sources);
    if let (Some(first), Some(last)) = (obs.earliest_date, obs.latest_date) {
        println!("  Range: {} .. {}", first, last);
    }

    println!("\nCheckpoints:");
    if status.checkpoints.is_empty() {
        println!("  none");
    }
    for (state, count) in &status.checkpoints {
        println!("  {}: {}", state, count);
    }

    println!("\nOpen contradictions: {}", status.open_contradictions);
    println!("Open gap tickets: {}", status.open_tickets);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::ChunkGranularity;
    use crate::store::{Checkpoint, CheckpointStatus};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_status_counts() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        let store = SqliteStore::open(&config.paths.db_file).await.unwrap();
        let registry = SourceRegistry::builtin().unwrap();

        let mut cp = Checkpoint::new(
            "wb-wdi",
            "wb-gdp",
            "2020",
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 12, 31).unwrap(),
            ChunkGranularity::Year,
            1,
        );
        cp.status = CheckpointStatus::Completed;
        store.save_checkpoint(&cp).await.unwrap();

        let status = cmd_status(&config, &store, &registry).await.unwrap();
        assert_eq!(status.registry.total_sources, 8);
        assert_eq!(status.checkpoints.get("completed"), Some(&1));
        assert_eq!(status.observations.total_observations, 0);
        assert_eq!(status.open_tickets, 0);
    }
}
