//! Contradiction commands

use crate::config::Config;
use crate::contradiction::{ContradictionDetector, ContradictionStats, ScanFilter, ScanReport};
use crate::error::Result;
use crate::store::{Contradiction, ContradictionRepository, ContradictionStatus, SqliteStore};
use std::sync::Arc;

/// An operator decision on one record
#[derive(Debug, Clone)]
pub enum Decision {
    Investigate {
        by: Option<String>,
    },
    Explain {
        explanation: String,
        by: String,
    },
    Resolve {
        chosen_observation: String,
        by: String,
        note: Option<String>,
    },
    Accept {
        reason: String,
        by: String,
    },
}

fn detector(config: &Config, store: Arc<SqliteStore>) -> ContradictionDetector<SqliteStore> {
    ContradictionDetector::new(store, config.contradiction.clone())
}

pub async fn cmd_scan_contradictions(
    config: &Config,
    store: Arc<SqliteStore>,
    filter: &ScanFilter,
) -> Result<ScanReport> {
    detector(config, store).scan(filter).await
}

pub async fn cmd_contradiction_stats(config: &Config, store: Arc<SqliteStore>) -> Result<ContradictionStats> {
    detector(config, store).statistics().await
}

/// List records; `open_only` keeps detected and investigating ones
pub async fn cmd_list_contradictions(
    store: &SqliteStore,
    status: Option<ContradictionStatus>,
    open_only: bool,
) -> Result<Vec<Contradiction>> {
    let all = store.list_contradictions(status).await?;
    Ok(if open_only {
        all.into_iter().filter(|c| c.status.is_open()).collect()
    } else {
        all
    })
}

pub async fn cmd_decide_contradiction(
    config: &Config,
    store: Arc<SqliteStore>,
    id: &str,
    decision: Decision,
) -> Result<Contradiction> {
    let detector = detector(config, store);
    match decision {
        Decision::Investigate { by } => detector.mark_investigating(id, by.as_deref()).await,
        Decision::Explain { explanation, by } => detector.explain(id, &explanation, &by).await,
        Decision::Resolve {
            chosen_observation,
            by,
            note,
        } => {
            detector
                .resolve_contradiction(id, &chosen_observation, &by, note.as_deref())
                .await
        }
        Decision::Accept { reason, by } => detector.accept_variance(id, &reason, &by).await,
    }
}

pub fn print_scan_report(report: &ScanReport) {
    println!("\n✓ Contradiction scan complete");
    println!("  Observations scanned: {}", report.observations_scanned);
    println!("  Groups compared: {}", report.groups_compared);
    println!("  Pairs compared: {}", report.pairs_compared);
    println!(
        "  Detected: {} ({} new, {} refreshed, {} already closed)",
        report.detected(),
        report.created,
        report.updated,
        report.unchanged
    );
}

pub fn print_contradictions(contradictions: &[Contradiction]) {
    println!("\n⚖️  Contradictions\n");

    if contradictions.is_empty() {
        println!("No contradictions recorded. Run 'backfill contradictions scan'.");
        return;
    }

    for c in contradictions {
        println!(
            "• {} {} [{}] {:.1}% {} [{}]",
            c.indicator_code, c.date, c.regime_tag, c.variance_percent, c.discrepancy_class, c.status
        );
        println!("  ID: {}", c.id);
        println!("  {}: {} ({})", c.source_a, c.value_a, c.observation_a);
        println!("  {}: {} ({})", c.source_b, c.value_b, c.observation_b);
        if let Some(note) = &c.resolution_note {
            println!(
                "  Note: {} ({})",
                note,
                c.resolved_by.as_deref().unwrap_or("unknown")
            );
        }
        println!();
    }
}

pub fn print_contradiction(c: &Contradiction) {
    println!("✓ Contradiction {} is now {}", c.id, c.status);
    if let Some(chosen) = &c.chosen_observation {
        println!("  Chosen observation: {}", chosen);
    }
    if let Some(note) = &c.resolution_note {
        println!("  Note: {}", note);
    }
}

pub fn print_contradiction_stats(stats: &ContradictionStats) {
    println!("\n⚖️  Contradiction Statistics\n");
    println!("Total: {} ({} open)", stats.total, stats.open);
    println!("Average variance: {:.1}%", stats.average_variance_percent);

    println!("\nBy status:");
    for (status, count) in &stats.by_status {
        println!("  {}: {}", status, count);
    }
    if !stats.by_class.is_empty() {
        println!("\nBy class:");
        for (class, count) in &stats.by_class {
            println!("  {}: {}", class, count);
        }
    }
    if !stats.by_indicator.is_empty() {
        println!("\nBy indicator:");
        for (indicator, count) in &stats.by_indicator {
            println!("  {}: {}", indicator, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{Frequency, RegimeTag};
    use crate::store::{Observation, ObservationRepository};
    use chrono::{NaiveDate, Utc};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn obs(source: &str, value: f64) -> Observation {
        Observation {
            id: Uuid::new_v4().to_string(),
            indicator_code: "fx-official-rate".into(),
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            value: Some(value),
            unit: "YER/USD".into(),
            frequency: Frequency::Daily,
            regime_tag: RegimeTag::AdenIrg,
            source_id: source.into(),
            product_id: format!("{}-fx", source),
            fetch_run_id: None,
            payload_hash: None,
            inserted_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn test_scan_then_resolve() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let store = Arc::new(SqliteStore::open(&tmp.path().join("engine.db")).await.unwrap());

        let a = obs("cby-aden", 1650.0);
        let b = obs("imf-ifs", 1400.0);
        store.insert_observation(&a).await.unwrap();
        store.insert_observation(&b).await.unwrap();

        let report = cmd_scan_contradictions(&config, Arc::clone(&store), &ScanFilter::default())
            .await
            .unwrap();
        assert_eq!(report.created, 1);

        let open = cmd_list_contradictions(&store, None, true).await.unwrap();
        assert_eq!(open.len(), 1);
        let id = open[0].id.clone();

        let resolved = cmd_decide_contradiction(
            &config,
            Arc::clone(&store),
            &id,
            Decision::Resolve {
                chosen_observation: a.id.clone(),
                by: "analyst".into(),
                note: Some("bulletin is authoritative".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(resolved.status, ContradictionStatus::Resolved);
        assert_eq!(resolved.chosen_observation.as_deref(), Some(a.id.as_str()));

        assert!(cmd_list_contradictions(&store, None, true).await.unwrap().is_empty());
        let again = cmd_decide_contradiction(
            &config,
            Arc::clone(&store),
            &id,
            Decision::Investigate { by: None },
        )
        .await;
        assert!(matches!(again, Err(Error::InvalidTransition(_))));

        let stats = cmd_contradiction_stats(&config, store).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.open, 0);
        assert_eq!(stats.by_status.get("resolved"), Some(&1));
    }
}
