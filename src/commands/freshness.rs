//! Freshness commands

use crate::config::Config;
use crate::error::Result;
use crate::freshness::{FreshnessCheck, FreshnessClass, FreshnessMonitor, FreshnessStatus, FreshnessSummary, TicketReport};
use crate::registry::SourceRegistry;
use crate::store::{GapTicket, GapTicketRepository, SqliteStore, TicketStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A freshness pass, optionally followed by ticket filing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessRun {
    pub check: FreshnessCheck,
    pub tickets: Option<TicketReport>,
}

fn monitor(
    config: &Config,
    store: Arc<SqliteStore>,
    registry: Arc<SourceRegistry>,
) -> FreshnessMonitor<SqliteStore> {
    FreshnessMonitor::new(store, registry, config.freshness.clone())
}

pub async fn cmd_freshness_check(
    config: &Config,
    store: Arc<SqliteStore>,
    registry: Arc<SourceRegistry>,
    file_tickets: bool,
) -> Result<FreshnessRun> {
    let monitor = monitor(config, store, registry);
    let check = monitor.check_freshness().await?;
    let tickets = if file_tickets {
        Some(monitor.create_gap_tickets_for_stale_series().await?)
    } else {
        None
    };
    Ok(FreshnessRun { check, tickets })
}

pub async fn cmd_freshness_summary(
    config: &Config,
    store: Arc<SqliteStore>,
    registry: Arc<SourceRegistry>,
) -> Result<FreshnessSummary> {
    monitor(config, store, registry).summary().await
}

pub async fn cmd_freshness_critical(
    config: &Config,
    store: Arc<SqliteStore>,
    registry: Arc<SourceRegistry>,
) -> Result<Vec<FreshnessStatus>> {
    monitor(config, store, registry).critical_staleness().await
}

pub async fn cmd_list_tickets(store: &SqliteStore, status: Option<TicketStatus>) -> Result<Vec<GapTicket>> {
    store.list_tickets(status).await
}

fn class_marker(class: FreshnessClass) -> &'static str {
    match class {
        FreshnessClass::Fresh => "✓",
        FreshnessClass::Warning => "⚠",
        FreshnessClass::Critical => "✗",
        FreshnessClass::Unknown => "?",
    }
}

pub fn print_freshness_summary(summary: &FreshnessSummary) {
    println!("\n⏱️  Freshness\n");
    println!("Series: {}", summary.total);
    println!("Health: {:.1}%", summary.health_percent);
    println!(
        "  fresh {} ({:.1}%), warning {} ({:.1}%), critical {} ({:.1}%), never observed {}",
        summary.fresh,
        summary.fresh_percent,
        summary.warning,
        summary.warning_percent,
        summary.critical,
        summary.critical_percent,
        summary.unknown
    );

    if !summary.most_stale.is_empty() {
        println!("\nMost stale:");
        print_statuses(&summary.most_stale);
    }
}

pub fn print_statuses(statuses: &[FreshnessStatus]) {
    for s in statuses {
        let age = match (s.days_since_update, s.last_observation) {
            (Some(days), Some(last)) => format!("{} days (last {})", days, last),
            _ => "never observed".to_string(),
        };
        println!(
            "  {} {} [{}, {}] {}",
            class_marker(s.classification),
            s.series_id,
            s.frequency,
            s.regime_tag,
            age
        );
    }
}

pub fn print_freshness_run(run: &FreshnessRun) {
    print_freshness_summary(&run.check.summary);

    if !run.check.closed_tickets.is_empty() {
        println!("\nTickets closed (fresh again): {}", run.check.closed_tickets.join(", "));
    }

    if let Some(tickets) = &run.tickets {
        println!(
            "\nGap tickets: {} opened, {} already open",
            tickets.created.len(),
            tickets.already_open
        );
        for t in &tickets.created {
            println!("  • [{}] {}", t.priority, t.missing_item);
        }
    }
}

pub fn print_tickets(tickets: &[GapTicket]) {
    println!("\n🎫 Gap Tickets\n");

    if tickets.is_empty() {
        println!("No tickets.");
        return;
    }

    for t in tickets {
        println!("• [{}] [{}] {}", t.status, t.priority, t.missing_item);
        println!("  ID: {}", t.id);
        println!("  Why: {}", t.why_it_matters);
        println!("  Opened: {} by {}", t.created_at, t.created_by);
        if let Some(note) = &t.resolution_note {
            println!("  Resolution: {}", note);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Observation, ObservationRepository};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_check_files_tickets_once() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default();
        let store = Arc::new(SqliteStore::open(&tmp.path().join("engine.db")).await.unwrap());
        let registry = Arc::new(SourceRegistry::builtin().unwrap());

        // a daily series last seen a year ago is critical
        let product = registry.get_product("cby-aden-exchange-rate").unwrap();
        let stale = Utc::now().date_naive() - Duration::days(365);
        store
            .insert_observation(&Observation::new(product, stale, Some(1500.0)))
            .await
            .unwrap();

        let first = cmd_freshness_check(&config, Arc::clone(&store), Arc::clone(&registry), true)
            .await
            .unwrap();
        let tickets = first.tickets.unwrap();
        assert_eq!(tickets.created.len(), 1);
        assert_eq!(tickets.created[0].series_id, "cby-aden-exchange-rate");

        let second = cmd_freshness_check(&config, Arc::clone(&store), Arc::clone(&registry), true)
            .await
            .unwrap();
        assert!(second.tickets.unwrap().created.is_empty());

        let open = cmd_list_tickets(&store, Some(TicketStatus::Open)).await.unwrap();
        assert_eq!(open.len(), 1);

        let critical = cmd_freshness_critical(&config, store, registry).await.unwrap();
        assert_eq!(critical.len(), 1);
    }
}
