//! Freshness SLA monitoring
//!
//! Every registry product is a tracked series. Its age is the number of days
//! since its latest observation, classified against the warning/critical
//! thresholds of its native frequency. Critical series get a gap ticket;
//! tickets close once fresh data lands.

use crate::config::FreshnessConfig;
use crate::error::Result;
use crate::models::{Frequency, RegimeTag};
use crate::registry::{Product, SourceRegistry};
use crate::store::{
    GapTicket, GapTicketRepository, ObservationRepository, TicketPriority, TicketStatus,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessClass {
    Fresh,
    Warning,
    Critical,
    /// Never observed
    Unknown,
}

impl std::fmt::Display for FreshnessClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FreshnessClass::Fresh => write!(f, "fresh"),
            FreshnessClass::Warning => write!(f, "warning"),
            FreshnessClass::Critical => write!(f, "critical"),
            FreshnessClass::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessStatus {
    /// Product id
    pub series_id: String,
    pub source_id: String,
    pub indicator_code: String,
    pub regime_tag: RegimeTag,
    pub frequency: Frequency,
    pub last_observation: Option<NaiveDate>,
    pub days_since_update: Option<i64>,
    pub classification: FreshnessClass,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FreshnessSummary {
    pub total: usize,
    pub fresh: usize,
    pub warning: usize,
    pub critical: usize,
    pub unknown: usize,
    /// Fresh series over all tracked series
    pub health_percent: f64,
    pub fresh_percent: f64,
    pub warning_percent: f64,
    pub critical_percent: f64,
    pub most_stale: Vec<FreshnessStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketReport {
    pub created: Vec<GapTicket>,
    /// Critical series that already had an open ticket
    pub already_open: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessCheck {
    pub checked_at: String,
    pub summary: FreshnessSummary,
    pub statuses: Vec<FreshnessStatus>,
    /// Series whose open tickets were closed because they are fresh again
    pub closed_tickets: Vec<String>,
}

/// Entries listed in the summary's most-stale ranking
const MOST_STALE_LIMIT: usize = 10;

pub struct FreshnessMonitor<S> {
    store: Arc<S>,
    registry: Arc<SourceRegistry>,
    config: FreshnessConfig,
    today: NaiveDate,
}

impl<S> FreshnessMonitor<S>
where
    S: ObservationRepository + GapTicketRepository,
{
    pub fn new(store: Arc<S>, registry: Arc<SourceRegistry>, config: FreshnessConfig) -> Self {
        Self {
            store,
            registry,
            config,
            today: Utc::now().date_naive(),
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// `days < warning` is fresh, `warning <= days < critical` is warning,
    /// anything older is critical
    pub fn classify(&self, frequency: Frequency, days: i64) -> FreshnessClass {
        let sla = self.config.threshold(frequency);
        if days >= sla.critical_days {
            FreshnessClass::Critical
        } else if days >= sla.warning_days {
            FreshnessClass::Warning
        } else {
            FreshnessClass::Fresh
        }
    }

    async fn status_of(&self, product: &Product) -> Result<FreshnessStatus> {
        let last = self.store.latest_observation_date(&product.id).await?;
        let days = last.map(|d| (self.today - d).num_days());
        let classification = match days {
            Some(days) => self.classify(product.frequency, days),
            None => FreshnessClass::Unknown,
        };

        Ok(FreshnessStatus {
            series_id: product.id.clone(),
            source_id: product.source_id.clone(),
            indicator_code: product.indicator_code().to_string(),
            regime_tag: product.regime,
            frequency: product.frequency,
            last_observation: last,
            days_since_update: days,
            classification,
        })
    }

    /// Status of every tracked series, stalest first
    pub async fn statuses(&self) -> Result<Vec<FreshnessStatus>> {
        let mut statuses = Vec::new();
        for product in self.registry.list_products() {
            statuses.push(self.status_of(product).await?);
        }
        sort_stalest_first(&mut statuses);
        Ok(statuses)
    }

    pub async fn summary(&self) -> Result<FreshnessSummary> {
        Ok(summarize(&self.statuses().await?))
    }

    /// Observed series ranked by age
    pub async fn most_stale(&self, limit: usize) -> Result<Vec<FreshnessStatus>> {
        Ok(self
            .statuses()
            .await?
            .into_iter()
            .filter(|s| s.days_since_update.is_some())
            .take(limit)
            .collect())
    }

    pub async fn critical_staleness(&self) -> Result<Vec<FreshnessStatus>> {
        Ok(self
            .statuses()
            .await?
            .into_iter()
            .filter(|s| s.classification == FreshnessClass::Critical)
            .collect())
    }

    /// File a ticket for every critical series without an open one
    pub async fn create_gap_tickets_for_stale_series(&self) -> Result<TicketReport> {
        let mut report = TicketReport::default();

        for status in self.critical_staleness().await? {
            if self
                .store
                .open_ticket_for_series(&status.series_id)
                .await?
                .is_some()
            {
                report.already_open += 1;
                continue;
            }

            let ticket = self.ticket_for(&status);
            if self.store.open_ticket(&ticket).await? {
                info!(
                    series = %status.series_id,
                    days = status.days_since_update,
                    "Gap ticket opened"
                );
                report.created.push(ticket);
            } else {
                report.already_open += 1;
            }
        }

        Ok(report)
    }

    fn ticket_for(&self, status: &FreshnessStatus) -> GapTicket {
        let sla = self.config.threshold(status.frequency);
        let days = status.days_since_update.unwrap_or_default();
        let last = status
            .last_observation
            .map(|d| d.to_string())
            .unwrap_or_else(|| "never".to_string());
        let priority = if days >= sla.critical_days * 2 {
            TicketPriority::High
        } else {
            TicketPriority::Medium
        };

        GapTicket {
            id: Uuid::new_v4().to_string(),
            series_id: status.series_id.clone(),
            source_id: status.source_id.clone(),
            indicator_code: status.indicator_code.clone(),
            regime_tag: status.regime_tag,
            missing_item: format!(
                "{} update of {} (last observation {})",
                status.frequency, status.series_id, last
            ),
            why_it_matters: format!(
                "{} days without data exceeds the {}-day critical SLA for {} series",
                days, sla.critical_days, status.frequency
            ),
            priority,
            status: TicketStatus::Open,
            created_by: self.config.ticket_actor.clone(),
            created_at: Utc::now().to_rfc3339(),
            resolved_at: None,
            resolution_note: None,
        }
    }

    /// Full pass: classify every series and close tickets of series that
    /// are fresh again
    pub async fn check_freshness(&self) -> Result<FreshnessCheck> {
        let statuses = self.statuses().await?;
        let mut closed_tickets = Vec::new();

        for status in statuses
            .iter()
            .filter(|s| s.classification == FreshnessClass::Fresh)
        {
            let note = format!(
                "fresh data landed ({})",
                status
                    .last_observation
                    .map(|d| d.to_string())
                    .unwrap_or_default()
            );
            let closed = self
                .store
                .close_tickets_for_series(&status.series_id, &note)
                .await?;
            if closed > 0 {
                info!(series = %status.series_id, "Gap ticket closed");
                closed_tickets.push(status.series_id.clone());
            }
        }

        let summary = summarize(&statuses);
        debug!(
            total = summary.total,
            critical = summary.critical,
            health = summary.health_percent,
            "Freshness check finished"
        );

        Ok(FreshnessCheck {
            checked_at: Utc::now().to_rfc3339(),
            summary,
            statuses,
            closed_tickets,
        })
    }
}

fn sort_stalest_first(statuses: &mut [FreshnessStatus]) {
    // never-observed series sort last
    statuses.sort_by(|a, b| {
        b.days_since_update
            .unwrap_or(i64::MIN)
            .cmp(&a.days_since_update.unwrap_or(i64::MIN))
            .then_with(|| a.series_id.cmp(&b.series_id))
    });
}

fn summarize(statuses: &[FreshnessStatus]) -> FreshnessSummary {
    let count = |class| {
        statuses
            .iter()
            .filter(|s| s.classification == class)
            .count()
    };
    let total = statuses.len();
    let pct = |n: usize| {
        if total == 0 {
            0.0
        } else {
            n as f64 / total as f64 * 100.0
        }
    };

    let fresh = count(FreshnessClass::Fresh);
    let warning = count(FreshnessClass::Warning);
    let critical = count(FreshnessClass::Critical);
    FreshnessSummary {
        total,
        fresh,
        warning,
        critical,
        unknown: count(FreshnessClass::Unknown),
        health_percent: pct(fresh),
        fresh_percent: pct(fresh),
        warning_percent: pct(warning),
        critical_percent: pct(critical),
        most_stale: statuses
            .iter()
            .filter(|s| s.days_since_update.is_some())
            .take(MOST_STALE_LIMIT)
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Observation, SqliteStore};
    use chrono::Duration;
    use tempfile::TempDir;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
    }

    async fn setup() -> (FreshnessMonitor<SqliteStore>, Arc<SqliteStore>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(&tmp.path().join("test.db")).await.unwrap());
        let registry = Arc::new(SourceRegistry::builtin().unwrap());
        let monitor =
            FreshnessMonitor::new(store.clone(), registry, FreshnessConfig::default()).with_today(today());
        (monitor, store, tmp)
    }

    async fn observe(store: &SqliteStore, product_id: &str, days_ago: i64) {
        let registry = SourceRegistry::builtin().unwrap();
        let product = registry.get_product(product_id).unwrap();
        let date = today() - Duration::days(days_ago);
        store
            .insert_observation(&Observation::new(product, date, Some(1.0)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_boundaries_for_every_frequency() {
        let (monitor, _store, _tmp) = setup().await;
        let table = [
            (Frequency::Daily, 2, 7),
            (Frequency::Weekly, 10, 21),
            (Frequency::Monthly, 45, 90),
            (Frequency::Quarterly, 120, 180),
            (Frequency::Annual, 400, 730),
        ];
        for (freq, warning, critical) in table {
            assert_eq!(monitor.classify(freq, 0), FreshnessClass::Fresh, "{}", freq);
            assert_eq!(monitor.classify(freq, warning - 1), FreshnessClass::Fresh, "{}", freq);
            assert_eq!(monitor.classify(freq, warning), FreshnessClass::Warning, "{}", freq);
            assert_eq!(monitor.classify(freq, critical - 1), FreshnessClass::Warning, "{}", freq);
            assert_eq!(monitor.classify(freq, critical), FreshnessClass::Critical, "{}", freq);
            assert_eq!(monitor.classify(freq, critical + 100), FreshnessClass::Critical, "{}", freq);
        }
    }

    #[tokio::test]
    async fn test_statuses_and_summary() {
        let (monitor, store, _tmp) = setup().await;
        // ocha-funding-total is daily
        observe(&store, "ocha-funding-total", 1).await;
        observe(&store, "imf-cpi", 60).await;
        observe(&store, "wb-gdp", 800).await;

        let statuses = monitor.statuses().await.unwrap();
        let by_id = |id: &str| statuses.iter().find(|s| s.series_id == id).unwrap().clone();
        assert_eq!(by_id("ocha-funding-total").classification, FreshnessClass::Fresh);
        assert_eq!(by_id("imf-cpi").classification, FreshnessClass::Warning);
        assert_eq!(by_id("wb-gdp").classification, FreshnessClass::Critical);
        assert_eq!(by_id("wb-gdp").days_since_update, Some(800));
        assert_eq!(by_id("unhcr-idps").classification, FreshnessClass::Unknown);

        let summary = monitor.summary().await.unwrap();
        assert_eq!(summary.total, 24);
        assert_eq!(summary.fresh, 1);
        assert_eq!(summary.warning, 1);
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.unknown, 21);
        assert!((summary.health_percent - 100.0 / 24.0).abs() < 1e-9);
        assert_eq!(summary.most_stale[0].series_id, "wb-gdp");
        assert_eq!(summary.most_stale.len(), 3);

        let stale = monitor.most_stale(1).await.unwrap();
        assert_eq!(stale[0].series_id, "wb-gdp");
        let critical = monitor.critical_staleness().await.unwrap();
        assert_eq!(critical.len(), 1);
    }

    #[tokio::test]
    async fn test_tickets_open_once_and_close_when_fresh() {
        let (monitor, store, _tmp) = setup().await;
        observe(&store, "imf-cpi", 100).await;
        observe(&store, "wb-gdp", 1500).await;

        let first = monitor.create_gap_tickets_for_stale_series().await.unwrap();
        assert_eq!(first.created.len(), 2);
        let gdp = first
            .created
            .iter()
            .find(|t| t.series_id == "wb-gdp")
            .unwrap();
        assert_eq!(gdp.priority, TicketPriority::High);
        assert_eq!(gdp.created_by, "freshness-monitor");

        let second = monitor.create_gap_tickets_for_stale_series().await.unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.already_open, 2);

        // fresh monthly data lands for imf-cpi
        observe(&store, "imf-cpi", 3).await;
        let check = monitor.check_freshness().await.unwrap();
        assert_eq!(check.closed_tickets, vec!["imf-cpi".to_string()]);
        assert!(store.open_ticket_for_series("imf-cpi").await.unwrap().is_none());
        assert!(store.open_ticket_for_series("wb-gdp").await.unwrap().is_some());

        let closed = store.list_tickets(Some(TicketStatus::Closed)).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert!(closed[0].resolved_at.is_some());
    }
}
