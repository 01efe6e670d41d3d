//! Persistent state
//!
//! Row types for observations, checkpoints, contradictions, gap tickets,
//! fetch runs and raw payloads, plus one narrow repository trait per entity.
//! [`SqliteStore`] implements all of them.

mod schema;
pub mod sqlite;

pub use schema::SCHEMA_SQL;
pub use sqlite::SqliteStore;

use crate::calendar::ChunkGranularity;
use crate::error::{Error, Result};
use crate::models::{Frequency, RegimeTag};
use crate::registry::Product;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace for stable checkpoint ids
const CHECKPOINT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a0e_4b7d_4c55_9a1e_03d2_b8c4_7e10);

// ===== Status enums =====

/// Checkpoint lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Running => "running",
            CheckpointStatus::Paused => "paused",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(CheckpointStatus::Running),
            "paused" => Ok(CheckpointStatus::Paused),
            "completed" => Ok(CheckpointStatus::Completed),
            "failed" => Ok(CheckpointStatus::Failed),
            _ => Err(Error::Config(format!("Unknown checkpoint status: {}", s))),
        }
    }
}

/// Outcome of a single adapter call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FetchRunStatus {
    Success,
    Empty,
    Failed,
}

impl std::fmt::Display for FetchRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchRunStatus::Success => write!(f, "success"),
            FetchRunStatus::Empty => write!(f, "empty"),
            FetchRunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Contradiction workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContradictionStatus {
    Detected,
    Investigating,
    Explained,
    Resolved,
    AcceptedVariance,
}

impl ContradictionStatus {
    pub const ALL: [ContradictionStatus; 5] = [
        ContradictionStatus::Detected,
        ContradictionStatus::Investigating,
        ContradictionStatus::Explained,
        ContradictionStatus::Resolved,
        ContradictionStatus::AcceptedVariance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContradictionStatus::Detected => "detected",
            ContradictionStatus::Investigating => "investigating",
            ContradictionStatus::Explained => "explained",
            ContradictionStatus::Resolved => "resolved",
            ContradictionStatus::AcceptedVariance => "accepted_variance",
        }
    }

    /// Still awaiting an operator decision
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ContradictionStatus::Detected | ContradictionStatus::Investigating
        )
    }
}

impl std::fmt::Display for ContradictionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContradictionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "detected" => Ok(ContradictionStatus::Detected),
            "investigating" => Ok(ContradictionStatus::Investigating),
            "explained" => Ok(ContradictionStatus::Explained),
            "resolved" => Ok(ContradictionStatus::Resolved),
            "accepted_variance" | "accepted" => Ok(ContradictionStatus::AcceptedVariance),
            _ => Err(Error::Config(format!("Unknown contradiction status: {}", s))),
        }
    }
}

/// Severity of a disagreement between two sources
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DiscrepancyClass {
    Normal,
    Major,
    Critical,
}

impl std::fmt::Display for DiscrepancyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscrepancyClass::Normal => write!(f, "normal"),
            DiscrepancyClass::Major => write!(f, "major"),
            DiscrepancyClass::Critical => write!(f, "critical"),
        }
    }
}

/// Gap ticket lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, TicketStatus::Open | TicketStatus::InProgress)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketStatus::Open => write!(f, "open"),
            TicketStatus::InProgress => write!(f, "in_progress"),
            TicketStatus::Resolved => write!(f, "resolved"),
            TicketStatus::Closed => write!(f, "closed"),
        }
    }
}

impl FromStr for TicketStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            _ => Err(Error::Config(format!("Unknown ticket status: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketPriority::Low => write!(f, "low"),
            TicketPriority::Medium => write!(f, "medium"),
            TicketPriority::High => write!(f, "high"),
        }
    }
}

// ===== Rows =====

/// A stored data point. Never updated after insert.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub indicator_code: String,
    pub date: NaiveDate,
    pub value: Option<f64>,
    pub unit: String,
    pub frequency: Frequency,
    pub regime_tag: RegimeTag,
    pub source_id: String,
    pub product_id: String,
    pub fetch_run_id: Option<String>,
    pub payload_hash: Option<String>,
    pub inserted_at: String,
}

impl Observation {
    /// An observation of `product` carrying the product's indicator code,
    /// unit, frequency and regime
    pub fn new(product: &Product, date: NaiveDate, value: Option<f64>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            indicator_code: product.indicator_code().to_string(),
            date,
            value,
            unit: product.unit.clone(),
            frequency: product.frequency,
            regime_tag: product.regime,
            source_id: product.source_id.clone(),
            product_id: product.id.clone(),
            fetch_run_id: None,
            payload_hash: None,
            inserted_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_provenance(mut self, fetch_run_id: &str, payload_hash: Option<&str>) -> Self {
        self.fetch_run_id = Some(fetch_run_id.to_string());
        self.payload_hash = payload_hash.map(str::to_string);
        self
    }
}

/// One entry of a checkpoint's rolling error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointError {
    pub step: String,
    pub message: String,
    pub at: String,
}

/// Resumable progress of one (source, product, chunk) unit of work
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub source_id: String,
    pub product_id: String,
    pub chunk_label: String,
    pub chunk_start: NaiveDate,
    pub chunk_end: NaiveDate,
    pub granularity: ChunkGranularity,
    /// Start date of the most recently committed step
    pub last_position: Option<NaiveDate>,
    pub total_steps: i64,
    pub processed_steps: i64,
    pub inserted: i64,
    pub skipped: i64,
    pub error_count: i64,
    pub errors_json: Option<String>,
    pub status: CheckpointStatus,
    pub started_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl Checkpoint {
    pub fn new(
        source_id: &str,
        product_id: &str,
        chunk_label: &str,
        chunk_start: NaiveDate,
        chunk_end: NaiveDate,
        granularity: ChunkGranularity,
        total_steps: i64,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Self::key_id(source_id, product_id, chunk_label),
            source_id: source_id.to_string(),
            product_id: product_id.to_string(),
            chunk_label: chunk_label.to_string(),
            chunk_start,
            chunk_end,
            granularity,
            last_position: None,
            total_steps,
            processed_steps: 0,
            inserted: 0,
            skipped: 0,
            error_count: 0,
            errors_json: None,
            status: CheckpointStatus::Running,
            started_at: now.clone(),
            updated_at: now,
            completed_at: None,
        }
    }

    /// Stable id of the (source, product, chunk) key
    pub fn key_id(source_id: &str, product_id: &str, chunk_label: &str) -> String {
        let key = format!("{}\u{1f}{}\u{1f}{}", source_id, product_id, chunk_label);
        Uuid::new_v5(&CHECKPOINT_NAMESPACE, key.as_bytes()).to_string()
    }

    pub fn errors(&self) -> Vec<CheckpointError> {
        self.errors_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }

    /// Whether a rerun should pick up after `last_position`
    pub fn is_resumable(&self) -> bool {
        matches!(
            self.status,
            CheckpointStatus::Running | CheckpointStatus::Paused
        ) && self.processed_steps > 0
    }
}

/// Append `entry` to a JSON error log, keeping the newest `limit` entries
pub fn push_error_log(
    errors_json: Option<&str>,
    entry: CheckpointError,
    limit: usize,
) -> Result<String> {
    let mut errors: Vec<CheckpointError> = errors_json
        .and_then(|j| serde_json::from_str(j).ok())
        .unwrap_or_default();
    errors.push(entry);
    if errors.len() > limit {
        let excess = errors.len() - limit;
        errors.drain(..excess);
    }
    Ok(serde_json::to_string(&errors)?)
}

/// Record of one adapter call
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FetchRun {
    pub id: String,
    pub source_id: String,
    pub product_id: String,
    pub checkpoint_id: Option<String>,
    pub step_label: String,
    pub url: Option<String>,
    pub status: FetchRunStatus,
    pub observation_count: i64,
    pub payload_hash: Option<String>,
    pub error: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl FetchRun {
    pub fn new(source_id: &str, product_id: &str, checkpoint_id: Option<&str>, step_label: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            product_id: product_id.to_string(),
            checkpoint_id: checkpoint_id.map(str::to_string),
            step_label: step_label.to_string(),
            url: None,
            status: FetchRunStatus::Success,
            observation_count: 0,
            payload_hash: None,
            error: None,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
        }
    }
}

/// Response body kept for provenance
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RawPayload {
    pub hash: String,
    pub body: String,
    pub byte_size: i64,
    pub first_seen_at: String,
}

impl RawPayload {
    pub fn new(body: String) -> Self {
        Self {
            hash: blake3::hash(body.as_bytes()).to_hex().to_string(),
            byte_size: body.len() as i64,
            body,
            first_seen_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Everything one backfill step writes, committed atomically
#[derive(Debug, Clone)]
pub struct StepCommit {
    pub checkpoint_id: String,
    /// Start date of the step; becomes the checkpoint's last position
    pub position: NaiveDate,
    pub fetch_run: FetchRun,
    pub payload: Option<RawPayload>,
    pub observations: Vec<Observation>,
    pub error: Option<CheckpointError>,
    pub error_log_limit: usize,
}

/// Insert counts of a committed step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub inserted: u64,
    pub skipped: u64,
}

/// A recorded disagreement between two sources
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contradiction {
    pub id: String,
    pub indicator_code: String,
    pub date: NaiveDate,
    pub regime_tag: RegimeTag,
    pub source_a: String,
    pub source_b: String,
    pub observation_a: String,
    pub observation_b: String,
    pub value_a: f64,
    pub value_b: f64,
    pub variance_percent: f64,
    pub discrepancy_class: DiscrepancyClass,
    pub status: ContradictionStatus,
    pub resolution_note: Option<String>,
    pub resolved_by: Option<String>,
    pub chosen_observation: Option<String>,
    pub detected_at: String,
    pub updated_at: String,
    pub resolved_at: Option<String>,
}

/// Result of recording a detected contradiction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Already closed by an operator; left untouched
    Unchanged,
}

/// An operator decision on a contradiction
#[derive(Debug, Clone)]
pub struct ContradictionUpdate {
    pub status: ContradictionStatus,
    pub note: Option<String>,
    pub resolver: Option<String>,
    pub chosen_observation: Option<String>,
}

/// Remediation record for a stale series
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GapTicket {
    pub id: String,
    pub series_id: String,
    pub source_id: String,
    pub indicator_code: String,
    pub regime_tag: RegimeTag,
    pub missing_item: String,
    pub why_it_matters: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub created_by: String,
    pub created_at: String,
    pub resolved_at: Option<String>,
    pub resolution_note: Option<String>,
}

/// Observation query
#[derive(Debug, Clone, Default)]
pub struct ObservationFilter {
    pub indicator_code: Option<String>,
    pub regime_tag: Option<RegimeTag>,
    pub source_id: Option<String>,
    pub product_id: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub non_null_only: bool,
}

/// Summary of the observation store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationStats {
    pub total_observations: i64,
    pub null_values: i64,
    pub indicators: i64,
    pub sources: i64,
    pub earliest_date: Option<NaiveDate>,
    pub latest_date: Option<NaiveDate>,
    pub by_regime: Vec<(RegimeTag, i64)>,
}

// ===== Repositories =====

#[async_trait]
pub trait ObservationRepository: Send + Sync {
    /// Insert unless the natural key exists. Returns whether a row was written.
    async fn insert_observation(&self, observation: &Observation) -> Result<bool>;

    async fn get_observation(&self, id: &str) -> Result<Option<Observation>>;

    /// Matching observations ordered by indicator, regime, date, source
    async fn list_observations(&self, filter: &ObservationFilter) -> Result<Vec<Observation>>;

    /// Distinct dates observed for a series, null values included
    async fn observed_dates(
        &self,
        indicator_code: &str,
        regime: RegimeTag,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>>;

    /// Date of the most recent observation of a product
    async fn latest_observation_date(&self, product_id: &str) -> Result<Option<NaiveDate>>;

    async fn observation_stats(&self) -> Result<ObservationStats>;
}

#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn get_checkpoint(&self, id: &str) -> Result<Option<Checkpoint>>;

    /// Checkpoints, most recently updated first
    async fn list_checkpoints(&self, status: Option<CheckpointStatus>) -> Result<Vec<Checkpoint>>;

    /// Insert or fully replace a checkpoint row
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn set_checkpoint_status(&self, id: &str, status: CheckpointStatus) -> Result<()>;

    /// Pause a running checkpoint. Returns false when it was not running.
    async fn pause_checkpoint(&self, id: &str) -> Result<bool>;

    /// Move a running checkpoint to a terminal status. Returns false when the
    /// checkpoint was no longer running (an operator paused it).
    async fn finish_checkpoint(&self, id: &str, status: CheckpointStatus) -> Result<bool>;

    /// Write the fetch run, payload, observations and checkpoint progress of
    /// one step in a single transaction
    async fn commit_step(&self, step: &StepCommit) -> Result<StepOutcome>;

    async fn list_fetch_runs(&self, checkpoint_id: &str) -> Result<Vec<FetchRun>>;
}

#[async_trait]
pub trait ContradictionRepository: Send + Sync {
    /// Insert a new contradiction or refresh the values of an open one
    async fn upsert_contradiction(&self, contradiction: &Contradiction) -> Result<UpsertOutcome>;

    async fn get_contradiction(&self, id: &str) -> Result<Option<Contradiction>>;

    /// Contradictions, largest variance first
    async fn list_contradictions(
        &self,
        status: Option<ContradictionStatus>,
    ) -> Result<Vec<Contradiction>>;

    async fn update_contradiction(&self, id: &str, update: &ContradictionUpdate) -> Result<()>;
}

#[async_trait]
pub trait GapTicketRepository: Send + Sync {
    /// Open a ticket unless the series already has one open. Returns whether
    /// a ticket was created.
    async fn open_ticket(&self, ticket: &GapTicket) -> Result<bool>;

    async fn open_ticket_for_series(&self, series_id: &str) -> Result<Option<GapTicket>>;

    async fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<GapTicket>>;

    /// Close every open ticket of a series; returns how many were closed
    async fn close_tickets_for_series(&self, series_id: &str, note: &str) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_id_is_stable() {
        let a = Checkpoint::key_id("wb-wdi", "wb-gdp", "2024");
        let b = Checkpoint::key_id("wb-wdi", "wb-gdp", "2024");
        let c = Checkpoint::key_id("wb-wdi", "wb-gdp", "2023");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_error_log_is_bounded() {
        let mut json: Option<String> = None;
        for i in 0..5 {
            let entry = CheckpointError {
                step: format!("step-{}", i),
                message: "boom".into(),
                at: Utc::now().to_rfc3339(),
            };
            json = Some(push_error_log(json.as_deref(), entry, 3).unwrap());
        }
        let errors: Vec<CheckpointError> = serde_json::from_str(json.as_deref().unwrap()).unwrap();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].step, "step-2");
        assert_eq!(errors[2].step, "step-4");
    }

    #[test]
    fn test_payload_hash() {
        let a = RawPayload::new("{\"x\":1}".into());
        let b = RawPayload::new("{\"x\":1}".into());
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.byte_size, 7);
    }

    #[test]
    fn test_open_statuses() {
        assert!(ContradictionStatus::Detected.is_open());
        assert!(ContradictionStatus::Investigating.is_open());
        assert!(!ContradictionStatus::AcceptedVariance.is_open());
        assert_eq!(
            "accepted_variance".parse::<ContradictionStatus>().unwrap(),
            ContradictionStatus::AcceptedVariance
        );
    }
}
