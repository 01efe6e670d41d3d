//! Cross-source contradiction detection
//!
//! Observations sharing (indicator, date, regime) but coming from different
//! sources are compared pairwise. A variance above the detection threshold is
//! recorded with both values kept verbatim; nothing is averaged or dropped.
//! Records only move forward through explicit operator decisions.

use crate::config::ContradictionConfig;
use crate::error::{Error, Result};
use crate::models::RegimeTag;
use crate::store::{
    Contradiction, ContradictionRepository, ContradictionStatus, ContradictionUpdate,
    DiscrepancyClass, Observation, ObservationFilter, ObservationRepository, UpsertOutcome,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// `|a - b| / min(|a|, |b|) * 100`.
///
/// A zero on one side against a non-zero value counts as 100%.
pub fn variance_percent(a: f64, b: f64) -> f64 {
    let base = a.abs().min(b.abs());
    let diff = (a - b).abs();
    if diff == 0.0 {
        0.0
    } else if base == 0.0 {
        100.0
    } else {
        diff / base * 100.0
    }
}

/// Which records a scan considers
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub regime: Option<RegimeTag>,
    pub indicator_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub observations_scanned: usize,
    /// (indicator, date, regime) groups with more than one source
    pub groups_compared: usize,
    pub pairs_compared: usize,
    pub created: usize,
    pub updated: usize,
    /// Pairs above threshold whose record an operator already closed
    pub unchanged: usize,
}

impl ScanReport {
    pub fn detected(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContradictionStats {
    pub total: usize,
    pub open: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_class: BTreeMap<String, usize>,
    pub by_indicator: BTreeMap<String, usize>,
    pub average_variance_percent: f64,
}

pub struct ContradictionDetector<S> {
    store: Arc<S>,
    config: ContradictionConfig,
}

impl<S> ContradictionDetector<S>
where
    S: ObservationRepository + ContradictionRepository,
{
    pub fn new(store: Arc<S>, config: ContradictionConfig) -> Self {
        Self { store, config }
    }

    /// Class of a variance; everything at or under the detection threshold
    /// is normal and never recorded
    pub fn classify(&self, variance: f64) -> DiscrepancyClass {
        if variance > self.config.critical_threshold_percent {
            DiscrepancyClass::Critical
        } else if variance > self.config.variance_threshold_percent {
            DiscrepancyClass::Major
        } else {
            DiscrepancyClass::Normal
        }
    }

    pub async fn scan(&self, filter: &ScanFilter) -> Result<ScanReport> {
        let observations = self
            .store
            .list_observations(&ObservationFilter {
                indicator_code: filter.indicator_code.clone(),
                regime_tag: filter.regime,
                start: filter.start,
                end: filter.end,
                non_null_only: true,
                ..Default::default()
            })
            .await?;

        let mut report = ScanReport {
            observations_scanned: observations.len(),
            ..Default::default()
        };

        let mut groups: BTreeMap<(String, NaiveDate, RegimeTag), Vec<&Observation>> =
            BTreeMap::new();
        for obs in &observations {
            groups
                .entry((obs.indicator_code.clone(), obs.date, obs.regime_tag))
                .or_default()
                .push(obs);
        }

        for group in groups.values().filter(|g| g.len() > 1) {
            report.groups_compared += 1;
            for (i, a) in group.iter().enumerate() {
                for b in &group[i + 1..] {
                    if a.source_id == b.source_id {
                        continue;
                    }
                    report.pairs_compared += 1;
                    let Some(record) = self.compare(a, b) else {
                        continue;
                    };
                    match self.store.upsert_contradiction(&record).await? {
                        UpsertOutcome::Created => {
                            info!(
                                indicator = %record.indicator_code,
                                date = %record.date,
                                regime = %record.regime_tag,
                                variance = record.variance_percent,
                                "Contradiction detected between {} and {}",
                                record.source_a,
                                record.source_b
                            );
                            report.created += 1;
                        }
                        UpsertOutcome::Updated => report.updated += 1,
                        UpsertOutcome::Unchanged => report.unchanged += 1,
                    }
                }
            }
        }

        debug!(
            scanned = report.observations_scanned,
            pairs = report.pairs_compared,
            created = report.created,
            "Contradiction scan finished"
        );
        Ok(report)
    }

    /// A record for the pair when it disagrees beyond the threshold
    fn compare(&self, a: &Observation, b: &Observation) -> Option<Contradiction> {
        let (va, vb) = (a.value?, b.value?);
        let variance = variance_percent(va, vb);
        let class = self.classify(variance);
        if class == DiscrepancyClass::Normal {
            return None;
        }

        // one record per unordered source pair
        let (a, b, va, vb) = if a.source_id <= b.source_id {
            (a, b, va, vb)
        } else {
            (b, a, vb, va)
        };
        let now = Utc::now().to_rfc3339();
        Some(Contradiction {
            id: Uuid::new_v4().to_string(),
            indicator_code: a.indicator_code.clone(),
            date: a.date,
            regime_tag: a.regime_tag,
            source_a: a.source_id.clone(),
            source_b: b.source_id.clone(),
            observation_a: a.id.clone(),
            observation_b: b.id.clone(),
            value_a: va,
            value_b: vb,
            variance_percent: (variance * 100.0).round() / 100.0,
            discrepancy_class: class,
            status: ContradictionStatus::Detected,
            resolution_note: None,
            resolved_by: None,
            chosen_observation: None,
            detected_at: now.clone(),
            updated_at: now,
            resolved_at: None,
        })
    }

    async fn require(&self, id: &str) -> Result<Contradiction> {
        self.store
            .get_contradiction(id)
            .await?
            .ok_or_else(|| Error::ContradictionNotFound(id.to_string()))
    }

    async fn transition(
        &self,
        id: &str,
        allowed_from: &[ContradictionStatus],
        update: ContradictionUpdate,
    ) -> Result<Contradiction> {
        let current = self.require(id).await?;
        if !allowed_from.contains(&current.status) {
            return Err(Error::InvalidTransition(format!(
                "{} -> {} for contradiction {}",
                current.status, update.status, id
            )));
        }
        self.store.update_contradiction(id, &update).await?;
        info!(contradiction = id, status = %update.status, "Contradiction updated");
        self.require(id).await
    }

    pub async fn mark_investigating(&self, id: &str, investigator: Option<&str>) -> Result<Contradiction> {
        self.transition(
            id,
            &[ContradictionStatus::Detected],
            ContradictionUpdate {
                status: ContradictionStatus::Investigating,
                note: None,
                resolver: investigator.map(str::to_string),
                chosen_observation: None,
            },
        )
        .await
    }

    /// Close with an explanation (methodology, revision, definitional gap)
    pub async fn explain(&self, id: &str, explanation: &str, resolver: &str) -> Result<Contradiction> {
        self.transition(
            id,
            &[ContradictionStatus::Detected, ContradictionStatus::Investigating],
            ContradictionUpdate {
                status: ContradictionStatus::Explained,
                note: Some(explanation.to_string()),
                resolver: Some(resolver.to_string()),
                chosen_observation: None,
            },
        )
        .await
    }

    /// Close by choosing one of the two observations
    pub async fn resolve_contradiction(
        &self,
        id: &str,
        chosen_observation: &str,
        resolver: &str,
        note: Option<&str>,
    ) -> Result<Contradiction> {
        let current = self.require(id).await?;
        if chosen_observation != current.observation_a && chosen_observation != current.observation_b {
            return Err(Error::InvalidTransition(format!(
                "observation {} is not part of contradiction {}",
                chosen_observation, id
            )));
        }
        self.transition(
            id,
            &[ContradictionStatus::Detected, ContradictionStatus::Investigating],
            ContradictionUpdate {
                status: ContradictionStatus::Resolved,
                note: note.map(str::to_string),
                resolver: Some(resolver.to_string()),
                chosen_observation: Some(chosen_observation.to_string()),
            },
        )
        .await
    }

    /// Close keeping both values as valid
    pub async fn accept_variance(&self, id: &str, reason: &str, resolver: &str) -> Result<Contradiction> {
        self.transition(
            id,
            &[ContradictionStatus::Detected, ContradictionStatus::Investigating],
            ContradictionUpdate {
                status: ContradictionStatus::AcceptedVariance,
                note: Some(reason.to_string()),
                resolver: Some(resolver.to_string()),
                chosen_observation: None,
            },
        )
        .await
    }

    /// Open records, largest variance first
    pub async fn unresolved(&self) -> Result<Vec<Contradiction>> {
        let all = self.store.list_contradictions(None).await?;
        Ok(all.into_iter().filter(|c| c.status.is_open()).collect())
    }

    pub async fn statistics(&self) -> Result<ContradictionStats> {
        let all = self.store.list_contradictions(None).await?;
        let mut stats = ContradictionStats {
            total: all.len(),
            ..Default::default()
        };
        for status in ContradictionStatus::ALL {
            stats.by_status.insert(status.to_string(), 0);
        }

        let mut variance_sum = 0.0;
        for c in &all {
            *stats.by_status.entry(c.status.to_string()).or_default() += 1;
            *stats.by_class.entry(c.discrepancy_class.to_string()).or_default() += 1;
            *stats.by_indicator.entry(c.indicator_code.clone()).or_default() += 1;
            if c.status.is_open() {
                stats.open += 1;
            }
            variance_sum += c.variance_percent;
        }
        if !all.is_empty() {
            stats.average_variance_percent = variance_sum / all.len() as f64;
        }
        Ok(stats)
    }
}
