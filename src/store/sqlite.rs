//! SQLite implementation of the repositories

use super::*;
use crate::config::Config;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::path::Path;
use tracing::{debug, info};

/// Engine database handle
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the database named in the configuration
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::connect_path(&config.paths.db_file).await
    }

    /// Connect to `db_path` and make sure the schema exists
    pub async fn open(db_path: &Path) -> Result<Self> {
        let store = Self::connect_path(db_path).await?;
        store.init_schema().await?;
        Ok(store)
    }

    async fn connect_path(db_path: &Path) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='observations'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(result.is_some())
    }

    /// Connect and fail with [`Error::NotInitialized`] when the schema is missing
    pub async fn connect_initialized(config: &Config) -> Result<Self> {
        let store = Self::connect(config).await?;
        if !store.is_initialized().await? {
            return Err(Error::NotInitialized);
        }
        Ok(store)
    }
}

fn parse_db_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

#[async_trait]
impl ObservationRepository for SqliteStore {
    async fn insert_observation(&self, observation: &Observation) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO observations (id, indicator_code, date, value, unit, frequency, regime_tag,
                source_id, product_id, fetch_run_id, payload_hash, inserted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(indicator_code, date, regime_tag, source_id) DO NOTHING
            "#,
        )
        .bind(&observation.id)
        .bind(&observation.indicator_code)
        .bind(observation.date)
        .bind(observation.value)
        .bind(&observation.unit)
        .bind(observation.frequency)
        .bind(observation.regime_tag)
        .bind(&observation.source_id)
        .bind(&observation.product_id)
        .bind(&observation.fetch_run_id)
        .bind(&observation.payload_hash)
        .bind(&observation.inserted_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_observation(&self, id: &str) -> Result<Option<Observation>> {
        let observation =
            sqlx::query_as::<_, Observation>("SELECT * FROM observations WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(observation)
    }

    async fn list_observations(&self, filter: &ObservationFilter) -> Result<Vec<Observation>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM observations WHERE 1=1");
        if let Some(indicator) = &filter.indicator_code {
            qb.push(" AND indicator_code = ").push_bind(indicator.clone());
        }
        if let Some(regime) = filter.regime_tag {
            qb.push(" AND regime_tag = ").push_bind(regime);
        }
        if let Some(source) = &filter.source_id {
            qb.push(" AND source_id = ").push_bind(source.clone());
        }
        if let Some(product) = &filter.product_id {
            qb.push(" AND product_id = ").push_bind(product.clone());
        }
        if let Some(start) = filter.start {
            qb.push(" AND date >= ").push_bind(start);
        }
        if let Some(end) = filter.end {
            qb.push(" AND date <= ").push_bind(end);
        }
        if filter.non_null_only {
            qb.push(" AND value IS NOT NULL");
        }
        qb.push(" ORDER BY indicator_code, regime_tag, date, source_id");

        let observations = qb
            .build_query_as::<Observation>()
            .fetch_all(&self.pool)
            .await?;
        Ok(observations)
    }

    async fn observed_dates(
        &self,
        indicator_code: &str,
        regime: RegimeTag,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        let dates: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT date FROM observations
            WHERE indicator_code = ? AND regime_tag = ? AND date >= ? AND date <= ?
            ORDER BY date
            "#,
        )
        .bind(indicator_code)
        .bind(regime)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(dates.into_iter().filter_map(|d| parse_db_date(Some(d))).collect())
    }

    async fn latest_observation_date(&self, product_id: &str) -> Result<Option<NaiveDate>> {
        let latest: Option<String> =
            sqlx::query_scalar("SELECT MAX(date) FROM observations WHERE product_id = ?")
                .bind(product_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(parse_db_date(latest))
    }

    async fn observation_stats(&self) -> Result<ObservationStats> {
        let (total, nulls, indicators, sources, earliest, latest): (
            i64,
            Option<i64>,
            i64,
            i64,
            Option<String>,
            Option<String>,
        ) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   SUM(CASE WHEN value IS NULL THEN 1 ELSE 0 END),
                   COUNT(DISTINCT indicator_code),
                   COUNT(DISTINCT source_id),
                   MIN(date),
                   MAX(date)
            FROM observations
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let by_regime: Vec<(RegimeTag, i64)> = sqlx::query_as(
            "SELECT regime_tag, COUNT(*) FROM observations GROUP BY regime_tag ORDER BY regime_tag",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ObservationStats {
            total_observations: total,
            null_values: nulls.unwrap_or(0),
            indicators,
            sources,
            earliest_date: parse_db_date(earliest),
            latest_date: parse_db_date(latest),
            by_regime,
        })
    }
}

#[async_trait]
impl CheckpointRepository for SqliteStore {
    async fn get_checkpoint(&self, id: &str) -> Result<Option<Checkpoint>> {
        let checkpoint = sqlx::query_as::<_, Checkpoint>("SELECT * FROM checkpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(checkpoint)
    }

    async fn list_checkpoints(&self, status: Option<CheckpointStatus>) -> Result<Vec<Checkpoint>> {
        let checkpoints = match status {
            Some(status) => {
                sqlx::query_as::<_, Checkpoint>(
                    "SELECT * FROM checkpoints WHERE status = ? ORDER BY updated_at DESC",
                )
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Checkpoint>("SELECT * FROM checkpoints ORDER BY updated_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(checkpoints)
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (id, source_id, product_id, chunk_label, chunk_start, chunk_end,
                granularity, last_position, total_steps, processed_steps, inserted, skipped,
                error_count, errors_json, status, started_at, updated_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                chunk_start = excluded.chunk_start,
                chunk_end = excluded.chunk_end,
                granularity = excluded.granularity,
                last_position = excluded.last_position,
                total_steps = excluded.total_steps,
                processed_steps = excluded.processed_steps,
                inserted = excluded.inserted,
                skipped = excluded.skipped,
                error_count = excluded.error_count,
                errors_json = excluded.errors_json,
                status = excluded.status,
                started_at = excluded.started_at,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.source_id)
        .bind(&checkpoint.product_id)
        .bind(&checkpoint.chunk_label)
        .bind(checkpoint.chunk_start)
        .bind(checkpoint.chunk_end)
        .bind(checkpoint.granularity)
        .bind(checkpoint.last_position)
        .bind(checkpoint.total_steps)
        .bind(checkpoint.processed_steps)
        .bind(checkpoint.inserted)
        .bind(checkpoint.skipped)
        .bind(checkpoint.error_count)
        .bind(&checkpoint.errors_json)
        .bind(checkpoint.status)
        .bind(&checkpoint.started_at)
        .bind(&checkpoint.updated_at)
        .bind(&checkpoint.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_checkpoint_status(&self, id: &str, status: CheckpointStatus) -> Result<()> {
        let result = sqlx::query("UPDATE checkpoints SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::CheckpointNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn pause_checkpoint(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE checkpoints SET status = 'paused', updated_at = ? WHERE id = ? AND status = 'running'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn finish_checkpoint(&self, id: &str, status: CheckpointStatus) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE checkpoints SET status = ?, updated_at = ?, completed_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(status)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit_step(&self, step: &StepCommit) -> Result<StepOutcome> {
        let mut tx = self.pool.begin().await?;

        if let Some(payload) = &step.payload {
            sqlx::query(
                r#"
                INSERT INTO raw_payloads (hash, body, byte_size, first_seen_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(hash) DO NOTHING
                "#,
            )
            .bind(&payload.hash)
            .bind(&payload.body)
            .bind(payload.byte_size)
            .bind(&payload.first_seen_at)
            .execute(&mut *tx)
            .await?;
        }

        let run = &step.fetch_run;
        sqlx::query(
            r#"
            INSERT INTO fetch_runs (id, source_id, product_id, checkpoint_id, step_label, url,
                status, observation_count, payload_hash, error, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.source_id)
        .bind(&run.product_id)
        .bind(&run.checkpoint_id)
        .bind(&run.step_label)
        .bind(&run.url)
        .bind(run.status)
        .bind(run.observation_count)
        .bind(&run.payload_hash)
        .bind(&run.error)
        .bind(&run.started_at)
        .bind(&run.completed_at)
        .execute(&mut *tx)
        .await?;

        let mut outcome = StepOutcome::default();
        for observation in &step.observations {
            let result = sqlx::query(
                r#"
                INSERT INTO observations (id, indicator_code, date, value, unit, frequency, regime_tag,
                    source_id, product_id, fetch_run_id, payload_hash, inserted_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(indicator_code, date, regime_tag, source_id) DO NOTHING
                "#,
            )
            .bind(&observation.id)
            .bind(&observation.indicator_code)
            .bind(observation.date)
            .bind(observation.value)
            .bind(&observation.unit)
            .bind(observation.frequency)
            .bind(observation.regime_tag)
            .bind(&observation.source_id)
            .bind(&observation.product_id)
            .bind(&observation.fetch_run_id)
            .bind(&observation.payload_hash)
            .bind(&observation.inserted_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                outcome.inserted += 1;
            } else {
                outcome.skipped += 1;
            }
        }

        let existing: Option<(Option<String>,)> =
            sqlx::query_as("SELECT errors_json FROM checkpoints WHERE id = ?")
                .bind(&step.checkpoint_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((errors_json,)) = existing else {
            return Err(Error::CheckpointNotFound(step.checkpoint_id.clone()));
        };

        let (errors_json, error_delta) = match &step.error {
            Some(entry) => (
                Some(push_error_log(
                    errors_json.as_deref(),
                    entry.clone(),
                    step.error_log_limit,
                )?),
                1i64,
            ),
            None => (errors_json, 0i64),
        };

        sqlx::query(
            r#"
            UPDATE checkpoints SET
                last_position = ?,
                processed_steps = processed_steps + 1,
                inserted = inserted + ?,
                skipped = skipped + ?,
                error_count = error_count + ?,
                errors_json = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(step.position)
        .bind(outcome.inserted as i64)
        .bind(outcome.skipped as i64)
        .bind(error_delta)
        .bind(&errors_json)
        .bind(Utc::now().to_rfc3339())
        .bind(&step.checkpoint_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn list_fetch_runs(&self, checkpoint_id: &str) -> Result<Vec<FetchRun>> {
        let runs = sqlx::query_as::<_, FetchRun>(
            "SELECT * FROM fetch_runs WHERE checkpoint_id = ? ORDER BY started_at",
        )
        .bind(checkpoint_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }
}

#[async_trait]
impl ContradictionRepository for SqliteStore {
    async fn upsert_contradiction(&self, c: &Contradiction) -> Result<UpsertOutcome> {
        let existing: Option<(String, ContradictionStatus)> = sqlx::query_as(
            r#"
            SELECT id, status FROM contradictions
            WHERE indicator_code = ? AND date = ? AND regime_tag = ? AND source_a = ? AND source_b = ?
            "#,
        )
        .bind(&c.indicator_code)
        .bind(c.date)
        .bind(c.regime_tag)
        .bind(&c.source_a)
        .bind(&c.source_b)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO contradictions (id, indicator_code, date, regime_tag, source_a, source_b,
                        observation_a, observation_b, value_a, value_b, variance_percent,
                        discrepancy_class, status, resolution_note, resolved_by, chosen_observation,
                        detected_at, updated_at, resolved_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&c.id)
                .bind(&c.indicator_code)
                .bind(c.date)
                .bind(c.regime_tag)
                .bind(&c.source_a)
                .bind(&c.source_b)
                .bind(&c.observation_a)
                .bind(&c.observation_b)
                .bind(c.value_a)
                .bind(c.value_b)
                .bind(c.variance_percent)
                .bind(c.discrepancy_class)
                .bind(c.status)
                .bind(&c.resolution_note)
                .bind(&c.resolved_by)
                .bind(&c.chosen_observation)
                .bind(&c.detected_at)
                .bind(&c.updated_at)
                .bind(&c.resolved_at)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Created)
            }
            Some((id, status)) if status.is_open() => {
                sqlx::query(
                    r#"
                    UPDATE contradictions SET
                        observation_a = ?, observation_b = ?, value_a = ?, value_b = ?,
                        variance_percent = ?, discrepancy_class = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&c.observation_a)
                .bind(&c.observation_b)
                .bind(c.value_a)
                .bind(c.value_b)
                .bind(c.variance_percent)
                .bind(c.discrepancy_class)
                .bind(Utc::now().to_rfc3339())
                .bind(&id)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Updated)
            }
            Some(_) => Ok(UpsertOutcome::Unchanged),
        }
    }

    async fn get_contradiction(&self, id: &str) -> Result<Option<Contradiction>> {
        let contradiction =
            sqlx::query_as::<_, Contradiction>("SELECT * FROM contradictions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(contradiction)
    }

    async fn list_contradictions(
        &self,
        status: Option<ContradictionStatus>,
    ) -> Result<Vec<Contradiction>> {
        let contradictions = match status {
            Some(status) => {
                sqlx::query_as::<_, Contradiction>(
                    "SELECT * FROM contradictions WHERE status = ? ORDER BY variance_percent DESC",
                )
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Contradiction>(
                    "SELECT * FROM contradictions ORDER BY variance_percent DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(contradictions)
    }

    async fn update_contradiction(&self, id: &str, update: &ContradictionUpdate) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let resolved_at = (!update.status.is_open()).then(|| now.clone());
        let result = sqlx::query(
            r#"
            UPDATE contradictions SET
                status = ?,
                resolution_note = COALESCE(?, resolution_note),
                resolved_by = COALESCE(?, resolved_by),
                chosen_observation = COALESCE(?, chosen_observation),
                updated_at = ?,
                resolved_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.status)
        .bind(&update.note)
        .bind(&update.resolver)
        .bind(&update.chosen_observation)
        .bind(&now)
        .bind(&resolved_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::ContradictionNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl GapTicketRepository for SqliteStore {
    async fn open_ticket(&self, ticket: &GapTicket) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO gap_tickets (id, series_id, source_id, indicator_code, regime_tag,
                missing_item, why_it_matters, priority, status, created_by, created_at,
                resolved_at, resolution_note)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&ticket.id)
        .bind(&ticket.series_id)
        .bind(&ticket.source_id)
        .bind(&ticket.indicator_code)
        .bind(ticket.regime_tag)
        .bind(&ticket.missing_item)
        .bind(&ticket.why_it_matters)
        .bind(ticket.priority)
        .bind(ticket.status)
        .bind(&ticket.created_by)
        .bind(&ticket.created_at)
        .bind(&ticket.resolved_at)
        .bind(&ticket.resolution_note)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn open_ticket_for_series(&self, series_id: &str) -> Result<Option<GapTicket>> {
        let ticket = sqlx::query_as::<_, GapTicket>(
            "SELECT * FROM gap_tickets WHERE series_id = ? AND status IN ('open', 'in_progress')",
        )
        .bind(series_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ticket)
    }

    async fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<GapTicket>> {
        let tickets = match status {
            Some(status) => {
                sqlx::query_as::<_, GapTicket>(
                    "SELECT * FROM gap_tickets WHERE status = ? ORDER BY created_at DESC",
                )
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, GapTicket>("SELECT * FROM gap_tickets ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(tickets)
    }

    async fn close_tickets_for_series(&self, series_id: &str, note: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE gap_tickets SET status = 'closed', resolved_at = ?, resolution_note = ?
            WHERE series_id = ? AND status IN ('open', 'in_progress')
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(note)
        .bind(series_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
