//! Checkpoint inspection and control

use crate::error::{Error, Result};
use crate::store::{Checkpoint, CheckpointError, CheckpointRepository, CheckpointStatus, FetchRun};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A checkpoint with its error log and adapter calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointDetail {
    pub checkpoint: Checkpoint,
    pub errors: Vec<CheckpointError>,
    pub fetch_runs: Vec<FetchRun>,
}

pub async fn cmd_list_checkpoints<S: CheckpointRepository>(
    store: &S,
    status: Option<CheckpointStatus>,
) -> Result<Vec<Checkpoint>> {
    store.list_checkpoints(status).await
}

pub async fn cmd_show_checkpoint<S: CheckpointRepository>(store: &S, id: &str) -> Result<CheckpointDetail> {
    let checkpoint = store
        .get_checkpoint(id)
        .await?
        .ok_or_else(|| Error::CheckpointNotFound(id.to_string()))?;
    let fetch_runs = store.list_fetch_runs(id).await?;
    Ok(CheckpointDetail {
        errors: checkpoint.errors(),
        checkpoint,
        fetch_runs,
    })
}

/// Ask a running checkpoint to stop after its current step
pub async fn cmd_pause_checkpoint<S: CheckpointRepository>(store: &S, id: &str) -> Result<Checkpoint> {
    let checkpoint = store
        .get_checkpoint(id)
        .await?
        .ok_or_else(|| Error::CheckpointNotFound(id.to_string()))?;

    if !store.pause_checkpoint(id).await? {
        return Err(Error::InvalidTransition(format!(
            "checkpoint {} is {}, only running checkpoints can be paused",
            id, checkpoint.status
        )));
    }
    info!(checkpoint = id, "Pause requested");

    store
        .get_checkpoint(id)
        .await?
        .ok_or_else(|| Error::CheckpointNotFound(id.to_string()))
}

fn progress_percent(cp: &Checkpoint) -> f64 {
    if cp.total_steps == 0 {
        return 0.0;
    }
    cp.processed_steps as f64 / cp.total_steps as f64 * 100.0
}

pub fn print_checkpoints(checkpoints: &[Checkpoint]) {
    println!("\n🧭 Checkpoints\n");

    if checkpoints.is_empty() {
        println!("No checkpoints. Start one with 'backfill run'.");
        return;
    }

    for cp in checkpoints {
        println!(
            "• {}/{} {} [{}] {}/{} steps ({:.0}%)",
            cp.source_id,
            cp.product_id,
            cp.chunk_label,
            cp.status,
            cp.processed_steps,
            cp.total_steps,
            progress_percent(cp)
        );
        println!("  ID: {}", cp.id);
        println!(
            "  Inserted: {}, Skipped: {}, Errors: {}",
            cp.inserted, cp.skipped, cp.error_count
        );
    }
}

pub fn print_checkpoint_detail(detail: &CheckpointDetail) {
    let cp = &detail.checkpoint;
    println!("\n🧭 Checkpoint {}\n", cp.id);
    println!("Source: {}", cp.source_id);
    println!("Product: {}", cp.product_id);
    println!("Chunk: {} ({} .. {}, by {})", cp.chunk_label, cp.chunk_start, cp.chunk_end, cp.granularity);
    println!("Status: {}", cp.status);
    println!(
        "Progress: {}/{} steps ({:.1}%)",
        cp.processed_steps,
        cp.total_steps,
        progress_percent(cp)
    );
    if let Some(pos) = cp.last_position {
        println!("Last position: {}", pos);
    }
    println!("Inserted: {}, Skipped: {}, Errors: {}", cp.inserted, cp.skipped, cp.error_count);
    println!("Started: {}", cp.started_at);
    println!("Updated: {}", cp.updated_at);
    if let Some(done) = &cp.completed_at {
        println!("Completed: {}", done);
    }

    if !detail.errors.is_empty() {
        println!("\nRecent errors:");
        for e in &detail.errors {
            println!("  [{}] {} {}", e.at, e.step, e.message);
        }
    }

    if !detail.fetch_runs.is_empty() {
        println!("\nFetch runs: {}", detail.fetch_runs.len());
        for run in detail.fetch_runs.iter().take(10) {
            println!(
                "  {} {} ({} observations)",
                run.step_label, run.status, run.observation_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::ChunkGranularity;
    use crate::store::SqliteStore;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    async fn store_with(status: CheckpointStatus) -> (TempDir, SqliteStore, String) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("engine.db")).await.unwrap();
        let mut cp = Checkpoint::new(
            "wb-wdi",
            "wb-gdp",
            "2024",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            ChunkGranularity::Month,
            12,
        );
        cp.status = status;
        store.save_checkpoint(&cp).await.unwrap();
        (tmp, store, cp.id)
    }

    #[tokio::test]
    async fn test_pause_running() {
        let (_tmp, store, id) = store_with(CheckpointStatus::Running).await;
        let paused = cmd_pause_checkpoint(&store, &id).await.unwrap();
        assert_eq!(paused.status, CheckpointStatus::Paused);

        let listed = cmd_list_checkpoints(&store, Some(CheckpointStatus::Paused)).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_pause_completed_is_rejected() {
        let (_tmp, store, id) = store_with(CheckpointStatus::Completed).await;
        assert!(matches!(
            cmd_pause_checkpoint(&store, &id).await,
            Err(Error::InvalidTransition(_))
        ));
        assert!(matches!(
            cmd_pause_checkpoint(&store, "missing").await,
            Err(Error::CheckpointNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_show_detail() {
        let (_tmp, store, id) = store_with(CheckpointStatus::Running).await;
        let detail = cmd_show_checkpoint(&store, &id).await.unwrap();
        assert_eq!(detail.checkpoint.product_id, "wb-gdp");
        assert!(detail.errors.is_empty());
        assert!(detail.fetch_runs.is_empty());
    }
}
