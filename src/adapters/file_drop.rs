//! Drop-file adapter for manual and partner sources
//!
//! Operators transcribe bulletins into `{drops_dir}/{source}/{product}.json`:
//!
//! ```json
//! {"observations": [{"date": "2024-03-01", "value": 1650.0}]}
//! ```

use super::{FetchBatch, FetchedObservation, SourceAdapter};
use crate::calendar::{year_end, year_start};
use crate::error::{Error, Result};
use crate::registry::Product;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct DropFile {
    #[serde(default)]
    observations: Vec<FetchedObservation>,
}

pub struct FileDropAdapter {
    source_id: String,
    drops_dir: PathBuf,
}

impl FileDropAdapter {
    pub fn new(source_id: &str, drops_dir: PathBuf) -> Self {
        Self {
            source_id: source_id.to_string(),
            drops_dir,
        }
    }

    pub fn drop_path(&self, product: &Product) -> PathBuf {
        self.drops_dir
            .join(&self.source_id)
            .join(format!("{}.json", product.id))
    }
}

#[async_trait]
impl SourceAdapter for FileDropAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(&self, product: &Product, year: i32) -> Result<FetchBatch> {
        let path = self.drop_path(product);
        if !path.exists() {
            debug!(path = ?path, "No drop file");
            return Ok(FetchBatch {
                url: Some(path.display().to_string()),
                ..Default::default()
            });
        }

        let body = tokio::fs::read_to_string(&path).await?;
        let file: DropFile = serde_json::from_str(&body)
            .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))?;

        let mut batch = FetchBatch {
            observations: file.observations,
            raw: Some(body),
            url: Some(path.display().to_string()),
        };
        if let (Some(start), Some(end)) = (year_start(year), year_end(year)) {
            batch.retain_range(start, end);
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SourceRegistry;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn product() -> Product {
        SourceRegistry::builtin()
            .unwrap()
            .get_product("cby-aden-exchange-rate")
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_reads_year_from_drop() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cby-aden");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("cby-aden-exchange-rate.json"),
            r#"{"observations": [
                {"date": "2023-12-31", "value": 1530.0},
                {"date": "2024-01-02", "value": 1545.5},
                {"date": "2024-01-03", "value": null}
            ]}"#,
        )
        .unwrap();

        let adapter = FileDropAdapter::new("cby-aden", tmp.path().to_path_buf());
        let batch = adapter.fetch(&product(), 2024).await.unwrap();
        assert_eq!(batch.observations.len(), 2);
        assert_eq!(
            batch.observations[0].date,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
        assert_eq!(batch.observations[1].value, None);
    }

    #[tokio::test]
    async fn test_missing_drop_is_empty() {
        let tmp = TempDir::new().unwrap();
        let adapter = FileDropAdapter::new("cby-aden", tmp.path().to_path_buf());
        let batch = adapter.fetch(&product(), 2024).await.unwrap();
        assert!(batch.is_empty());
        assert!(batch.raw.is_none());
    }

    #[tokio::test]
    async fn test_malformed_drop_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cby-aden");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("cby-aden-exchange-rate.json"), "{not json").unwrap();

        let adapter = FileDropAdapter::new("cby-aden", tmp.path().to_path_buf());
        assert!(matches!(
            adapter.fetch(&product(), 2024).await,
            Err(Error::Parse(_))
        ));
    }
}
