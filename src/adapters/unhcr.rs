//! UNHCR population statistics
//!
//! One annual value per product: the sum over `items[]` of the field named
//! by the product's external code (`refugees`, `idps`, `asylum_seekers`).

use super::http::{endpoint, get_text, number};
use super::{annual_date, base_url, external_code, FetchBatch, FetchedObservation, SourceAdapter, SourcePacer};
use crate::error::Result;
use crate::registry::{Product, Source};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

pub struct UnhcrAdapter {
    source: Source,
    base: String,
    client: Client,
    pacer: SourcePacer,
    country: String,
}

impl UnhcrAdapter {
    pub fn new(source: Source, client: Client, pacer: SourcePacer, country_iso3: &str) -> Result<Self> {
        Ok(Self {
            base: base_url(&source)?,
            source,
            client,
            pacer,
            country: country_iso3.to_string(),
        })
    }
}

fn parse_response(body: &str, field: &str, year: i32) -> Result<Vec<FetchedObservation>> {
    let json: Value = serde_json::from_str(body)?;
    let Some(items) = json.get("items").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let values: Vec<f64> = items
        .iter()
        .filter_map(|item| item.get(field).and_then(number))
        .collect();
    if values.is_empty() {
        return Ok(Vec::new());
    }

    let total: f64 = values.iter().sum();
    Ok(vec![FetchedObservation::new(annual_date(year)?, Some(total))])
}

#[async_trait]
impl SourceAdapter for UnhcrAdapter {
    fn source_id(&self) -> &str {
        &self.source.id
    }

    async fn fetch(&self, product: &Product, year: i32) -> Result<FetchBatch> {
        let api_key = self.source.credential()?;
        let field = external_code(product)?;

        let mut url = endpoint(&self.base, "population/")?;
        url.query_pairs_mut()
            .append_pair("year", &year.to_string())
            .append_pair("coo", &self.country);

        let body = get_text(&self.client, &self.pacer, &url, &[("API-Key", api_key.as_str())]).await?;
        let observations = parse_response(&body, field, year)?;
        debug!(product = %product.id, year, count = observations.len(), "UNHCR fetch");

        Ok(FetchBatch {
            observations,
            raw: Some(body),
            url: Some(url.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http::build_client;
    use crate::config::Config;
    use crate::error::Error;
    use crate::registry::SourceRegistry;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer, key_var: &str) -> UnhcrAdapter {
        let registry = SourceRegistry::builtin().unwrap();
        let mut source = registry.get_source("unhcr-popstats").unwrap().clone();
        source.base_url = Some(server.uri());
        source.credential_env = Some(key_var.to_string());
        let client = build_client(&Config::default().http).unwrap();
        UnhcrAdapter::new(source, client, SourcePacer::unlimited(), "YEM").unwrap()
    }

    #[test]
    fn test_sum_named_field() {
        let body = json!({"items": [
            {"year": 2022, "refugees": 1000, "idps": "4,500"},
            {"year": 2022, "refugees": "250", "idps": null}
        ]})
        .to_string();
        let refugees = parse_response(&body, "refugees", 2022).unwrap();
        assert_eq!(refugees[0].value, Some(1250.0));
        assert_eq!(
            refugees[0].date,
            NaiveDate::from_ymd_opt(2022, 12, 31).unwrap()
        );

        let idps = parse_response(&body, "idps", 2022).unwrap();
        assert_eq!(idps[0].value, Some(4500.0));

        assert!(parse_response(&body, "asylum_seekers", 2022).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_sends_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/population/"))
            .and(query_param("year", "2021"))
            .and(query_param("coo", "YEM"))
            .and(header("API-Key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"refugees": 42}]
            })))
            .mount(&server)
            .await;

        std::env::set_var("BACKFILL_TEST_UNHCR_KEY_OK", "test-key");
        let adapter = adapter(&server, "BACKFILL_TEST_UNHCR_KEY_OK");
        let product = SourceRegistry::builtin()
            .unwrap()
            .get_product("unhcr-refugees")
            .unwrap()
            .clone();

        let batch = adapter.fetch(&product, 2021).await.unwrap();
        assert_eq!(batch.observations[0].value, Some(42.0));
    }

    #[tokio::test]
    async fn test_missing_key_is_credential_error() {
        let server = MockServer::start().await;
        let adapter = adapter(&server, "BACKFILL_TEST_UNHCR_KEY_UNSET");
        let product = SourceRegistry::builtin()
            .unwrap()
            .get_product("unhcr-idps")
            .unwrap()
            .clone();

        let err = adapter.fetch(&product, 2021).await.unwrap_err();
        assert!(matches!(err, Error::Credential(_)));
        assert!(!err.is_retryable());
    }
}
