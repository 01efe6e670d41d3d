//! World Bank Indicators API (v2)

use super::http::{endpoint, get_text, number};
use super::{annual_date, base_url, external_code, FetchBatch, FetchedObservation, SourceAdapter, SourcePacer};
use crate::error::{Error, Result};
use crate::registry::{Product, Source};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

pub struct WorldBankAdapter {
    source: Source,
    base: String,
    client: Client,
    pacer: SourcePacer,
    country: String,
}

impl WorldBankAdapter {
    pub fn new(source: Source, client: Client, pacer: SourcePacer, country_iso2: &str) -> Result<Self> {
        Ok(Self {
            base: base_url(&source)?,
            source,
            client,
            pacer,
            country: country_iso2.to_string(),
        })
    }
}

/// Records of a World Bank response: `[ {paging}, [records] ]`
fn parse_response(body: &str, year: i32) -> Result<Vec<FetchedObservation>> {
    let json: Value = serde_json::from_str(body)?;

    // errors come back as [{"message": [...]}]
    if let Some(message) = json.get(0).and_then(|meta| meta.get("message")) {
        return Err(Error::Fetch(format!("World Bank API error: {}", message)));
    }

    let Some(records) = json.get(1).and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut observations = Vec::new();
    for record in records {
        let record_year = record
            .get("date")
            .and_then(Value::as_str)
            .and_then(|d| d.trim().parse::<i32>().ok())
            .unwrap_or(year);
        if record_year != year {
            continue;
        }
        let value = record.get("value").and_then(number);
        observations.push(FetchedObservation::new(annual_date(record_year)?, value));
    }
    Ok(observations)
}

#[async_trait]
impl SourceAdapter for WorldBankAdapter {
    fn source_id(&self) -> &str {
        &self.source.id
    }

    async fn fetch(&self, product: &Product, year: i32) -> Result<FetchBatch> {
        let code = external_code(product)?;
        let mut url = endpoint(
            &self.base,
            &format!("country/{}/indicator/{}", self.country, code),
        )?;
        url.query_pairs_mut()
            .append_pair("date", &year.to_string())
            .append_pair("format", "json")
            .append_pair("per_page", "1000");

        let body = get_text(&self.client, &self.pacer, &url, &[]).await?;
        let observations = parse_response(&body, year)?;
        debug!(product = %product.id, year, count = observations.len(), "World Bank fetch");

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
    use crate::config::Config;
    use crate::adapters::http::build_client;
    use crate::registry::SourceRegistry;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> (WorldBankAdapter, Product) {
        let registry = SourceRegistry::builtin().unwrap();
        let mut source = registry.get_source("wb-wdi").unwrap().clone();
        source.base_url = Some(server.uri());
        let product = registry.get_product("wb-gdp").unwrap().clone();
        let client = build_client(&Config::default().http).unwrap();
        (
            WorldBankAdapter::new(source, client, SourcePacer::unlimited(), "YE").unwrap(),
            product,
        )
    }

    #[tokio::test]
    async fn test_fetch_year() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/country/YE/indicator/NY.GDP.MKTP.CD"))
            .and(query_param("date", "2018"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"page": 1, "pages": 1, "per_page": 1000, "total": 1},
                [{
                    "indicator": {"id": "NY.GDP.MKTP.CD", "value": "GDP (current US$)"},
                    "country": {"id": "YE", "value": "Yemen, Rep."},
                    "date": "2018",
                    "value": 21606162696.0
                }]
            ])))
            .mount(&server)
            .await;

        let (adapter, product) = adapter(&server);
        let batch = adapter.fetch(&product, 2018).await.unwrap();
        assert_eq!(batch.observations.len(), 1);
        assert_eq!(
            batch.observations[0].date,
            NaiveDate::from_ymd_opt(2018, 12, 31).unwrap()
        );
        assert_eq!(batch.observations[0].value, Some(21606162696.0));
        assert!(batch.raw.is_some());
        assert!(batch.url.unwrap().contains("per_page=1000"));
    }

    #[tokio::test]
    async fn test_null_value_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"page": 1, "total": 1},
                [{"date": "2024", "value": null}]
            ])))
            .mount(&server)
            .await;

        let (adapter, product) = adapter(&server);
        let batch = adapter.fetch(&product, 2024).await.unwrap();
        assert_eq!(batch.observations.len(), 1);
        assert_eq!(batch.observations[0].value, None);
    }

    #[tokio::test]
    async fn test_no_data_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"page": 0, "total": 0}, null])),
            )
            .mount(&server)
            .await;

        let (adapter, product) = adapter(&server);
        let batch = adapter.fetch(&product, 2026).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_api_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"message": [{"id": "120", "key": "Invalid value"}]}
            ])))
            .mount(&server)
            .await;

        let (adapter, product) = adapter(&server);
        assert!(matches!(
            adapter.fetch(&product, 2020).await,
            Err(Error::Fetch(_))
        ));
    }
}
