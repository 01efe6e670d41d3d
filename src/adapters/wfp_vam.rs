//! WFP VAM market prices
//!
//! The API returns a flat array of `{commodity, price, date}` records across
//! every commodity and market. A product's external code names one commodity;
//! only its records are averaged per period of the native frequency. Products
//! without a commodity code are not served by this endpoint.

use super::http::{endpoint, get_text, number};
use super::{
    aggregate_by_period, base_url, parse_date_prefix, Aggregate, FetchBatch, FetchedObservation,
    SourceAdapter, SourcePacer,
};
use crate::error::{Error, Result};
use crate::models::Frequency;
use crate::registry::{Product, Source};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

pub struct WfpVamAdapter {
    source: Source,
    base: String,
    client: Client,
    pacer: SourcePacer,
    country: String,
}

impl WfpVamAdapter {
    pub fn new(source: Source, client: Client, pacer: SourcePacer, country_name: &str) -> Result<Self> {
        Ok(Self {
            base: base_url(&source)?,
            source,
            client,
            pacer,
            country: country_name.to_string(),
        })
    }
}

/// Commodity of a product, required before any request is made
fn commodity(product: &Product) -> Result<&str> {
    product.external_code.as_deref().ok_or_else(|| {
        Error::Registry(format!(
            "{} has no commodity code; GetMarketPrices does not publish it",
            product.id
        ))
    })
}

fn parse_response(
    body: &str,
    commodity: &str,
    frequency: Frequency,
    year: i32,
) -> Result<Vec<FetchedObservation>> {
    let json: Value = serde_json::from_str(body)?;
    let Some(records) = json.as_array() else {
        return Ok(Vec::new());
    };

    let values = records.iter().filter_map(|record| {
        let name = record.get("commodity").and_then(Value::as_str)?;
        if !name.trim().eq_ignore_ascii_case(commodity) {
            return None;
        }
        let price = record.get("price").and_then(number)?;
        let date = record
            .get("date")
            .and_then(Value::as_str)
            .and_then(parse_date_prefix)?;
        Some((date, price))
    });

    Ok(aggregate_by_period(values, frequency, year, Aggregate::Mean))
}

#[async_trait]
impl SourceAdapter for WfpVamAdapter {
    fn source_id(&self) -> &str {
        &self.source.id
    }

    async fn fetch(&self, product: &Product, year: i32) -> Result<FetchBatch> {
        let commodity = commodity(product)?;
        let api_key = self.source.credential()?;

        let mut url = endpoint(&self.base, "GetMarketPrices")?;
        url.query_pairs_mut()
            .append_pair("country", &self.country)
            .append_pair("year", &year.to_string());

        let body = get_text(&self.client, &self.pacer, &url, &[("API-Key", api_key.as_str())]).await?;
        let observations = parse_response(&body, commodity, product.frequency, year)?;
        debug!(product = %product.id, year, count = observations.len(), "WFP fetch");

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
    use crate::registry::SourceRegistry;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WHEAT: &str = "Wheat flour - Retail";

    #[test]
    fn test_monthly_average() {
        let body = json!([
            {"commodity": WHEAT, "price": 100.0, "date": "2022-06-03T00:00:00"},
            {"commodity": "wheat flour - retail", "price": "300", "date": "2022-06-20T00:00:00"},
            {"commodity": WHEAT, "price": 50.0, "date": "2022-07-01T00:00:00"},
            {"commodity": WHEAT}
        ])
        .to_string();
        let obs = parse_response(&body, WHEAT, Frequency::Monthly, 2022).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].date, NaiveDate::from_ymd_opt(2022, 6, 1).unwrap());
        assert_eq!(obs[0].value, Some(200.0));
    }

    #[test]
    fn test_other_commodities_are_excluded() {
        let body = json!([
            {"commodity": WHEAT, "price": 600.0, "date": "2022-01-15"},
            {"commodity": "Fuel (diesel) - Retail", "price": 1400.0, "date": "2022-02-15"},
            {"price": 900.0, "date": "2022-03-15"}
        ])
        .to_string();
        let obs = parse_response(&body, WHEAT, Frequency::Quarterly, 2022).unwrap();
        assert_eq!(
            obs,
            vec![FetchedObservation::new(
                NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
                Some(600.0)
            )]
        );
    }

    #[test]
    fn test_non_array_is_empty() {
        let body = json!({"error": "no data"}).to_string();
        assert!(parse_response(&body, WHEAT, Frequency::Monthly, 2022)
            .unwrap()
            .is_empty());
    }

    fn adapter_for(server: &MockServer, registry: &SourceRegistry) -> WfpVamAdapter {
        std::env::set_var("BACKFILL_TEST_WFP_KEY", "wfp-key");
        let mut source = registry.get_source("wfp-vam").unwrap().clone();
        source.base_url = Some(server.uri());
        source.credential_env = Some("BACKFILL_TEST_WFP_KEY".into());
        let client = build_client(&Config::default().http).unwrap();
        WfpVamAdapter::new(source, client, SourcePacer::unlimited(), "Yemen").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_filters_commodity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/GetMarketPrices"))
            .and(query_param("country", "Yemen"))
            .and(query_param("year", "2022"))
            .and(header("API-Key", "wfp-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"commodity": WHEAT, "price": 10.0, "date": "2022-01-15"},
                {"commodity": WHEAT, "price": 20.0, "date": "2022-01-28"},
                {"commodity": "Fuel (diesel) - Retail", "price": 1400.0, "date": "2022-01-20"},
                {"commodity": WHEAT, "price": 40.0, "date": "2022-05-15"}
            ])))
            .mount(&server)
            .await;

        let registry = SourceRegistry::builtin().unwrap();
        let adapter = adapter_for(&server, &registry);
        let product = registry.get_product("wfp-food-prices").unwrap();

        let batch = adapter.fetch(product, 2022).await.unwrap();
        let values: Vec<_> = batch.observations.iter().map(|o| o.value).collect();
        assert_eq!(values, vec![Some(15.0), Some(40.0)]);
    }

    #[tokio::test]
    async fn test_unpublished_product_is_rejected_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"commodity": WHEAT, "price": 600.0, "date": "2022-01-15"}
            ])))
            .expect(0)
            .mount(&server)
            .await;

        let registry = SourceRegistry::builtin().unwrap();
        let adapter = adapter_for(&server, &registry);
        let product = registry.get_product("wfp-market-functionality").unwrap();

        assert!(matches!(
            adapter.fetch(product, 2022).await,
            Err(Error::Registry(_))
        ));
    }
}
