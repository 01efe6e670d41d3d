//! OCHA Financial Tracking Service
//!
//! Funding flows are summed per period of the product's native frequency.

use super::http::{endpoint, get_text, number};
use super::{
    aggregate_by_period, base_url, parse_date_prefix, Aggregate, FetchBatch, FetchedObservation,
    SourceAdapter, SourcePacer,
};
use crate::error::Result;
use crate::models::Frequency;
use crate::registry::{Product, Source};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

pub struct OchaFtsAdapter {
    source: Source,
    base: String,
    client: Client,
    pacer: SourcePacer,
    country: String,
}

impl OchaFtsAdapter {
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

fn parse_response(body: &str, frequency: Frequency, year: i32) -> Result<Vec<FetchedObservation>> {
    let json: Value = serde_json::from_str(body)?;
    let Some(flows) = json
        .get("data")
        .and_then(|d| d.get("flows"))
        .and_then(Value::as_array)
    else {
        return Ok(Vec::new());
    };

    let values = flows.iter().filter_map(|flow| {
        let amount = flow.get("amountUSD").and_then(number)?;
        let date = flow
            .get("date")
            .and_then(Value::as_str)
            .and_then(parse_date_prefix)?;
        Some((date, amount))
    });

    Ok(aggregate_by_period(values, frequency, year, Aggregate::Sum))
}

#[async_trait]
impl SourceAdapter for OchaFtsAdapter {
    fn source_id(&self) -> &str {
        &self.source.id
    }

    async fn fetch(&self, product: &Product, year: i32) -> Result<FetchBatch> {
        let mut url = endpoint(&self.base, "flow")?;
        url.query_pairs_mut()
            .append_pair("countryISO3", &self.country)
            .append_pair("year", &year.to_string());

        let body = get_text(&self.client, &self.pacer, &url, &[]).await?;
        let observations = parse_response(&body, product.frequency, year)?;
        debug!(product = %product.id, year, count = observations.len(), "FTS fetch");

        Ok(FetchBatch {
            observations,
            raw: Some(body),
            url: Some(url.to_string()),
        })
    }
}
