//! IMF International Financial Statistics over the SDMX-JSON REST service
//!
//! `CompactData/IFS/{freq}.{country}.{code}` returns
//! `CompactData.DataSet.Series[].Obs[]` where either level may be a single
//! object instead of an array when there is only one element.

use super::http::{endpoint, get_text, number};
use super::{base_url, external_code, FetchBatch, FetchedObservation, SourceAdapter, SourcePacer};
use crate::error::{Error, Result};
use crate::models::Frequency;
use crate::registry::{Product, Source};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

pub struct ImfSdmxAdapter {
    source: Source,
    base: String,
    client: Client,
    pacer: SourcePacer,
    country: String,
}

impl ImfSdmxAdapter {
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

fn frequency_code(frequency: Frequency) -> Result<&'static str> {
    match frequency {
        Frequency::Monthly => Ok("M"),
        Frequency::Quarterly => Ok("Q"),
        Frequency::Annual => Ok("A"),
        other => Err(Error::Registry(format!("IFS does not publish {} series", other))),
    }
}

/// `YYYY` → December 31, `YYYY-MM` → first of month, `YYYY-Qn` → quarter start
pub(crate) fn parse_period(period: &str) -> Option<NaiveDate> {
    let period = period.trim();
    if let Some((year, rest)) = period.split_once('-') {
        let year: i32 = year.parse().ok()?;
        if let Some(q) = rest.strip_prefix('Q') {
            let q: u32 = q.parse().ok()?;
            if !(1..=4).contains(&q) {
                return None;
            }
            return NaiveDate::from_ymd_opt(year, (q - 1) * 3 + 1, 1);
        }
        let month: u32 = rest.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, 1);
    }
    let year: i32 = period.parse().ok()?;
    NaiveDate::from_ymd_opt(year, 12, 31)
}

/// Object-or-array normalisation
fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn parse_response(body: &str) -> Result<Vec<FetchedObservation>> {
    let json: Value = serde_json::from_str(body)?;
    let dataset = json.get("CompactData").and_then(|c| c.get("DataSet"));

    let mut observations = Vec::new();
    for series in as_list(dataset.and_then(|d| d.get("Series"))) {
        for obs in as_list(series.get("Obs")) {
            let Some(date) = obs
                .get("@TIME_PERIOD")
                .and_then(Value::as_str)
                .and_then(parse_period)
            else {
                continue;
            };
            let value = obs.get("@OBS_VALUE").and_then(number);
            observations.push(FetchedObservation::new(date, value));
        }
    }
    Ok(observations)
}

#[async_trait]
impl SourceAdapter for ImfSdmxAdapter {
    fn source_id(&self) -> &str {
        &self.source.id
    }

    async fn fetch(&self, product: &Product, year: i32) -> Result<FetchBatch> {
        let key = format!(
            "{}.{}.{}",
            frequency_code(product.frequency)?,
            self.country,
            external_code(product)?
        );
        let mut url = endpoint(&self.base, &format!("CompactData/IFS/{}", key))?;
        url.query_pairs_mut()
            .append_pair("startPeriod", &year.to_string())
            .append_pair("endPeriod", &year.to_string());

        let body = get_text(&self.client, &self.pacer, &url, &[]).await?;
        let observations = parse_response(&body)?;
        debug!(product = %product.id, year, count = observations.len(), "IMF fetch");

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
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("2023"), Some(d(2023, 12, 31)));
        assert_eq!(parse_period("2023-07"), Some(d(2023, 7, 1)));
        assert_eq!(parse_period("2023-Q3"), Some(d(2023, 7, 1)));
        assert_eq!(parse_period("2023-Q5"), None);
        assert_eq!(parse_period("garbage"), None);
    }

    #[test]
    fn test_single_object_series() {
        let body = json!({
            "CompactData": {"DataSet": {"Series": {
                "@FREQ": "M",
                "Obs": {"@TIME_PERIOD": "2020-01", "@OBS_VALUE": "250.3"}
            }}}
        })
        .to_string();
        let obs = parse_response(&body).unwrap();
        assert_eq!(obs, vec![FetchedObservation::new(d(2020, 1, 1), Some(250.3))]);
    }

    #[test]
    fn test_missing_series_is_empty() {
        let body = json!({"CompactData": {"DataSet": {}}}).to_string();
        assert!(parse_response(&body).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_monthly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/CompactData/IFS/M.YE.ENDA_XDC_USD_RATE"))
            .and(query_param("startPeriod", "2019"))
            .and(query_param("endPeriod", "2019"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "CompactData": {"DataSet": {"Series": [{
                    "Obs": [
                        {"@TIME_PERIOD": "2019-01", "@OBS_VALUE": "250.2"},
                        {"@TIME_PERIOD": "2019-02"}
                    ]
                }]}}
            })))
            .mount(&server)
            .await;

        let registry = SourceRegistry::builtin().unwrap();
        let mut source = registry.get_source("imf-ifs").unwrap().clone();
        source.base_url = Some(server.uri());
        let product = registry.get_product("imf-exchange-rate").unwrap();
        let client = build_client(&Config::default().http).unwrap();
        let adapter = ImfSdmxAdapter::new(source, client, SourcePacer::unlimited(), "YE").unwrap();

        let batch = adapter.fetch(product, 2019).await.unwrap();
        assert_eq!(batch.observations.len(), 2);
        assert_eq!(batch.observations[1].value, None);
    }
}
