//! Shared HTTP plumbing for the API adapters

use super::SourcePacer;
use crate::config::HttpConfig;
use crate::error::{Error, Result};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Build the HTTP client shared by all adapters
pub fn build_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .gzip(true)
        .brotli(true)
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Join `path` onto a base URL that may or may not end in a slash
pub fn endpoint(base: &str, path: &str) -> Result<Url> {
    let base = format!("{}/", base.trim_end_matches('/'));
    Ok(Url::parse(&base)?.join(path.trim_start_matches('/'))?)
}

/// GET `url` after pacing and return the body text.
///
/// Non-success responses become [`Error::Fetch`].
pub async fn get_text(
    client: &Client,
    pacer: &SourcePacer,
    url: &Url,
    headers: &[(&str, &str)],
) -> Result<String> {
    pacer.wait().await;
    debug!(url = %url, "Fetching");

    let mut request = client.get(url.clone());
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Fetch(format!("HTTP {}: {}", status.as_u16(), url)));
    }
    Ok(response.text().await?)
}

/// Read a JSON number that some APIs send as a string
pub fn number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_endpoint_join() {
        let a = endpoint("https://api.example.org/v2", "country/YE").unwrap();
        let b = endpoint("https://api.example.org/v2/", "/country/YE").unwrap();
        assert_eq!(a.as_str(), "https://api.example.org/v2/country/YE");
        assert_eq!(a, b);
    }

    #[test]
    fn test_number() {
        assert_eq!(number(&json!(12.5)), Some(12.5));
        assert_eq!(number(&json!("1,200")), Some(1200.0));
        assert_eq!(number(&json!(null)), None);
        assert_eq!(number(&json!("n/a")), None);
    }

    #[tokio::test]
    async fn test_get_text_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .and(header("API-Key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = build_client(&Config::default().http).unwrap();
        let pacer = SourcePacer::unlimited();

        let ok = endpoint(&server.uri(), "ok").unwrap();
        let body = get_text(&client, &pacer, &ok, &[("API-Key", "secret")])
            .await
            .unwrap();
        assert_eq!(body, "hello");

        let down = endpoint(&server.uri(), "down").unwrap();
        let err = get_text(&client, &pacer, &down, &[]).await.unwrap_err();
        assert!(matches!(err, Error::Fetch(ref m) if m.starts_with("HTTP 503")));
        assert!(err.is_retryable());
    }
}
