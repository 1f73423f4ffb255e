use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de, Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// One entry of the scraping listing. Only `key` is required, the listing service reports
/// numbers as strings so everything else is kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paste {
    #[serde(deserialize_with = "non_empty_key")]
    pub key: String,
    #[serde(default)]
    pub scrape_url: String,
    #[serde(default)]
    pub full_url: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub expire: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub syntax: String,
    #[serde(default)]
    pub user: String,
}

fn non_empty_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let key = String::deserialize(deserializer)?;
    if key.is_empty() {
        return Err(de::Error::invalid_value(
            de::Unexpected::Str(&key),
            &"a non-empty paste key",
        ));
    }
    Ok(key)
}

impl Paste {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {error}")]
    Request {
        url: String,
        #[source]
        error: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: StatusCode },
    #[error("could not parse paste listing: {error}")]
    Parse {
        #[source]
        error: serde_json::Error,
        // Raw response, kept for the log line
        body: String,
    },
}

/// Where the poll loop gets its candidate items from.
#[async_trait]
pub trait ItemSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Paste>, SourceError>;
}

pub struct HttpPasteSource {
    url: String,
    limit: u32,
    client: Client,
}

impl HttpPasteSource {
    pub fn new(url: impl Into<String>, limit: u32, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SourceError::Client)?;

        Ok(Self {
            url: url.into(),
            limit,
            client,
        })
    }

    /// The underlying client, shared with the processor so both reuse one connection pool.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ItemSource for HttpPasteSource {
    async fn fetch(&self) -> Result<Vec<Paste>, SourceError> {
        let request_error = |error| SourceError::Request {
            url: self.url.clone(),
            error,
        };

        let response = self
            .client
            .get(&self.url)
            .query(&[("limit", self.limit)])
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: self.url.clone(),
                status,
            });
        }

        // Read the body first so a malformed listing is a parse error rather than a transport one
        let body = response.bytes().await.map_err(request_error)?;
        serde_json::from_slice(&body).map_err(|error| SourceError::Parse {
            error,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

#[cfg(test)]
mod test {
    use httpmock::MockServer;

    use super::*;

    const LISTING: &str = r#"[
        {
            "scrape_url": "https://scrape.pastebin.com/api_scrape_item.php?i=0CeaNm8Y",
            "full_url": "https://pastebin.com/0CeaNm8Y",
            "date": "1442911802",
            "key": "0CeaNm8Y",
            "size": "890",
            "expire": "1442998159",
            "title": "Once we all know when we goto function",
            "syntax": "java",
            "user": "admin"
        },
        {"key": "Gu8UkGRx"}
    ]"#;

    fn source_for(server: &MockServer) -> HttpPasteSource {
        HttpPasteSource::new(server.url("/api_scraping.php"), 100, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_parses_listing() {
        let server = MockServer::start();
        let listing = server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/api_scraping.php")
                .query_param("limit", "100");
            then.status(200)
                .header("content-type", "application/json")
                .body(LISTING);
        });

        let pastes = source_for(&server).fetch().await.unwrap();

        listing.assert();
        assert_eq!(pastes.len(), 2);
        assert_eq!(pastes[0].key, "0CeaNm8Y");
        assert_eq!(pastes[0].syntax, "java");
        assert_eq!(pastes[0].size, "890");
        assert_eq!(pastes[1], Paste::new("Gu8UkGRx"));
    }

    #[tokio::test]
    async fn test_fetch_empty_listing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET);
            then.status(200).body("[]");
        });

        assert!(source_for(&server).fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET);
            then.status(403).body("YOUR IP IS NOT WHITELISTED");
        });

        let err = source_for(&server).fetch().await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Status { status, .. } if status == StatusCode::FORBIDDEN
        ));
    }

    #[tokio::test]
    async fn test_fetch_malformed_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET);
            then.status(200).body("not json at all");
        });

        let err = source_for(&server).fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Parse { ref body, .. } if body == "not json at all"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_entries_without_key() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET);
            then.status(200).body(r#"[{"title":"x"},{"title":"y"}]"#);
        });

        let err = source_for(&server).fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Parse { .. }));
    }

    #[test]
    fn test_empty_key_is_rejected() {
        assert!(serde_json::from_str::<Paste>(r#"{"key":""}"#).is_err());
        assert_eq!(
            serde_json::from_str::<Paste>(r#"{"key":"abc"}"#).unwrap(),
            Paste::new("abc")
        );
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host() {
        // Nothing listens on the discard port
        let source =
            HttpPasteSource::new("http://127.0.0.1:9/listing", 10, Duration::from_secs(1)).unwrap();

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Request { .. }));
    }
}
