//! AED location index client.
//!
//! The index is an external black box exposing a nearest-facility query.
//! Lookups are bounded by a client-level timeout; the dispatch engine treats
//! any failure as an empty facility list.

use crate::error::{DomainErrorKind, Error, ExternalErrorKind};
use log::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One automated external defibrillator facility, as reported by the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AedLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Human-readable placement hint ("Lobby of Block 12, next to lifts").
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Distance from the queried origin, when the index reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
}

/// AED index API client
#[derive(Clone)]
pub struct AedClient {
    client: reqwest::Client,
    base_url: String,
}

impl AedClient {
    /// Create a new AED index client. The timeout bounds every lookup; the
    /// dispatch engine must never wait on this service longer than that.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// The `count` facilities nearest to the given origin. May legitimately
    /// return fewer, or none.
    pub async fn find_nearest(
        &self,
        latitude: f64,
        longitude: f64,
        count: u8,
    ) -> Result<Vec<AedLocation>, Error> {
        let url = format!("{}/aeds/nearest", self.base_url);

        debug!("Querying AED index for {count} facilities near ({latitude}, {longitude})");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("count", count.to_string()),
            ])
            .send()
            .await?;

        if response.status().is_success() {
            let facilities: Vec<AedLocation> = response.json().await.map_err(|e| {
                warn!("Failed to parse AED index response: {e:?}");
                Error {
                    source: Some(Box::new(e)),
                    error_kind: DomainErrorKind::External(ExternalErrorKind::Other(
                        "Invalid response from AED index".to_string(),
                    )),
                }
            })?;
            Ok(facilities)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            error!("AED index API: {error_text}");
            Err(Error {
                source: None,
                error_kind: DomainErrorKind::External(ExternalErrorKind::Other(error_text)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn find_nearest_parses_the_facility_list() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/aeds/nearest")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("latitude".into(), "1.3".into()),
                mockito::Matcher::UrlEncoded("longitude".into(), "103.8".into()),
                mockito::Matcher::UrlEncoded("count".into(), "5".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    {"latitude": 1.301, "longitude": 103.801, "description": "Lobby, Block 12"}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let client = AedClient::new(&server.url(), Duration::from_secs(3)).unwrap();
        let facilities = client.find_nearest(1.3, 103.8, 5).await.unwrap();

        mock.assert_async().await;
        assert_eq!(facilities.len(), 1);
        assert_eq!(
            facilities[0].description.as_deref(),
            Some("Lobby, Block 12")
        );
    }

    #[tokio::test]
    async fn find_nearest_surfaces_an_upstream_failure_as_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/aeds/nearest")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .with_body("index rebuilding")
            .create_async()
            .await;

        let client = AedClient::new(&server.url(), Duration::from_secs(3)).unwrap();
        let result = client.find_nearest(1.3, 103.8, 5).await;

        assert!(result.is_err());
    }
}
