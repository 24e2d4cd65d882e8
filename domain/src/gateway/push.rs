//! Push relay client.
//!
//! Delivers the backgrounded-app fallback notification for every fanned-out
//! responder, whether or not they hold a live socket subscription. Delivery
//! is fire-and-forget from the dispatch engine: per-recipient failures are
//! logged, never retried here.

use crate::error::{DomainErrorKind, Error, ExternalErrorKind};
use entity::Id;
use log::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    /// Structured payload the client app uses for deep-linking.
    pub data: Value,
}

/// Per-recipient delivery outcome reported by the relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushDeliveryResult {
    pub user_id: Id,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Push relay API client
#[derive(Clone)]
pub struct PushClient {
    client: reqwest::Client,
    base_url: String,
}

impl PushClient {
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

    /// Deliver one payload to a batch of users, returning the relay's
    /// per-recipient results.
    pub async fn send_to_users(
        &self,
        user_ids: &[Id],
        payload: &PushPayload,
    ) -> Result<Vec<PushDeliveryResult>, Error> {
        let url = format!("{}/push", self.base_url);

        debug!("Pushing to {} user(s)", user_ids.len());

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "userIds": user_ids,
                "payload": payload,
            }))
            .send()
            .await?;

        if response.status().is_success() {
            let results: Vec<PushDeliveryResult> = response.json().await.map_err(|e| {
                warn!("Failed to parse push relay response: {e:?}");
                Error {
                    source: Some(Box::new(e)),
                    error_kind: DomainErrorKind::External(ExternalErrorKind::Other(
                        "Invalid response from push relay".to_string(),
                    )),
                }
            })?;
            Ok(results)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            error!("Push relay API: {error_text}");
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
    async fn send_to_users_returns_per_recipient_results() {
        let delivered = Id::new_v4();
        let failed = Id::new_v4();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/push")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    {"userId": delivered, "success": true},
                    {"userId": failed, "success": false, "error": "no subscription"}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let client = PushClient::new(&server.url(), Duration::from_secs(5)).unwrap();
        let results = client
            .send_to_users(
                &[delivered, failed],
                &PushPayload {
                    title: "SOS nearby".to_string(),
                    body: "A neighbour needs help".to_string(),
                    data: json!({}),
                },
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[1].error.as_deref(), Some("no subscription"));
    }
}
