//! Fire-and-forget payment callbacks

use crate::metrics::metrics;
use crate::structured_logging::FlowLogger;
use reqwest::Client;
use serde::Serialize;
use solana_sdk::signature::Signature;
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CallbackBody {
    signature_id: String,
}

/// POSTs `{"signatureId": ...}` to a merchant callback after a confirmed
/// payment. Delivery is attempted once; the outcome is only logged.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// Spawn the delivery and return immediately. The handle is only useful
    /// to tests; callers normally drop it.
    pub fn notify(&self, url: Url, signature: Signature, log: FlowLogger) -> JoinHandle<()> {
        let client = self.client.clone();
        tokio::spawn(async move {
            let body = CallbackBody {
                signature_id: signature.to_string(),
            };
            match client.post(url.clone()).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    metrics().webhooks_delivered.inc();
                    log.log_webhook(url.as_str(), true, "");
                }
                Ok(response) => {
                    metrics().webhooks_failed.inc();
                    log.log_webhook(url.as_str(), false, &format!("status {}", response.status()));
                }
                Err(e) => {
                    metrics().webhooks_failed.inc();
                    log.log_webhook(url.as_str(), false, &e.to_string());
                }
            }
        })
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_notify_posts_signature_id() {
        let mut server = mockito::Server::new_async().await;
        let signature = Signature::from([7u8; 64]);
        let mock = server
            .mock("POST", "/paid")
            .match_body(Matcher::Json(serde_json::json!({
                "signatureId": signature.to_string()
            })))
            .with_status(200)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/paid", server.url())).unwrap();
        WebhookNotifier::default()
            .notify(url, signature, FlowLogger::default())
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_notify_swallows_receiver_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/paid")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/paid", server.url())).unwrap();
        let handle = WebhookNotifier::default().notify(url, Signature::from([8u8; 64]), FlowLogger::default());

        // Task completes normally and is not retried
        assert!(handle.await.is_ok());
        mock.assert_async().await;
    }
}
