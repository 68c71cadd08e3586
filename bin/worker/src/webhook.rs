//! HTTP webhook sender.

use async_trait::async_trait;
use keel_workflow::{TransportError, WebhookRequest, WebhookSender};
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::debug;

/// Sends webhook calls with a shared HTTP client.
#[derive(Clone)]
pub struct HttpWebhookSender {
    client: Client,
}

impl HttpWebhookSender {
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

fn method(name: &str) -> Result<Method, TransportError> {
    Method::from_bytes(name.as_bytes()).map_err(|_| TransportError::Rejected {
        reason: format!("unsupported method {name}"),
    })
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, request: &WebhookRequest) -> Result<u16, TransportError> {
        let url = reqwest::Url::parse(&request.url).map_err(|_| TransportError::InvalidAddress {
            address: request.url.clone(),
        })?;
        let method = method(&request.method)?;

        let mut builder = self.client.request(method.clone(), url);
        if method != Method::GET {
            builder = builder.json(&request.payload);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Unavailable {
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        debug!(url = %request.url, method = %method, status, "webhook delivered");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_parse() {
        assert_eq!(method("PATCH").unwrap(), Method::PATCH);
        assert!(method("NOT A METHOD").is_err());
    }

    #[tokio::test]
    async fn malformed_url_is_invalid_address() {
        let sender = HttpWebhookSender::new().unwrap();
        let request = WebhookRequest {
            method: "POST".to_string(),
            url: "not a url".to_string(),
            payload: serde_json::Value::Null,
        };
        assert_eq!(
            sender.send(&request).await.unwrap_err(),
            TransportError::InvalidAddress {
                address: "not a url".to_string()
            }
        );
    }
}
