//! The outbound webhook transport used by notification channels.

use crate::config::WebhookConfig;
use crate::core::WebhookSender;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Longest response body kept in a `WebhookError::Status`.
const MAX_ERROR_BODY_LEN: usize = 512;

/// HTTP methods a webhook call may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
}

impl HttpMethod {
    /// The method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

/// A fully rendered webhook call.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: String,
    pub content_type: String,
    /// Optional `(username, password)` for HTTP basic auth.
    pub basic_auth: Option<(String, String)>,
}

impl WebhookRequest {
    /// A JSON `POST` to `url`.
    pub fn post_json(url: impl Into<String>, body: String) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            body,
            content_type: "application/json".to_string(),
            basic_auth: None,
        }
    }
}

/// Why an outbound webhook request did not succeed.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("webhook request cancelled")]
    Cancelled,
}

/// Cuts `body` to at most `max_len` bytes without splitting a character.
pub fn truncate_body(body: &str, max_len: usize) -> &str {
    if body.len() <= max_len {
        return body;
    }
    let mut end = max_len;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// A `WebhookSender` backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    /// Creates a new `HttpWebhookSender` from the transport configuration.
    pub fn new(config: &WebhookConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    async fn execute(&self, request: WebhookRequest) -> Result<(), WebhookError> {
        let method = match request.method {
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .header(reqwest::header::CONTENT_TYPE, request.content_type)
            .body(request.body);
        if let Some((username, password)) = &request.basic_auth {
            builder = builder.basic_auth(username, Some(password));
        }

        let res = builder.send().await?;
        let status = res.status();
        if status.is_success() {
            debug!(status = %status, "Webhook delivered");
            return Ok(());
        }

        let text = res.text().await.unwrap_or_default();
        Err(WebhookError::Status {
            status: status.as_u16(),
            body: truncate_body(&text, MAX_ERROR_BODY_LEN).to_string(),
        })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    #[instrument(skip_all, fields(method = request.method.as_str(), url = %request.url))]
    async fn send(
        &self,
        cancel: &CancellationToken,
        request: WebhookRequest,
    ) -> Result<(), WebhookError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WebhookError::Cancelled),
            result = self.execute(request) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sender(timeout_ms: u64) -> HttpWebhookSender {
        HttpWebhookSender::new(&WebhookConfig {
            timeout_ms,
            user_agent: "alertrelay-test".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        assert_eq!(truncate_body("hello", 10), "hello");
        assert_eq!(truncate_body("hello", 3), "hel");
        // "é" is two bytes; cutting inside it must back off.
        assert_eq!(truncate_body("aé", 2), "a");
    }

    #[tokio::test]
    async fn test_send_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"a":1}"#))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let request = WebhookRequest::post_json(format!("{}/hook", server.uri()), r#"{"a":1}"#.to_string());
        let result = sender(1000).send(&CancellationToken::new(), request).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_send_with_basic_auth_and_put() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/hook"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = WebhookRequest::post_json(format!("{}/hook", server.uri()), "{}".to_string());
        request.method = HttpMethod::Put;
        request.basic_auth = Some(("user".to_string(), "pass".to_string()));

        let result = sender(1000).send(&CancellationToken::new(), request).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_send_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let request = WebhookRequest::post_json(server.uri(), "{}".to_string());
        let result = sender(1000).send(&CancellationToken::new(), request).await;

        match result {
            Err(WebhookError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_aborts_on_cancellation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let request = WebhookRequest::post_json(server.uri(), "{}".to_string());
        let started = std::time::Instant::now();
        let result = sender(10_000).send(&cancel, request).await;

        assert!(matches!(result, Err(WebhookError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_send_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let request = WebhookRequest::post_json(server.uri(), "{}".to_string());
        let result = sender(200).send(&CancellationToken::new(), request).await;

        match result {
            Err(WebhookError::Request(e)) => assert!(e.is_timeout()),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
