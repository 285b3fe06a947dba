//! Alert delivery.
//!
//! The monitoring loops only know the [`NotificationSink`] trait; which
//! medium carries the text is decided at startup from config.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// Hand `message` to `sink`, logging and swallowing any failure.
pub async fn deliver(sink: &dyn NotificationSink, message: &str) {
    if let Err(e) = sink.notify(message).await {
        warn!(error = %e, message = %message, "Failed to deliver notification");
    }
}

// ---------------------------------------------------------------------------
// LogSink
// ---------------------------------------------------------------------------

/// Writes each alert to the tracing log at `WARN`.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, message: &str) -> Result<()> {
        warn!(alert = %message, "Notification");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WebhookSink
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

/// POSTs `{"text": "<alert>"}` to a webhook (Slack-style incoming hooks
/// accept this shape as-is).
///
/// When a secret is configured the body is signed with HMAC-SHA256 and the
/// lowercase hex digest is sent in `X-Signature`.
///
/// Every request is bounded by `timeout`; an endpoint that never answers
/// fails the delivery instead of holding up the monitoring cycle.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    http: Client,
    url: String,
    secret: Option<String>,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
            secret,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, message: &str) -> Result<()> {
        let body = serde_json::to_vec(&WebhookPayload { text: message })
            .context("Failed to serialize webhook payload")?;

        let mut request = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(secret) = &self.secret {
            request = request.header("X-Signature", sign(secret, &body));
        }

        request
            .body(body)
            .send()
            .await
            .context("Webhook request failed")?
            .error_for_status()
            .context("Webhook returned error status")?;

        debug!(url = %self.url, "Notification delivered to webhook");
        Ok(())
    }
}

/// HMAC-SHA256 of `body` keyed by `secret`, lowercase hex.
fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

// ---------------------------------------------------------------------------
// Test sink
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use tokio::sync::Mutex;

    use super::*;

    /// Records every message; can be switched into a failing mode.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        messages: Arc<Mutex<Vec<String>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub async fn messages(&self) -> Vec<String> {
            self.messages.lock().await.clone()
        }
    }

    /// Accepts connections and holds them open without ever replying.
    /// Returns a webhook URL pointing at it.
    pub async fn silent_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}/hook")
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, message: &str) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("sink offline");
            }
            self.messages.lock().await.push(message.to_owned());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        testing::{silent_endpoint, RecordingSink},
        *,
    };

    #[test]
    fn signature_is_stable_hex() {
        let a = sign("secret", b"{\"text\":\"hi\"}");
        let b = sign("secret", b"{\"text\":\"hi\"}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_depends_on_secret() {
        assert_ne!(sign("one", b"body"), sign("two", b"body"));
    }

    #[test]
    fn payload_shape() {
        let body = serde_json::to_value(WebhookPayload { text: "alert" }).unwrap();
        assert_eq!(body, serde_json::json!({ "text": "alert" }));
    }

    #[tokio::test]
    async fn deliver_swallows_sink_failures() {
        let sink = RecordingSink::new();
        sink.set_failing(true);
        deliver(&sink, "lost").await;
        assert!(sink.messages().await.is_empty());

        sink.set_failing(false);
        deliver(&sink, "kept").await;
        assert_eq!(sink.messages().await, vec!["kept".to_owned()]);
    }

    #[tokio::test]
    async fn unresponsive_webhook_times_out() {
        let url = silent_endpoint().await;
        let sink = WebhookSink::new(url, Some("s".into()), Duration::from_millis(200)).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), sink.notify("alert")).await;
        let result = outcome.expect("webhook request was not bounded by its timeout");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn log_sink_never_fails() {
        assert!(LogSink.notify("Temperature violation").await.is_ok());
    }
}
