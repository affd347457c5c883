use super::{CompletionPayload, RunNotifier};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(body: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Canonical form of the payload (compact, keys sorted) plus its `signature` field.
///
/// The signature covers the canonical JSON of the payload without the signature itself.
pub fn signed_body(payload: &CompletionPayload, secret: &str) -> Result<Value> {
    // serde_json maps are ordered by key, so this is the sorted-key canonical form.
    let mut value = serde_json::to_value(payload).context("serializing completion payload")?;
    let canonical = serde_json::to_string(&value).context("canonicalizing completion payload")?;
    let signature = sign(&canonical, secret);
    match value.as_object_mut() {
        Some(map) => {
            map.insert("signature".to_string(), Value::String(signature));
        }
        None => return Err(anyhow!("completion payload is not a JSON object")),
    }
    Ok(value)
}

#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    secret: String,
    client: Client,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: secret.into(),
            client: Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff: Duration::from_millis(100),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total attempts, at least one.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// First retry delay; doubles on each further attempt up to 2s.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << (attempt - 1).min(16))
            .min(MAX_BACKOFF)
    }

    /// Base delay with ±25% jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let factor = rand::rng().random_range(0.75..=1.25);
        self.base_delay(attempt).mul_f64(factor)
    }
}

#[async_trait]
impl RunNotifier for WebhookNotifier {
    async fn notify(&self, payload: &CompletionPayload) -> Result<()> {
        let body = signed_body(payload, &self.secret)?;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match res {
                Ok(_) => {
                    debug!(job_id = %payload.job_id, attempt, "completion webhook delivered");
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    warn!(error = %e, attempt, "completion webhook failed, retrying");
                    tokio::time::sleep(self.delay(attempt)).await;
                }
                Err(e) => {
                    return Err(anyhow!(
                        "completion webhook failed after {attempt} attempts: {e}"
                    ));
                }
            }
        }
    }
}
