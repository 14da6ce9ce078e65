//! Callback notifier: reports a run's result to the caller's endpoint.
//!
//! Delivery is best-effort. A payload is POSTed whole on every attempt;
//! only HTTP 200 counts as delivered. Failures are retried with exponential
//! backoff (1s, 2s, 4s, ...) up to [`RetryPolicy::max_attempts`], after which
//! the failure is logged and the notifier returns normally.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::models::NotificationPayload;

/// Transport seam for callback delivery.
#[async_trait]
pub trait CallbackSink: Send + Sync {
    /// POST `payload` to `url` and return the HTTP status.
    async fn post(&self, url: &str, payload: &NotificationPayload) -> Result<u16>;
}

/// reqwest-backed sink that sends the payload as JSON.
pub struct HttpCallbackSink {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpCallbackSink {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl CallbackSink for HttpCallbackSink {
    async fn post(&self, url: &str, payload: &NotificationPayload) -> Result<u16> {
        let resp = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Failed to POST callback to {}", url))?;
        Ok(resp.status().as_u16())
    }
}

/// Attempt budget and backoff base for callback delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

/// What happened to a notification, for the run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyOutcome {
    pub delivered: bool,
    pub attempts: u32,
}

const DELIVERED: u16 = 200;

pub struct CallbackNotifier {
    sink: Arc<dyn CallbackSink>,
    policy: RetryPolicy,
}

impl CallbackNotifier {
    pub fn new(sink: Arc<dyn CallbackSink>, policy: RetryPolicy) -> Self {
        Self { sink, policy }
    }

    /// Deliver `payload` to `endpoint`. Never fails; see [`NotifyOutcome`].
    pub async fn notify(&self, payload: &NotificationPayload, endpoint: &str) -> NotifyOutcome {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.sink.post(endpoint, payload).await {
                Ok(DELIVERED) => {
                    tracing::info!(task = %payload.task, round = payload.round, attempt, "callback delivered");
                    return NotifyOutcome {
                        delivered: true,
                        attempts: attempt,
                    };
                }
                Ok(status) => {
                    tracing::warn!(task = %payload.task, attempt, status, "callback rejected");
                }
                Err(e) => {
                    tracing::warn!(task = %payload.task, attempt, error = %format!("{e:#}"), "callback transport error");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.delay_after(attempt)).await;
            }
        }

        tracing::error!(
            task = %payload.task,
            round = payload.round,
            endpoint,
            attempts = max_attempts,
            "callback delivery failed; giving up"
        );
        NotifyOutcome {
            delivered: false,
            attempts: max_attempts,
        }
    }
}
