use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::JobQueueConfig;
use crate::workflow::boundary::OutboundEvent;
use crate::workflow::errors::QueueError;
use crate::workflow::traits::JobQueue;

/// Wire shape of the event API. `id` is the deduplication key.
#[derive(Debug, Serialize)]
struct EventPayload<'a> {
    name: &'a str,
    data: &'a serde_json::Value,
    id: &'a str,
}

/// Sends events to an Inngest-compatible event endpoint.
#[derive(Debug, Clone)]
pub struct InngestQueue {
    http_client: HttpClient,
    endpoint: String,
}

impl InngestQueue {
    pub fn new(base_url: &str, event_key: &str, timeout: Duration) -> Result<Self, QueueError> {
        if event_key.trim().is_empty() {
            return Err(QueueError::NotConfigured("event key is empty".to_string()));
        }
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| QueueError::NotConfigured(err.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: event_endpoint(base_url, event_key),
        })
    }

    pub fn from_config(config: &JobQueueConfig) -> Result<Self, QueueError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| QueueError::NotConfigured("job_queue.base_url is not set".to_string()))?;
        let event_key = config.event_key.as_deref().ok_or_else(|| {
            QueueError::NotConfigured(
                "job_queue.event_key is not set (or INNGEST_EVENT_KEY)".to_string(),
            )
        })?;
        Self::new(
            base_url,
            event_key,
            Duration::from_millis(config.request_timeout_ms),
        )
    }
}

fn event_endpoint(base_url: &str, event_key: &str) -> String {
    format!("{}/e/{}", base_url.trim_end_matches('/'), event_key)
}

#[async_trait]
impl JobQueue for InngestQueue {
    async fn send(&self, event: &OutboundEvent) -> Result<(), QueueError> {
        let payload = EventPayload {
            name: &event.name,
            data: &event.data,
            id: &event.idempotency_key,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|err| QueueError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueueError::Rejected {
                event: event.name.clone(),
                status: status.as_u16(),
            });
        }

        debug!(
            event_name = %event.name,
            idempotency_key = %event.idempotency_key,
            "Event accepted by job queue"
        );
        Ok(())
    }
}
