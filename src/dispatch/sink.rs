//! The external incident-management service boundary.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::incident::IncidentRecord;

/// Failure delivering an incident record to the external service.
///
/// Timeouts, connection failures, and non-2xx statuses all land here; the
/// dispatcher treats them uniformly by queueing the record for retry.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// HTTP transport or status failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Sink reported itself unavailable (used by non-HTTP sinks and tests).
    #[error("delivery unavailable: {0}")]
    Unavailable(String),
}

/// Destination for confirmed incident records.
///
/// One method, one payload: the engine consumes nothing from the response
/// beyond success/failure.
#[async_trait]
pub trait IncidentSink: Send + Sync {
    /// Sink name for logs.
    fn name(&self) -> &str;

    /// Deliver one incident record.
    async fn deliver(&self, record: &IncidentRecord) -> Result<(), DeliveryError>;
}

/// HTTP sink: POSTs the record as JSON with a static `x-api-key` header.
pub struct HttpIncidentSink {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpIncidentSink {
    /// Build a sink for `endpoint` with a per-attempt request timeout.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }

    /// The configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl IncidentSink for HttpIncidentSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, record: &IncidentRecord) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.endpoint).json(record);
        if !self.api_key.is_empty() {
            request = request.header("x-api-key", &self.api_key);
        }

        request.send().await?.error_for_status()?;
        Ok(())
    }
}
