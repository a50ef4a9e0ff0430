//! Telemetry sinks: where decoded readings and reachability states go.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use strum_macros::Display;
use tracing::{debug, instrument};

use crate::error::SinkError;

/// Reachability of a supervised peripheral, rendered the way the home
/// automation bus expects switch states.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum DeviceStatus {
    On,
    Off,
}

/// Destination for decoded measurements and device status changes.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn push_status(&self, item: &str, status: DeviceStatus) -> Result<(), SinkError>;

    async fn push_reading(&self, item: &str, value: &str) -> Result<(), SinkError>;
}

/// Sink writing item states to an openHAB instance over its REST API.
#[derive(Debug)]
pub struct OpenhabSink {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl OpenhabSink {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    #[instrument(skip(self, value), level = "debug", fields(item))]
    async fn put_state(&self, item: &str, value: &str) -> Result<(), SinkError> {
        let url = format!("{}/rest/items/{}/state", self.base_url, item);
        let mut request = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "text/plain")
            .body(value.to_string());
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected {
                item: item.to_string(),
                status: status.as_u16(),
            });
        }
        debug!(item, value, "item state updated");
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for OpenhabSink {
    async fn push_status(&self, item: &str, status: DeviceStatus) -> Result<(), SinkError> {
        self.put_state(item, &status.to_string()).await
    }

    async fn push_reading(&self, item: &str, value: &str) -> Result<(), SinkError> {
        self.put_state(item, value).await
    }
}

/// One push observed by the recording sink.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SinkEvent {
    Status { item: String, status: DeviceStatus },
    Reading { item: String, value: String },
}

/// In-memory sink recording every push, for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    /// Events pushed so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().expect("recording sink lock poisoned").clone()
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn push_status(&self, item: &str, status: DeviceStatus) -> Result<(), SinkError> {
        self.events
            .lock()
            .expect("recording sink lock poisoned")
            .push(SinkEvent::Status {
                item: item.to_string(),
                status,
            });
        Ok(())
    }

    async fn push_reading(&self, item: &str, value: &str) -> Result<(), SinkError> {
        self.events
            .lock()
            .expect("recording sink lock poisoned")
            .push(SinkEvent::Reading {
                item: item.to_string(),
                value: value.to_string(),
            });
        Ok(())
    }
}
