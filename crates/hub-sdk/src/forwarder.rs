//! Outbound delivery to the local service, with result classification.

use std::time::Duration;

use hookly_protocol::{HubFrame, WebhookEnvelope};

use crate::HubError;

/// End-to-end budget for one forward, connect included.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Hop-by-hop headers that must not be replayed onto the local request.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// Outcome of one forward, in ack terms.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub permanent_failure: bool,
}

impl DeliveryOutcome {
    /// Classification:
    /// 2xx → success; 4xx → permanent failure; anything else that produced
    /// a response (5xx, and 1xx/3xx since redirects are not followed) →
    /// transient failure.
    fn from_status(status: u16) -> Self {
        if (200..300).contains(&status) {
            Self {
                success: true,
                status_code: Some(status),
                error_message: None,
                permanent_failure: false,
            }
        } else {
            Self {
                success: false,
                status_code: Some(status),
                error_message: Some(format!("destination returned {status}")),
                permanent_failure: (400..500).contains(&status),
            }
        }
    }

    /// Transport-level failure (timeout, refused, DNS): transient, with
    /// the OS-level cause chain preserved for the operator.
    fn from_transport_error(err: &reqwest::Error) -> Self {
        Self {
            success: false,
            status_code: None,
            error_message: Some(error_chain(err)),
            permanent_failure: false,
        }
    }

    pub fn into_ack(self, webhook_id: String) -> HubFrame {
        HubFrame::Ack {
            webhook_id,
            success: self.success,
            status_code: self.status_code,
            error_message: self.error_message,
            permanent_failure: self.permanent_failure,
        }
    }
}

pub struct Forwarder {
    http: reqwest::Client,
}

impl Forwarder {
    pub fn new() -> Result<Self, HubError> {
        Self::with_timeout(FORWARD_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, HubError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| HubError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// POST the envelope's payload to `destination` and classify the result.
    ///
    /// Captured headers are replayed minus the hop-by-hop set; the client
    /// computes its own framing headers. `Content-Type` defaults to
    /// `application/json` when the producer sent none, and Hookly's own
    /// tracing headers are always added.
    pub async fn forward(&self, envelope: &WebhookEnvelope, destination: &str) -> DeliveryOutcome {
        let mut request = self.http.post(destination);

        let mut has_content_type = false;
        for (name, value) in &envelope.headers {
            let lowered = name.to_ascii_lowercase();
            if HOP_BY_HOP.contains(&lowered.as_str()) {
                continue;
            }
            if lowered == "content-type" {
                has_content_type = true;
            }
            request = request.header(name, value);
        }
        if !has_content_type {
            request = request.header("content-type", "application/json");
        }

        request = request
            .header("x-hookly-webhook-id", &envelope.id)
            .header("x-hookly-attempt", envelope.attempt.to_string())
            .body(envelope.payload.clone());

        match request.send().await {
            Ok(response) => DeliveryOutcome::from_status(response.status().as_u16()),
            Err(err) => {
                tracing::debug!(
                    webhook_id = %envelope.id,
                    destination,
                    error = %err,
                    "forward transport error"
                );
                DeliveryOutcome::from_transport_error(&err)
            }
        }
    }
}

/// Flatten an error and its sources into one line, so "connection refused"
/// survives reqwest's outer wrapping.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
