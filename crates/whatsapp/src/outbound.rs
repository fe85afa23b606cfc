use std::time::Duration;

use async_trait::async_trait;
use portline_core::sanitize::mask_phone;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Provider-side identifier of the business number a reply is sent from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingContext {
    pub phone_number_id: String,
}

impl RoutingContext {
    pub fn new(phone_number_id: impl Into<String>) -> Self {
        Self { phone_number_id: phone_number_id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundTextMessage {
    pub messaging_product: &'static str,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub text: OutboundText,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundText {
    pub body: String,
}

impl OutboundTextMessage {
    pub fn text(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            messaging_product: "whatsapp",
            to: to.into(),
            message_type: "text",
            text: OutboundText { body: body.into() },
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery transport failed: {0}")]
    Transport(String),
    #[error("provider rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("delivery client misconfigured: {0}")]
    Client(String),
}

impl DeliveryError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Client(_) => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 250, max_delay_ms: 2_000 }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(
        &self,
        to: &str,
        body: &str,
        routing: &RoutingContext,
    ) -> Result<(), DeliveryError>;
}

/// Cloud API sender: `POST {api_url}{phone_number_id}/messages`.
pub struct CloudApiSender {
    http: reqwest::Client,
    api_url: String,
    access_token: SecretString,
    retry: RetryPolicy,
}

impl CloudApiSender {
    pub fn new(
        api_url: impl Into<String>,
        access_token: SecretString,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| DeliveryError::Client(error.to_string()))?;
        let mut api_url = api_url.into();
        if !api_url.ends_with('/') {
            api_url.push('/');
        }
        Ok(Self { http, api_url, access_token, retry })
    }

    pub fn endpoint(&self, routing: &RoutingContext) -> String {
        format!("{}{}/messages", self.api_url, routing.phone_number_id)
    }

    async fn post_once(
        &self,
        url: &str,
        message: &OutboundTextMessage,
    ) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(self.access_token.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(message)
            .send()
            .await
            .map_err(|error| DeliveryError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected { status: status.as_u16(), body })
    }
}

#[async_trait]
impl MessageSender for CloudApiSender {
    async fn send_text(
        &self,
        to: &str,
        body: &str,
        routing: &RoutingContext,
    ) -> Result<(), DeliveryError> {
        let url = self.endpoint(routing);
        let message = OutboundTextMessage::text(to, body);

        let mut attempt = 0;
        loop {
            match self.post_once(&url, &message).await {
                Ok(()) => {
                    info!(
                        event_name = "egress.whatsapp.message_sent",
                        recipient = %mask_phone(to),
                        attempt,
                        "whatsapp message delivered"
                    );
                    return Ok(());
                }
                Err(error) if error.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        event_name = "egress.whatsapp.retrying",
                        recipient = %mask_phone(to),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "whatsapp delivery failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Records deliveries instead of sending them.
#[derive(Default)]
pub struct InMemorySender {
    sent: Mutex<Vec<(RoutingContext, OutboundTextMessage)>>,
    failure: Option<DeliveryError>,
}

impl InMemorySender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: DeliveryError) -> Self {
        Self { sent: Mutex::default(), failure: Some(error) }
    }

    pub async fn sent(&self) -> Vec<(RoutingContext, OutboundTextMessage)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MessageSender for InMemorySender {
    async fn send_text(
        &self,
        to: &str,
        body: &str,
        routing: &RoutingContext,
    ) -> Result<(), DeliveryError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.sent.lock().await.push((routing.clone(), OutboundTextMessage::text(to, body)));
        Ok(())
    }
}
