use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use crate::outbound::RoutingContext;

/// Country-code characters kept verbatim in front of the normalized sender.
pub const COUNTRY_CODE_LEN: usize = 2;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

impl WebhookPayload {
    pub fn from_value(value: serde_json::Value) -> Result<Self, WebhookError> {
        serde_json::from_value(value).map_err(|error| WebhookError::Malformed(error.to_string()))
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct WebhookEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct WebhookChange {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ChangeValue {
    #[serde(default)]
    pub messaging_product: Option<String>,
    #[serde(default)]
    pub metadata: Option<ChangeMetadata>,
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ChangeMetadata {
    #[serde(default)]
    pub display_phone_number: Option<String>,
    pub phone_number_id: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct InboundMessage {
    pub from: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<TextBody>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TextBody {
    pub body: String,
}

/// One text fragment ready for the debounce buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundText {
    pub sender: String,
    pub text: String,
    pub routing: RoutingContext,
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    Malformed(String),
    #[error("webhook change carries messages but no metadata.phone_number_id")]
    MissingRoutingMetadata,
    #[error("inbound message has an empty sender")]
    EmptySender,
}

/// Drops `prefix_len` characters after the country code.
///
/// The provider reports Mexican mobile numbers as `521XXXXXXXXXX`, while the
/// send endpoint and the rest of the system key conversations on
/// `52XXXXXXXXXX`. Numbers too short to carry the prefix come back unchanged.
pub fn normalize_sender_number(raw: &str, prefix_len: usize) -> String {
    let trimmed = raw.trim();
    let chars: Vec<char> = trimmed.chars().collect();
    if prefix_len == 0 || chars.len() <= COUNTRY_CODE_LEN + prefix_len {
        return trimmed.to_string();
    }

    chars[..COUNTRY_CODE_LEN].iter().chain(chars[COUNTRY_CODE_LEN + prefix_len..].iter()).collect()
}

/// Extracts every text message across all entries and changes.
///
/// Non-text messages (images, reactions, status callbacks) are skipped so the
/// provider gets its acknowledgement without anything reaching the buffer.
pub fn parse_inbound(
    payload: &WebhookPayload,
    prefix_len: usize,
) -> Result<Vec<InboundText>, WebhookError> {
    let mut inbound = Vec::new();

    for change in payload.entry.iter().flat_map(|entry| entry.changes.iter()) {
        let text_messages: Vec<&InboundMessage> = change
            .value
            .messages
            .iter()
            .filter(|message| message.message_type == "text" && message.text.is_some())
            .collect();
        if text_messages.is_empty() {
            continue;
        }

        let metadata =
            change.value.metadata.as_ref().ok_or(WebhookError::MissingRoutingMetadata)?;
        if metadata.phone_number_id.trim().is_empty() {
            return Err(WebhookError::MissingRoutingMetadata);
        }

        for message in text_messages {
            if message.from.trim().is_empty() {
                return Err(WebhookError::EmptySender);
            }
            let Some(text) = message.text.as_ref() else { continue };

            inbound.push(InboundText {
                sender: normalize_sender_number(&message.from, prefix_len),
                text: text.body.clone(),
                routing: RoutingContext::new(metadata.phone_number_id.trim()),
                provider_message_id: message.id.clone(),
            });
        }
    }

    Ok(inbound)
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode", default)]
    pub mode: String,
    #[serde(rename = "hub.challenge", default)]
    pub challenge: String,
    #[serde(rename = "hub.verify_token", default)]
    pub verify_token: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Invalid verify token")]
    TokenMismatch,
}

/// Subscription handshake: echo the challenge when the token matches.
pub fn verify_subscription(
    query: &VerifyQuery,
    expected: &SecretString,
) -> Result<String, VerificationError> {
    let expected = expected.expose_secret();
    if !expected.is_empty() && query.verify_token == expected {
        Ok(query.challenge.clone())
    } else {
        Err(VerificationError::TokenMismatch)
    }
}
