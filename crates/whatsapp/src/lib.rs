//! WhatsApp Integration - Cloud API edge of portline
//!
//! This crate owns everything that speaks the messaging provider's dialect:
//! - **Webhook** (`webhook`) - inbound payload parsing, sender normalization,
//!   and the `hub.*` subscription handshake
//! - **Outbound** (`outbound`) - text delivery through the Cloud API
//!   send-message endpoint with bearer auth and bounded retries
//!
//! # Architecture
//!
//! ```text
//! Cloud API webhook → parse_inbound → InboundText ─┐
//!                                                  ↓
//!                               agent debounce buffer → orchestrator
//!                                                  ↓
//! Cloud API  ←  MessageSender::send_text  ←  response text
//! ```
//!
//! # Key Types
//!
//! - `InboundText` - one text fragment with its normalized sender and routing id
//! - `RoutingContext` - the provider `phone_number_id` a reply must go out on
//! - `MessageSender` - trait for outbound delivery (`CloudApiSender`, `InMemorySender`)

pub mod outbound;
pub mod webhook;

pub use outbound::{
    CloudApiSender, DeliveryError, InMemorySender, MessageSender, OutboundTextMessage, RetryPolicy,
    RoutingContext,
};
pub use webhook::{
    normalize_sender_number, parse_inbound, verify_subscription, InboundText, VerificationError,
    VerifyQuery, WebhookError, WebhookPayload,
};
