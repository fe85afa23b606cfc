//! HTTP surface of the assistant.
//!
//! Chat endpoints:
//! - `GET  /api/chat/ask?message&phoneNumber`: synchronous turn, plain-text reply
//! - `GET  /api/chat/whatsapp`: webhook subscription handshake
//! - `POST /api/chat/whatsapp`: inbound webhook, buffered for processing
//!
//! Conversation management:
//! - `GET|POST /api/conversations/{key}/state`
//! - `GET|POST /api/conversations/{key}/context`
//! - `GET      /api/conversations/{key}/stats`
//! - `DELETE   /api/conversations/{key}`

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use portline_agent::buffer::MessageBuffer;
use portline_agent::context::ContextDataManager;
use portline_agent::runtime::AgentRuntime;
use portline_agent::state::{ConversationError, ConversationService};
use portline_core::audit::AuditActor;
use portline_core::domain::conversation::ConversationKey;
use portline_core::errors::{ApplicationError, DomainError, InterfaceError};
use portline_core::flows::ConversationState;
use portline_core::sanitize::mask_phone;
use portline_whatsapp::{parse_inbound, verify_subscription, VerifyQuery, WebhookPayload};

#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<AgentRuntime>,
    pub context: Arc<ContextDataManager>,
    pub buffer: MessageBuffer,
    pub verify_token: SecretString,
    pub sender_prefix_len: usize,
}

impl ApiState {
    fn conversations(&self) -> &ConversationService {
        self.runtime.conversations()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/chat/ask", get(ask))
        .route("/api/chat/whatsapp", get(verify_webhook).post(receive_webhook))
        .route("/api/conversations/{key}/state", get(get_state).post(update_state))
        .route("/api/conversations/{key}/context", get(get_context).post(store_context))
        .route("/api/conversations/{key}/stats", get(get_stats))
        .route("/api/conversations/{key}", delete(reset_conversation))
        .with_state(state)
}

/// Interface error rendered as `{error, correlationId}`.
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: Uuid::new_v4().to_string(),
        })
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self(InterfaceError::NotFound {
            message: message.into(),
            correlation_id: Uuid::new_v4().to_string(),
        })
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        Self(error.into_interface(Uuid::new_v4().to_string()))
    }
}

impl From<ConversationError> for ApiError {
    fn from(error: ConversationError) -> Self {
        ApplicationError::from(error).into()
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        ApplicationError::from(error).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(
            event_name = "api.request_failed",
            correlation_id = %self.0.correlation_id(),
            status = status.as_u16(),
            error = %self.0,
            "request failed"
        );
        let detail = match &self.0 {
            InterfaceError::BadRequest { message, .. } | InterfaceError::NotFound { message, .. } => {
                message.clone()
            }
            other => other.user_message().to_string(),
        };
        let body = json!({ "error": detail, "correlationId": self.0.correlation_id() });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct AskQuery {
    pub message: String,
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
}

async fn ask(State(state): State<ApiState>, Query(query): Query<AskQuery>) -> String {
    state.runtime.handle_message(&query.message, &query.phone_number).await
}

async fn verify_webhook(
    State(state): State<ApiState>,
    Query(query): Query<VerifyQuery>,
) -> Result<String, (StatusCode, String)> {
    verify_subscription(&query, &state.verify_token).map_err(|error| {
        warn!(event_name = "ingress.whatsapp.verification_failed", mode = %query.mode, "webhook verification rejected");
        (StatusCode::FORBIDDEN, error.to_string())
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub status: String,
    pub message: String,
    pub buffered_messages: usize,
}

impl WebhookAck {
    fn new(status: &str, message: &str, buffered_messages: usize) -> Self {
        Self { status: status.to_string(), message: message.to_string(), buffered_messages }
    }
}

async fn receive_webhook(
    State(state): State<ApiState>,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let failed = |reason: &str| {
        warn!(event_name = "ingress.whatsapp.rejected", reason, "webhook payload rejected");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(WebhookAck::new("Error", "Failed to process message", 0)))
    };

    let inbound = match serde_json::from_slice::<Value>(&body)
        .map_err(|error| error.to_string())
        .and_then(|value| WebhookPayload::from_value(value).map_err(|error| error.to_string()))
        .and_then(|payload| {
            parse_inbound(&payload, state.sender_prefix_len).map_err(|error| error.to_string())
        }) {
        Ok(inbound) => inbound,
        Err(reason) => return failed(&reason),
    };

    let Some(last_sender) = inbound.last().map(|message| message.sender.clone()) else {
        return (
            StatusCode::OK,
            Json(WebhookAck::new("Ignored", "No text messages in payload", 0)),
        );
    };

    for message in inbound {
        info!(
            event_name = "ingress.whatsapp.received",
            sender = %mask_phone(&message.sender),
            chars = message.text.chars().count(),
            "inbound text received"
        );
        if let Err(buffer_error) = state.buffer.add_message(&message.sender, &message.text, message.routing) {
            return failed(&buffer_error.to_string());
        }
    }

    (
        StatusCode::ACCEPTED,
        Json(WebhookAck::new(
            "Message received",
            "Your message has been queued and will be processed shortly",
            state.buffer.buffer_size(&last_sender),
        )),
    )
}

async fn get_state(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let current = state.conversations().current_state(&ConversationKey::new(&key)).await?;
    Ok(Json(json!({ "conversationId": key, "currentState": current })))
}

#[derive(Debug, Deserialize)]
pub struct StateUpdate {
    pub state: String,
}

async fn update_state(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(update): Json<StateUpdate>,
) -> Result<Json<Value>, ApiError> {
    let target = ConversationState::from_str(update.state.trim())
        .map_err(|error| ApiError::bad_request(error.to_string()))?;
    let success = state
        .conversations()
        .transition_by(&ConversationKey::new(&key), target, AuditActor::Operator)
        .await?;
    Ok(Json(json!({ "success": success, "conversationId": key, "newState": target })))
}

async fn get_context(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let context = state.conversations().all_context(&ConversationKey::new(&key)).await?;
    Ok(Json(json!({ "conversationId": key, "context": context })))
}

async fn store_context(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(entries): Json<Map<String, Value>>,
) -> Result<Json<Value>, ApiError> {
    let protected = state.context.protect_entries(entries).map_err(DomainError::from)?;
    state.conversations().store_context_map(&ConversationKey::new(&key), protected).await?;
    Ok(Json(json!({ "status": "success", "message": "Context data stored successfully" })))
}

async fn get_stats(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let stats = state
        .conversations()
        .stats(&ConversationKey::new(&key))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no conversation for {}", mask_phone(&key))))?;
    Ok(Json(json!({
        "conversationId": stats.conversation_key,
        "currentState": stats.current_state,
        "createdAt": stats.created_at,
        "updatedAt": stats.updated_at,
        "isActive": stats.active,
        "messageCount": stats.message_count,
    })))
}

async fn reset_conversation(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.conversations().reset(&ConversationKey::new(&key)).await?;
    Ok(Json(json!({ "status": "success", "message": "Conversation reset successfully" })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use portline_agent::buffer::{BatchHandler, CoalescedBatch, MessageBuffer};
    use portline_agent::context::ContextDataManager;
    use portline_agent::llm::{ModelResponse, ScriptedLlmClient};
    use portline_agent::prompt::PromptBuilder;
    use portline_agent::retrieval::NoopRetriever;
    use portline_agent::runtime::{AgentRuntime, RuntimeSettings};
    use portline_agent::state::ConversationService;
    use portline_agent::tools::{ToolInvoker, ToolRegistry};
    use portline_core::crypto::AesGcmCipher;
    use portline_core::domain::context::ContextKey;
    use portline_core::domain::conversation::ConversationKey;
    use portline_db::{InMemoryConversationRepository, InMemoryMessageRepository};

    use crate::api::{router, ApiState, WebhookAck};

    struct ChannelHandler {
        tx: mpsc::UnboundedSender<CoalescedBatch>,
    }

    #[async_trait]
    impl BatchHandler for ChannelHandler {
        async fn handle_batch(&self, batch: CoalescedBatch) {
            let _ = self.tx.send(batch);
        }
    }

    struct Fixture {
        app: Router,
        llm: Arc<ScriptedLlmClient>,
        conversations: Arc<ConversationService>,
        buffer: MessageBuffer,
        batches: mpsc::UnboundedReceiver<CoalescedBatch>,
    }

    fn fixture() -> Fixture {
        let conversations = Arc::new(ConversationService::new(
            Arc::new(InMemoryConversationRepository::default()),
            Arc::new(InMemoryMessageRepository::default()),
        ));
        let context = Arc::new(ContextDataManager::new(
            Arc::clone(&conversations),
            Arc::new(AesGcmCipher::from_key_bytes([3; 32])),
        ));
        let llm = Arc::new(ScriptedLlmClient::default());
        let runtime = Arc::new(AgentRuntime::new(
            Arc::clone(&conversations),
            Arc::new(ToolInvoker::new(ToolRegistry::default(), Arc::clone(&context))),
            llm.clone(),
            Arc::new(NoopRetriever),
            PromptBuilder::new().expect("prompt"),
            RuntimeSettings::default(),
        ));
        let (tx, batches) = mpsc::unbounded_channel();
        let buffer = MessageBuffer::new(Duration::from_secs(8), Arc::new(ChannelHandler { tx }));
        let app = router(ApiState {
            runtime,
            context,
            buffer: buffer.clone(),
            verify_token: "verify-me".to_string().into(),
            sender_prefix_len: 1,
        });
        Fixture { app, llm, conversations, buffer, batches }
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).expect("request")).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, bytes.to_vec())
    }

    fn as_json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).expect("json body")
    }

    fn webhook(from: &str, body: &str) -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "102290129340398",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": { "display_phone_number": "15550000000", "phone_number_id": "106540352242922" },
                        "messages": [{ "from": from, "id": "wamid.1", "timestamp": "1700000000", "type": "text", "text": { "body": body } }]
                    }
                }]
            }]
        })
    }

    #[tokio::test]
    async fn handshake_echoes_challenge_or_forbids() {
        let f = fixture();

        let (status, body) = call(
            &f.app,
            Method::GET,
            "/api/chat/whatsapp?hub.mode=subscribe&hub.challenge=1158201444&hub.verify_token=verify-me",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"1158201444");

        let (status, body) = call(
            &f.app,
            Method::GET,
            "/api/chat/whatsapp?hub.mode=subscribe&hub.challenge=1&hub.verify_token=wrong",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, b"Invalid verify token");
    }

    #[tokio::test(start_paused = true)]
    async fn webhook_fragments_are_buffered_under_the_normalized_key() {
        let mut f = fixture();

        let (status, body) =
            call(&f.app, Method::POST, "/api/chat/whatsapp", Some(webhook("5215512345678", "Hola"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let ack: WebhookAck = serde_json::from_slice(&body).expect("ack");
        assert_eq!(ack.buffered_messages, 1);
        assert_eq!(ack.status, "Message received");

        let (_, body) =
            call(&f.app, Method::POST, "/api/chat/whatsapp", Some(webhook("5215512345678", "Quiero un chip"))).await;
        assert_eq!(as_json(&body)["bufferedMessages"], 2);
        assert_eq!(f.buffer.buffer_size("525512345678"), 2);

        let batch = f.batches.recv().await.expect("batch");
        assert_eq!(batch.sender, "525512345678");
        assert_eq!(batch.text, "Hola\nQuiero un chip");
    }

    #[tokio::test]
    async fn malformed_webhook_gets_error_ack() {
        let f = fixture();

        let (status, body) = call(&f.app, Method::POST, "/api/chat/whatsapp", Some(json!({ "entry": "nope" }))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(as_json(&body), json!({ "status": "Error", "message": "Failed to process message", "bufferedMessages": 0 }));
    }

    #[tokio::test]
    async fn ask_runs_a_synchronous_turn() {
        let f = fixture();
        f.llm.push(Ok(ModelResponse::text("¡Hola! [STATE:INTENT_SELECTION]"))).await;

        let (status, body) = call(&f.app, Method::GET, "/api/chat/ask?message=Hola&phoneNumber=525512345678", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).expect("utf8"), "¡Hola!");
        let (_, body) = call(&f.app, Method::GET, "/api/conversations/525512345678/state", None).await;
        assert_eq!(as_json(&body)["currentState"], "INTENT_SELECTION");
    }

    #[tokio::test]
    async fn state_updates_are_validated() {
        let f = fixture();

        let (status, _) = call(
            &f.app,
            Method::POST,
            "/api/conversations/525512345678/state",
            Some(json!({ "state": "NOT_A_STATE" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = call(
            &f.app,
            Method::POST,
            "/api/conversations/525512345678/state",
            Some(json!({ "state": "COMPLETED" })),
        )
        .await;
        assert_eq!(as_json(&body)["success"], true);

        let (status, body) = call(
            &f.app,
            Method::POST,
            "/api/conversations/525512345678/state",
            Some(json!({ "state": "PAYMENT_PENDING" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body)["success"], false);
    }

    #[tokio::test]
    async fn context_stats_and_reset_round_out_the_surface() {
        let f = fixture();
        let key = ConversationKey::new("525512345678");

        let (status, _) = call(&f.app, Method::GET, "/api/conversations/525512345678/stats", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &f.app,
            Method::POST,
            "/api/conversations/525512345678/context",
            Some(json!({ "customer_id": 42, "portability_nip": "1234" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let stored = f.conversations.all_context(&key).await.expect("context");
        assert_eq!(stored.i64(ContextKey::CustomerId), Some(42));
        assert_ne!(stored.str(ContextKey::PortabilityNip), Some("1234"));

        let (_, body) = call(&f.app, Method::GET, "/api/conversations/525512345678/stats", None).await;
        let stats = as_json(&body);
        assert_eq!(stats["currentState"], "INITIAL");
        assert_eq!(stats["isActive"], true);
        assert_eq!(stats["messageCount"], 0);

        let (status, _) = call(&f.app, Method::DELETE, "/api/conversations/525512345678", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&f.app, Method::GET, "/api/conversations/525512345678/context", None).await;
        assert_eq!(as_json(&body)["context"], json!({}));
    }
}
