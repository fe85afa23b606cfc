use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use portline_agent::buffer::MessageBuffer;
use portline_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    buffer: MessageBuffer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConversationStore {
    pub status: Readiness,
    /// Conversations not yet closed; absent when the store could not be queried.
    pub active_conversations: Option<i64>,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: Readiness,
    pub conversations: ConversationStore,
    /// Senders with a debounce window still open.
    pub pending_senders: usize,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, buffer: MessageBuffer) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, buffer })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let conversations = conversation_store(&state.db_pool).await;
    let status = conversations.status;

    let payload = HealthResponse {
        status,
        conversations,
        pending_senders: state.buffer.pending_senders(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = match status {
        Readiness::Ready => StatusCode::OK,
        Readiness::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(payload))
}

async fn conversation_store(pool: &DbPool) -> ConversationStore {
    let active =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chat_conversation WHERE is_active = 1")
            .fetch_one(pool)
            .await;
    match active {
        Ok(count) => ConversationStore {
            status: Readiness::Ready,
            active_conversations: Some(count),
            detail: "conversation store reachable".to_string(),
        },
        Err(error) => ConversationStore {
            status: Readiness::Degraded,
            active_conversations: None,
            detail: format!("conversation store query failed: {error}"),
        },
    }
}
