use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use portline_core::audit::AuditActor;
use portline_core::config::AppConfig;
use portline_core::domain::conversation::ConversationKey;
use portline_core::domain::message::{MessageType, NewMessage};
use portline_core::errors::ToolError;
use portline_core::flows::{extract_state_marker, strip_state_markers, ConversationState};

use crate::enricher::context_summary;
use crate::llm::{ChatRole, ChatTurn, LlmClient, LlmError, ModelRequest, ModelResponse};
use crate::locks::KeyLocks;
use crate::prompt::{PromptBuilder, PromptError, PromptInputs};
use crate::retrieval::{reference_text, SemanticRetriever};
use crate::state::{ConversationError, ConversationService};
use crate::tools::ToolInvoker;

pub const EMPTY_RESPONSE_FALLBACK: &str =
    "Lo siento, no pude procesar tu mensaje. Por favor, intenta de nuevo.";
pub const UNEXPECTED_FAILURE_REPLY: &str =
    "Lo siento, ocurrió un error inesperado. Por favor, intenta nuevamente o reformula tu pregunta.";
const TOOL_RESULTS_PREFIX: &str = "Resultado de las herramientas: ";
const SYSTEM_ACTOR: &str = "system";
const UNEXPECTED_FAILURE_DETAIL: &str = "Unexpected error occurred";

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    pub max_tool_iterations: u32,
    pub retrieval_top_k: usize,
    pub retrieval_threshold: f32,
    pub history_window: usize,
    pub model_timeout: Duration,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_tool_iterations: config.orchestrator.max_tool_iterations,
            retrieval_top_k: config.orchestrator.retrieval_top_k,
            retrieval_threshold: config.orchestrator.retrieval_similarity_threshold,
            history_window: config.orchestrator.history_window,
            model_timeout: Duration::from_secs(config.llm.timeout_secs.max(1)),
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: 2,
            retrieval_top_k: 5,
            retrieval_threshold: 0.5,
            history_window: 50,
            model_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
enum TurnError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Model(#[from] LlmError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Conversation(#[from] ConversationError),
}

/// What a turn produced besides the reply: the tool results to log.
#[derive(Default)]
struct TurnLog {
    tool_messages: Vec<NewMessage>,
}

/// The orchestration loop: prompt, model, tools, state marker, reply.
pub struct AgentRuntime {
    conversations: Arc<ConversationService>,
    tools: Arc<ToolInvoker>,
    llm: Arc<dyn LlmClient>,
    retriever: Arc<dyn SemanticRetriever>,
    prompts: PromptBuilder,
    settings: RuntimeSettings,
    turns: KeyLocks,
}

impl AgentRuntime {
    pub fn new(
        conversations: Arc<ConversationService>,
        tools: Arc<ToolInvoker>,
        llm: Arc<dyn LlmClient>,
        retriever: Arc<dyn SemanticRetriever>,
        prompts: PromptBuilder,
        settings: RuntimeSettings,
    ) -> Self {
        Self { conversations, tools, llm, retriever, prompts, settings, turns: KeyLocks::default() }
    }

    pub fn conversations(&self) -> &Arc<ConversationService> {
        &self.conversations
    }

    /// Runs one turn for `sender` and returns the text to send back. Never
    /// fails: tool errors come back as their localized message and anything
    /// else as a generic apology, both recorded into the error context.
    /// Turns for one sender run one at a time, in arrival order.
    pub async fn handle_message(&self, text: &str, sender: &str) -> String {
        let key = ConversationKey::new(sender);
        let _turn = self.turns.acquire(&key).await;
        let turn_id = Uuid::new_v4().to_string();
        info!(
            event_name = "agent.turn.started",
            conversation_key = %key.masked(),
            turn_id = %turn_id,
            chars = text.chars().count(),
            "processing message"
        );

        let mut log = TurnLog::default();
        let reply = match self.run_turn(&key, text, &mut log).await {
            Ok(reply) => {
                info!(
                    event_name = "agent.turn.completed",
                    conversation_key = %key.masked(),
                    turn_id = %turn_id,
                    tools_used = log.tool_messages.len(),
                    "turn completed"
                );
                reply
            }
            Err(TurnError::Tool(tool_error)) => {
                error!(
                    event_name = "agent.turn.tool_failed",
                    conversation_key = %key.masked(),
                    turn_id = %turn_id,
                    tool = %tool_error.tool,
                    detail = %tool_error.technical_detail,
                    "turn aborted by tool failure"
                );
                let message = tool_error.message_for_user();
                self.enter_error_state(&key, &tool_error.tool, &message).await;
                message
            }
            Err(other) => {
                error!(
                    event_name = "agent.turn.failed",
                    conversation_key = %key.masked(),
                    turn_id = %turn_id,
                    error = %other,
                    "turn aborted"
                );
                self.enter_error_state(&key, SYSTEM_ACTOR, UNEXPECTED_FAILURE_DETAIL).await;
                UNEXPECTED_FAILURE_REPLY.to_string()
            }
        };

        let mut transcript = vec![NewMessage::user(text)];
        transcript.append(&mut log.tool_messages);
        transcript.push(NewMessage::assistant(reply.as_str()));
        if let Err(store_error) = self.conversations.append_messages(&key, transcript).await {
            error!(
                event_name = "agent.turn.log_failed",
                conversation_key = %key.masked(),
                error = %store_error,
                "could not append turn to message log"
            );
        }
        reply
    }

    async fn run_turn(
        &self,
        key: &ConversationKey,
        text: &str,
        log: &mut TurnLog,
    ) -> Result<String, TurnError> {
        if self.conversations.is_retry_attempt(key).await? {
            self.conversations.clear_error_context(key).await?;
            info!(
                event_name = "agent.turn.retry_detected",
                conversation_key = %key.masked(),
                "cleared previous error before retrying"
            );
        }

        let state = self.conversations.current_state(key).await?;
        let system = self.system_prompt(key, text, state).await?;
        let mut transcript = self.replayed_history(key).await?;
        let tools = self.tools.specs();

        let mut user_turn = text.to_string();
        let mut response = self.complete(&system, &transcript, &user_turn, &tools).await?;
        let mut iteration = 0;
        while response.has_tool_calls() && iteration < self.settings.max_tool_iterations {
            iteration += 1;
            let mut results = String::new();
            for call in &response.tool_calls {
                let result = self.tools.invoke(key, call).await?;
                let rendered = render_result(&result);
                results.push_str(&format!("Tool: {}, Result: {}\n", call.name, rendered));
                log.tool_messages.push(
                    NewMessage::new(MessageType::Tool, rendered).with_metadata("tool", call.name.as_str()),
                );
            }

            transcript.push(ChatTurn::new(ChatRole::User, user_turn));
            if let Some(text) = &response.text {
                transcript.push(ChatTurn::new(ChatRole::Assistant, text.as_str()));
            }
            user_turn = format!("{TOOL_RESULTS_PREFIX}{results}");
            response = self.complete(&system, &transcript, &user_turn, &tools).await?;
        }
        if response.has_tool_calls() {
            warn!(
                event_name = "agent.turn.iteration_limit",
                conversation_key = %key.masked(),
                max_tool_iterations = self.settings.max_tool_iterations,
                pending_calls = response.tool_calls.len(),
                "tool loop bound reached; using last response"
            );
        }

        let raw = match response.text {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                warn!(
                    event_name = "agent.turn.empty_response",
                    conversation_key = %key.masked(),
                    "model returned no text"
                );
                return Ok(EMPTY_RESPONSE_FALLBACK.to_string());
            }
        };

        self.apply_state_marker(key, &raw).await;
        let reply = strip_state_markers(&raw);
        if reply.is_empty() {
            return Ok(EMPTY_RESPONSE_FALLBACK.to_string());
        }
        Ok(reply)
    }

    async fn system_prompt(
        &self,
        key: &ConversationKey,
        text: &str,
        state: ConversationState,
    ) -> Result<String, TurnError> {
        let reference = reference_text(
            self.retriever.as_ref(),
            text,
            self.settings.retrieval_top_k,
            self.settings.retrieval_threshold,
        )
        .await;
        let summary = context_summary(&self.conversations.all_context(key).await?);
        Ok(self.prompts.system_prompt(&PromptInputs {
            reference_text: &reference,
            phone_number: key.as_str(),
            user_query: text,
            state,
            available_data: &summary,
        })?)
    }

    /// User and assistant turns of the recent log; tool results stay out.
    async fn replayed_history(&self, key: &ConversationKey) -> Result<Vec<ChatTurn>, TurnError> {
        let messages = self.conversations.history(key, self.settings.history_window).await?;
        Ok(messages
            .into_iter()
            .filter_map(|message| match message.message_type {
                MessageType::User => Some(ChatTurn::new(ChatRole::User, message.content)),
                MessageType::Assistant => Some(ChatTurn::new(ChatRole::Assistant, message.content)),
                MessageType::System | MessageType::Tool => None,
            })
            .collect())
    }

    async fn complete(
        &self,
        system: &str,
        history: &[ChatTurn],
        user: &str,
        tools: &[crate::llm::ToolSpec],
    ) -> Result<ModelResponse, TurnError> {
        let request = ModelRequest {
            system: system.to_string(),
            history: history.to_vec(),
            user: user.to_string(),
            tools: tools.to_vec(),
        };
        let timeout = self.settings.model_timeout;
        match tokio::time::timeout(timeout, self.llm.complete(request)).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(TurnError::Model(LlmError::Timeout(timeout.as_secs()))),
        }
    }

    /// A rejected or unknown marker is logged and otherwise ignored.
    async fn apply_state_marker(&self, key: &ConversationKey, text: &str) {
        let Some(marker) = extract_state_marker(text) else {
            return;
        };
        let Some(target) = marker.state else {
            warn!(
                event_name = "agent.turn.unknown_state_marker",
                conversation_key = %key.masked(),
                marker = %marker.name,
                "ignoring marker with unknown state"
            );
            return;
        };

        let outcome = match self.conversations.current_state(key).await {
            Ok(current) if current == target => return,
            Ok(_) => self.conversations.transition_by(key, target, AuditActor::Assistant).await,
            Err(load_error) => Err(load_error),
        };
        if let Err(transition_error) = outcome {
            error!(
                event_name = "agent.turn.state_update_failed",
                conversation_key = %key.masked(),
                target = %target,
                error = %transition_error,
                "could not apply state marker"
            );
        }
    }

    async fn enter_error_state(&self, key: &ConversationKey, tool: &str, message: &str) {
        if let Err(record_error) = self.conversations.record_error(key, tool, message).await {
            error!(
                event_name = "agent.turn.error_record_failed",
                conversation_key = %key.masked(),
                error = %record_error,
                "could not record error context"
            );
        }
        let transition = match self.conversations.current_state(key).await {
            Ok(ConversationState::ErrorState) => Ok(true),
            Ok(_) => self.conversations.transition_to(key, ConversationState::ErrorState).await,
            Err(load_error) => Err(load_error),
        };
        if let Err(transition_error) = transition {
            error!(
                event_name = "agent.turn.error_state_failed",
                conversation_key = %key.masked(),
                error = %transition_error,
                "could not move conversation to error state"
            );
        }
    }
}

fn render_result(result: &Value) -> String {
    match result {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
