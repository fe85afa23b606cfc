use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use portline_core::domain::conversation::ConversationKey;
use portline_core::sanitize::mask_phone;
use portline_whatsapp::MessageSender;

use crate::buffer::{BatchHandler, CoalescedBatch};
use crate::locks::KeyLocks;
use crate::runtime::AgentRuntime;

/// Runs a coalesced batch through the agent and sends the reply back on the
/// channel it arrived on. Failed deliveries are logged, not requeued.
///
/// A sender's batches are answered and delivered one at a time, so replies
/// leave in the order the batches were flushed.
pub struct TurnDispatcher {
    runtime: Arc<AgentRuntime>,
    sender: Arc<dyn MessageSender>,
    in_flight: KeyLocks,
}

impl TurnDispatcher {
    pub fn new(runtime: Arc<AgentRuntime>, sender: Arc<dyn MessageSender>) -> Self {
        Self { runtime, sender, in_flight: KeyLocks::default() }
    }
}

#[async_trait]
impl BatchHandler for TurnDispatcher {
    async fn handle_batch(&self, batch: CoalescedBatch) {
        let _in_flight = self.in_flight.acquire(&ConversationKey::new(&batch.sender)).await;
        let reply = self.runtime.handle_message(&batch.text, &batch.sender).await;
        match self.sender.send_text(&batch.sender, &reply, &batch.routing).await {
            Ok(()) => info!(
                event_name = "egress.whatsapp.delivered",
                sender = %mask_phone(&batch.sender),
                fragments = batch.fragment_count,
                "reply delivered"
            ),
            Err(delivery_error) => error!(
                event_name = "egress.whatsapp.delivery_failed",
                sender = %mask_phone(&batch.sender),
                error = %delivery_error,
                "reply could not be delivered"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use portline_core::crypto::AesGcmCipher;
    use portline_core::domain::conversation::ConversationKey;
    use portline_db::{InMemoryConversationRepository, InMemoryMessageRepository};
    use portline_whatsapp::{DeliveryError, InMemorySender, RoutingContext};

    use crate::buffer::{BatchHandler, CoalescedBatch, MessageBuffer};
    use crate::context::ContextDataManager;
    use crate::delivery::TurnDispatcher;
    use crate::llm::{LlmClient, LlmError, ModelRequest, ModelResponse, ScriptedLlmClient};
    use crate::prompt::PromptBuilder;
    use crate::retrieval::NoopRetriever;
    use crate::runtime::{AgentRuntime, RuntimeSettings};
    use crate::state::ConversationService;
    use crate::tools::{ToolInvoker, ToolRegistry};

    fn runtime(llm: Arc<dyn LlmClient>) -> (Arc<AgentRuntime>, Arc<ConversationService>) {
        let conversations = Arc::new(ConversationService::new(
            Arc::new(InMemoryConversationRepository::default()),
            Arc::new(InMemoryMessageRepository::default()),
        ));
        let context = Arc::new(ContextDataManager::new(
            Arc::clone(&conversations),
            Arc::new(AesGcmCipher::from_key_bytes([9; 32])),
        ));
        let runtime = AgentRuntime::new(
            Arc::clone(&conversations),
            Arc::new(ToolInvoker::new(ToolRegistry::default(), context)),
            llm,
            Arc::new(NoopRetriever),
            PromptBuilder::new().expect("prompt"),
            RuntimeSettings::default(),
        );
        (Arc::new(runtime), conversations)
    }

    /// Answers `respuesta <text>`, taking `stall` to answer the text "a".
    struct SlowFirstAnswer {
        stall: Duration,
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for SlowFirstAnswer {
        async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, LlmError> {
            self.events.lock().await.push(format!("start {}", request.user));
            if request.user == "a" {
                tokio::time::sleep(self.stall).await;
            }
            self.events.lock().await.push(format!("end {}", request.user));
            Ok(ModelResponse::text(format!("respuesta {}", request.user)))
        }
    }

    fn batch() -> CoalescedBatch {
        CoalescedBatch {
            sender: "525512345678".to_string(),
            text: "Hola\nQuiero un chip".to_string(),
            fragment_count: 2,
            routing: RoutingContext::new("106540352242922"),
        }
    }

    #[tokio::test]
    async fn reply_goes_back_through_the_same_phone_number_id() {
        let llm = Arc::new(ScriptedLlmClient::default());
        llm.push(Ok(ModelResponse::text("¡Claro! ¿Nuevo número o portabilidad? [STATE:INTENT_SELECTION]")))
            .await;
        let (runtime, _) = runtime(llm.clone());
        let sender = Arc::new(InMemorySender::new());
        let dispatcher = TurnDispatcher::new(runtime, sender.clone());

        dispatcher.handle_batch(batch()).await;

        let sent = sender.sent().await;
        assert_eq!(sent.len(), 1);
        let (routing, message) = &sent[0];
        assert_eq!(routing, &RoutingContext::new("106540352242922"));
        assert_eq!(message.to, "525512345678");
        assert_eq!(message.text.body, "¡Claro! ¿Nuevo número o portabilidad?");
        assert_eq!(llm.requests().await[0].user, "Hola\nQuiero un chip");
    }

    #[tokio::test]
    async fn failed_delivery_keeps_the_turn_logged() {
        let llm = Arc::new(ScriptedLlmClient::default());
        llm.push(Ok(ModelResponse::text("Hola"))).await;
        let (runtime, conversations) = runtime(llm);
        let sender = Arc::new(InMemorySender::failing(DeliveryError::Transport("offline".to_string())));
        let dispatcher = TurnDispatcher::new(runtime, sender);

        dispatcher.handle_batch(batch()).await;

        let history = conversations
            .history(&ConversationKey::new("525512345678"), 10)
            .await
            .expect("history");
        assert_eq!(history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_flushed_during_a_slow_turn_waits_for_it() {
        let llm = Arc::new(SlowFirstAnswer {
            stall: Duration::from_secs(30),
            events: Mutex::default(),
        });
        let (runtime, conversations) = runtime(llm.clone());
        let sender = Arc::new(InMemorySender::new());
        let buffer = MessageBuffer::new(
            Duration::from_secs(8),
            Arc::new(TurnDispatcher::new(runtime, sender.clone())),
        );
        let routing = RoutingContext::new("106540352242922");

        buffer.add_message("525512345678", "a", routing.clone()).expect("buffered");
        tokio::time::sleep(Duration::from_secs(10)).await;
        // the first turn is still waiting on the model when this batch flushes
        buffer.add_message("525512345678", "b", routing).expect("buffered");
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(*llm.events.lock().await, vec!["start a", "end a", "start b", "end b"]);
        let bodies: Vec<String> =
            sender.sent().await.into_iter().map(|(_, message)| message.text.body).collect();
        assert_eq!(bodies, vec!["respuesta a", "respuesta b"]);

        let history = conversations
            .history(&ConversationKey::new("525512345678"), 10)
            .await
            .expect("history");
        let contents: Vec<&str> = history.iter().map(|message| message.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "respuesta a", "b", "respuesta b"]);
    }
}
