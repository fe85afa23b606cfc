//! Business tools offered to the model. Every tool validates its arguments
//! before touching the network and reports failures as [`ToolError`] with a
//! localized message the user can act on.

mod addresses;
mod customers;
mod orders;
mod payments;
mod scraper;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use portline_core::domain::conversation::ConversationKey;
use portline_core::errors::{ToolError, ToolErrorKind};

use crate::clients::{ClientError, Collaborators};
use crate::context::ContextDataManager;
use crate::llm::{ToolCall, ToolSpec};

pub use addresses::CreateAddress;
pub use customers::{GetCustomerByEmail, GetCustomerById, GetCustomerByPhoneNumber, RegisterCustomer};
pub use orders::{
    CreateNewOrder, CreatePortabilityOrder, GetOrderById, GetOrdersByCustomerId,
    GetPortabilityByPhoneNumber, GetSimIcc, UpdateImei, UpdatePortabilityNip,
};
pub use payments::{CheckoutUrls, CreateCheckoutSession};
pub use scraper::{ScrapeImeiCompatibility, ScrapePortability};

/// Per-invocation facts a tool may need beyond its arguments.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub conversation_key: ConversationKey,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;
    async fn execute(&self, context: &ToolContext, input: Value) -> Result<Value, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(Box::as_ref)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// The full sales and portability tool set.
    pub fn business(collaborators: &Collaborators, checkout: CheckoutUrls) -> Self {
        let mut registry = Self::default();
        registry.register(RegisterCustomer::new(collaborators.customers.clone()));
        registry.register(GetCustomerById::new(collaborators.customers.clone()));
        registry.register(GetCustomerByEmail::new(collaborators.customers.clone()));
        registry.register(GetCustomerByPhoneNumber::new(collaborators.customers.clone()));
        registry.register(CreateAddress::new(collaborators.addresses.clone()));
        registry.register(CreateNewOrder::new(collaborators.orders.clone()));
        registry.register(CreatePortabilityOrder::new(collaborators.orders.clone()));
        registry.register(GetOrderById::new(collaborators.orders.clone()));
        registry.register(GetOrdersByCustomerId::new(collaborators.orders.clone()));
        registry.register(GetPortabilityByPhoneNumber::new(collaborators.orders.clone()));
        registry.register(UpdateImei::new(collaborators.orders.clone()));
        registry.register(UpdatePortabilityNip::new(collaborators.orders.clone()));
        registry.register(GetSimIcc::new(collaborators.orders.clone(), collaborators.products.clone()));
        registry.register(CreateCheckoutSession::new(collaborators.payments.clone(), checkout));
        registry.register(ScrapeImeiCompatibility::new(collaborators.scraper.clone()));
        registry.register(ScrapePortability::new(collaborators.scraper.clone()));
        registry
    }
}

/// Runs model-requested tools and feeds successful results into the context store.
pub struct ToolInvoker {
    registry: ToolRegistry,
    context: Arc<ContextDataManager>,
}

impl ToolInvoker {
    pub fn new(registry: ToolRegistry, context: Arc<ContextDataManager>) -> Self {
        Self { registry, context }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn invoke(&self, key: &ConversationKey, call: &ToolCall) -> Result<Value, ToolError> {
        let Some(tool) = self.registry.get(&call.name) else {
            return Err(ToolError::unexpected(&call.name, "model requested an unregistered tool"));
        };

        let context = ToolContext { conversation_key: key.clone() };
        match tool.execute(&context, call.arguments.clone()).await {
            Ok(result) => {
                info!(
                    event_name = "agent.tool.executed",
                    conversation_key = %key.masked(),
                    tool = %call.name,
                    "tool call succeeded"
                );
                self.context.process_tool_response(key, &call.name, &result).await;
                Ok(result)
            }
            Err(tool_error) => {
                warn!(
                    event_name = "agent.tool.failed",
                    conversation_key = %key.masked(),
                    tool = %call.name,
                    kind = ?tool_error.kind,
                    detail = %tool_error.technical_detail,
                    "tool call failed"
                );
                Err(tool_error)
            }
        }
    }
}

/// Localized text for the three ways a collaborator call can fail.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FailureMessages {
    pub rejected: &'static str,
    pub unavailable: &'static str,
    pub unexpected: &'static str,
}

impl FailureMessages {
    pub(crate) fn classify(&self, tool: &str, error: ClientError) -> ToolError {
        let detail = error.to_string();
        if error.is_rejection() {
            ToolError::rejected(tool, self.rejected, detail)
        } else if error.is_unavailable() {
            ToolError::unavailable(tool, self.unavailable, detail)
        } else {
            ToolError::new(tool, ToolErrorKind::Unexpected, self.unexpected, detail)
        }
    }
}

pub(crate) fn parse_arguments<T: DeserializeOwned>(tool: &str, input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|error| {
        ToolError::new(
            tool,
            ToolErrorKind::Validation,
            "Los datos proporcionados no son válidos",
            format!("invalid arguments: {error}"),
        )
    })
}

pub(crate) fn to_result<T: Serialize>(tool: &str, value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value)
        .map_err(|error| ToolError::unexpected(tool, format!("result not serializable: {error}")))
}

pub(crate) fn require_text(tool: &str, value: &str, message: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::validation(tool, message));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use portline_core::crypto::AesGcmCipher;
    use portline_core::domain::context::ContextKey;
    use portline_core::domain::conversation::ConversationKey;
    use portline_core::errors::ToolErrorKind;
    use portline_db::{InMemoryConversationRepository, InMemoryMessageRepository};

    use crate::clients::{ClientError, Collaborators, FakeBackend};
    use crate::context::ContextDataManager;
    use crate::llm::ToolCall;
    use crate::state::ConversationService;
    use crate::tools::{CheckoutUrls, ToolInvoker, ToolRegistry};

    fn invoker(backend: Arc<FakeBackend>) -> (ToolInvoker, Arc<ConversationService>) {
        let conversations = Arc::new(ConversationService::new(
            Arc::new(InMemoryConversationRepository::default()),
            Arc::new(InMemoryMessageRepository::default()),
        ));
        let context = Arc::new(ContextDataManager::new(
            Arc::clone(&conversations),
            Arc::new(AesGcmCipher::from_key_bytes([3; 32])),
        ));
        let registry = ToolRegistry::business(
            &Collaborators::single(backend),
            CheckoutUrls::new("https://example.com/success", "https://example.com/cancel"),
        );
        (ToolInvoker::new(registry, context), conversations)
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall { id: "call_1".to_string(), name: name.to_string(), arguments }
    }

    #[test]
    fn business_registry_offers_every_tool_with_a_schema() {
        let (invoker, _) = invoker(Arc::new(FakeBackend::new()));

        assert_eq!(invoker.registry().len(), 16);
        for spec in invoker.specs() {
            assert_eq!(spec.parameters["type"], "object", "{} schema", spec.name);
            assert!(!spec.description.is_empty());
        }
        assert!(invoker.registry().get("Create_checkout_session").is_some());
    }

    #[tokio::test]
    async fn successful_call_lands_in_context() {
        let backend = Arc::new(FakeBackend::new());
        backend.respond(
            "customer_by_phone",
            Ok(json!({ "id": 42, "firstName": "Ana", "lastName": "López", "email": "ana@example.com" })),
        );
        let (invoker, conversations) = invoker(backend);
        let key = ConversationKey::new("525512345678");

        invoker
            .invoke(&key, &call("getCustomerByPhoneNumber", json!({ "phoneNumber": "5512345678" })))
            .await
            .expect("tool succeeds");

        let context = conversations.all_context(&key).await.expect("context");
        assert_eq!(context.i64(ContextKey::CustomerId), Some(42));
    }

    #[tokio::test]
    async fn collaborator_failures_are_classified() {
        let backend = Arc::new(FakeBackend::new());
        backend
            .respond("customer_by_id", Err(ClientError::Status { status: 404, body: String::new() }))
            .respond("create_address", Err(ClientError::Transport("connection refused".to_string())));
        let (invoker, conversations) = invoker(backend);
        let key = ConversationKey::new("525512345678");

        let missing = invoker
            .invoke(&key, &call("getCustomerById", json!({ "id": 7 })))
            .await
            .expect_err("404");
        assert_eq!(missing.kind, ToolErrorKind::Rejected);
        assert_eq!(missing.user_message, "No se encontró un cliente con ese ID");

        let down = invoker
            .invoke(
                &key,
                &call(
                    "createAddress",
                    json!({
                        "customerId": 42, "street": "Reforma", "district": "Juárez",
                        "number": "222", "postalCode": "06600"
                    }),
                ),
            )
            .await
            .expect_err("down");
        assert_eq!(down.kind, ToolErrorKind::Unavailable);
        assert_eq!(down.user_message, "El servicio de direcciones no está disponible en este momento");

        assert!(conversations.load(&key).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_fail_without_network() {
        let backend = Arc::new(FakeBackend::new());
        let (invoker, _) = invoker(Arc::clone(&backend));
        let key = ConversationKey::new("525512345678");

        let unknown = invoker.invoke(&key, &call("deleteEverything", json!({}))).await.expect_err("unknown");
        assert_eq!(unknown.kind, ToolErrorKind::Unexpected);

        let malformed = invoker
            .invoke(&key, &call("getCustomerById", json!({ "id": "siete" })))
            .await
            .expect_err("malformed");
        assert_eq!(malformed.kind, ToolErrorKind::Validation);
        assert!(backend.calls().is_empty());
    }
}
