use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};

use portline_core::crypto::{CryptoError, FieldCipher};
use portline_core::domain::context::{ContextKey, ContextMap};
use portline_core::domain::conversation::ConversationKey;
use portline_core::sanitize::{mask_email, mask_phone, mask_url};

use crate::state::{ConversationError, ConversationService};

const CUSTOMER_TOOLS: [&str; 4] =
    ["registerCustomer", "getCustomerById", "getCustomerByEmail", "getCustomerByPhoneNumber"];
const ORDER_TOOLS: [&str; 2] =
    ["createNewOrderForSimCardPurchase", "createOrderForSimCardPortabilityPurchase"];
const PORTABILITY_TOOLS: [&str; 3] =
    ["getPortabilityByPhoneNumber", "updateImei", "updatePortabilityNip"];

/// Result field → context key, per tool.
pub fn extraction_fields(tool: &str) -> &'static [(&'static str, ContextKey)] {
    match tool {
        t if CUSTOMER_TOOLS.contains(&t) => &[
            ("id", ContextKey::CustomerId),
            ("firstName", ContextKey::CustomerFirstName),
            ("lastName", ContextKey::CustomerLastName),
            ("email", ContextKey::CustomerEmail),
        ],
        "createAddress" => &[
            ("id", ContextKey::AddressId),
            ("district", ContextKey::AddressDistrict),
            ("postalCode", ContextKey::AddressPostalCode),
        ],
        t if ORDER_TOOLS.contains(&t) => &[
            ("id", ContextKey::OrderId),
            ("productId", ContextKey::OrderProductId),
            ("id", ContextKey::LastOrderId),
        ],
        t if PORTABILITY_TOOLS.contains(&t) => &[
            ("id", ContextKey::PortabilityId),
            ("imei", ContextKey::PortabilityImei),
            ("portabilityNip", ContextKey::PortabilityNip),
            ("orderId", ContextKey::PortabilityOrderId),
        ],
        "getSimIcc" => &[("icc", ContextKey::SimCardIcc)],
        "Create_checkout_session" => &[
            ("checkout_session_id", ContextKey::CheckoutSessionId),
            ("stripe_session_url", ContextKey::CheckoutSessionUrl),
        ],
        "scrapeImeiCompatibility" => &[
            ("compatibility", ContextKey::ImeiCompatible),
            ("message", ContextKey::ImeiCompatibilityMessage),
        ],
        _ => &[],
    }
}

/// Copies business facts out of tool results into the conversation context.
pub struct ContextDataManager {
    conversations: Arc<ConversationService>,
    cipher: Arc<dyn FieldCipher>,
}

impl ContextDataManager {
    pub fn new(conversations: Arc<ConversationService>, cipher: Arc<dyn FieldCipher>) -> Self {
        Self { conversations, cipher }
    }

    /// Extracts and stores; failures are logged and never reach the caller.
    pub async fn process_tool_response(&self, key: &ConversationKey, tool: &str, result: &Value) {
        let extracted = match self.extract(tool, result) {
            Ok(extracted) => extracted,
            Err(crypto_error) => {
                error!(
                    event_name = "context.extraction_failed",
                    conversation_key = %key.masked(),
                    tool,
                    error = %crypto_error,
                    "could not protect tool output; nothing stored"
                );
                return;
            }
        };
        if extracted.is_empty() {
            debug!(tool, "no context extraction for tool");
            return;
        }

        let entries = extracted.len();
        match self.conversations.store_context_map(key, extracted).await {
            Ok(()) => info!(
                event_name = "context.stored",
                conversation_key = %key.masked(),
                tool,
                entries,
                "stored context from tool result"
            ),
            Err(store_error) => error!(
                event_name = "context.store_failed",
                conversation_key = %key.masked(),
                tool,
                error = %store_error,
                "failed to store extracted context"
            ),
        }
    }

    /// The context entries a tool result contributes, sensitive ones encrypted.
    pub fn extract(&self, tool: &str, result: &Value) -> Result<ContextMap, CryptoError> {
        let mut extracted = ContextMap::new();
        if !result.is_object() {
            return Ok(extracted);
        }

        for (field, key) in extraction_fields(tool) {
            let Some(value) = result.get(*field).filter(|value| !value.is_null()) else {
                continue;
            };
            let stored = match (key.is_encrypted(), value) {
                (true, Value::String(plain)) => Value::String(self.cipher.encrypt(plain)?),
                _ => value.clone(),
            };
            extracted.insert(*key, stored);
        }

        if CUSTOMER_TOOLS.contains(&tool) {
            let first = result.get("firstName").and_then(Value::as_str);
            let last = result.get("lastName").and_then(Value::as_str);
            if let (Some(first), Some(last)) = (first, last) {
                extracted.insert(ContextKey::CustomerName, format!("{first} {last}"));
            }
            if let Some(email) = result.get("email").and_then(Value::as_str) {
                debug!(email = %mask_email(email), "extracted customer data");
            }
        }
        if PORTABILITY_TOOLS.contains(&tool) {
            let phone =
                result.get("phoneNumber").and_then(Value::as_str).map(mask_phone).unwrap_or_default();
            debug!(
                phone = %phone,
                has_imei = extracted.contains(ContextKey::PortabilityImei),
                has_nip = extracted.contains(ContextKey::PortabilityNip),
                "extracted portability data"
            );
        }
        if tool == "Create_checkout_session" {
            extracted.insert(ContextKey::PaymentCompleted, false);
            if let Some(url) = result.get("stripe_session_url").and_then(Value::as_str) {
                debug!(url = %mask_url(url), "extracted checkout data");
            }
        }

        Ok(extracted)
    }

    /// Arbitrary entries written from outside a tool turn. Keys in the
    /// vocabulary that hold sensitive data are encrypted like extracted ones.
    pub fn protect_entries(
        &self,
        entries: serde_json::Map<String, Value>,
    ) -> Result<ContextMap, CryptoError> {
        let mut protected = ContextMap::new();
        for (name, value) in entries {
            match (ContextKey::parse(&name), value) {
                (Some(key), Value::String(plain)) if key.is_encrypted() => {
                    protected.insert(key, self.cipher.encrypt(&plain)?);
                }
                (_, value) => {
                    protected.insert_raw(name, value);
                }
            }
        }
        Ok(protected)
    }

    pub async fn has_customer_data(&self, key: &ConversationKey) -> Result<bool, ConversationError> {
        Ok(self.conversations.get_context(key, ContextKey::CustomerId).await?.is_some())
    }

    pub async fn has_address_data(&self, key: &ConversationKey) -> Result<bool, ConversationError> {
        Ok(self.conversations.get_context(key, ContextKey::AddressId).await?.is_some())
    }

    pub async fn has_order_data(&self, key: &ConversationKey) -> Result<bool, ConversationError> {
        Ok(self.conversations.get_context(key, ContextKey::OrderId).await?.is_some())
    }

    /// Customer and address are both known.
    pub async fn has_required_order_data(
        &self,
        key: &ConversationKey,
    ) -> Result<bool, ConversationError> {
        let context = self.conversations.all_context(key).await?;
        Ok(context.contains(ContextKey::CustomerId) && context.contains(ContextKey::AddressId))
    }

    pub async fn customer_id(&self, key: &ConversationKey) -> Result<Option<i64>, ConversationError> {
        Ok(self.conversations.all_context(key).await?.i64(ContextKey::CustomerId))
    }

    pub async fn address_id(&self, key: &ConversationKey) -> Result<Option<i64>, ConversationError> {
        Ok(self.conversations.all_context(key).await?.i64(ContextKey::AddressId))
    }

    pub async fn portability_nip(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<String>, ConversationError> {
        self.decrypted(key, ContextKey::PortabilityNip).await
    }

    pub async fn portability_imei(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<String>, ConversationError> {
        self.decrypted(key, ContextKey::PortabilityImei).await
    }

    pub async fn checkout_url(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<String>, ConversationError> {
        self.decrypted(key, ContextKey::CheckoutSessionUrl).await
    }

    pub async fn sim_card_icc(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<String>, ConversationError> {
        self.decrypted(key, ContextKey::SimCardIcc).await
    }

    /// Decrypt failures read as absent.
    async fn decrypted(
        &self,
        key: &ConversationKey,
        context_key: ContextKey,
    ) -> Result<Option<String>, ConversationError> {
        let context = self.conversations.all_context(key).await?;
        let Some(ciphertext) = context.str(context_key) else {
            return Ok(None);
        };
        match self.cipher.decrypt(ciphertext) {
            Ok(plain) => Ok(Some(plain)),
            Err(crypto_error) => {
                error!(
                    event_name = "context.decrypt_failed",
                    conversation_key = %key.masked(),
                    field = %context_key,
                    error = %crypto_error,
                    "stored value could not be decrypted"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use portline_core::crypto::{AesGcmCipher, FieldCipher};
    use portline_core::domain::context::ContextKey;
    use portline_core::domain::conversation::ConversationKey;
    use portline_db::{InMemoryConversationRepository, InMemoryMessageRepository};

    use crate::context::ContextDataManager;
    use crate::state::ConversationService;

    fn manager() -> (ContextDataManager, Arc<ConversationService>) {
        let conversations = Arc::new(ConversationService::new(
            Arc::new(InMemoryConversationRepository::default()),
            Arc::new(InMemoryMessageRepository::default()),
        ));
        let cipher = Arc::new(AesGcmCipher::from_key_bytes([7; 32]));
        (ContextDataManager::new(Arc::clone(&conversations), cipher), conversations)
    }

    fn key() -> ConversationKey {
        ConversationKey::new("525512345678")
    }

    #[tokio::test]
    async fn customer_result_populates_identity_fields() {
        let (manager, conversations) = manager();
        let result = json!({
            "id": 42,
            "firstName": "Ana",
            "lastName": "López",
            "email": "ana@example.com",
            "phoneNumber": "5512345678"
        });

        manager.process_tool_response(&key(), "getCustomerByPhoneNumber", &result).await;

        let context = conversations.all_context(&key()).await.expect("context");
        assert_eq!(context.i64(ContextKey::CustomerId), Some(42));
        assert_eq!(context.str(ContextKey::CustomerName), Some("Ana López"));
        assert_eq!(context.str(ContextKey::CustomerEmail), Some("ana@example.com"));
        assert!(manager.has_customer_data(&key()).await.expect("has"));
        assert!(!manager.has_required_order_data(&key()).await.expect("no address yet"));
    }

    #[tokio::test]
    async fn sensitive_portability_fields_are_stored_encrypted() {
        let (manager, conversations) = manager();
        let result = json!({
            "id": 5,
            "phoneNumber": "5512345678",
            "imei": "356938035643809",
            "portabilityNip": "1234",
            "orderId": "P17379827490001"
        });

        manager.process_tool_response(&key(), "updatePortabilityNip", &result).await;

        let context = conversations.all_context(&key()).await.expect("context");
        let stored_nip = context.str(ContextKey::PortabilityNip).expect("nip stored");
        assert_ne!(stored_nip, "1234");
        assert_ne!(context.str(ContextKey::PortabilityImei), Some("356938035643809"));
        assert_eq!(context.str(ContextKey::PortabilityOrderId), Some("P17379827490001"));

        assert_eq!(manager.portability_nip(&key()).await.expect("nip"), Some("1234".to_string()));
        assert_eq!(
            manager.portability_imei(&key()).await.expect("imei"),
            Some("356938035643809".to_string())
        );
    }

    #[tokio::test]
    async fn address_then_order_completes_order_prerequisites() {
        let (manager, _conversations) = manager();
        manager
            .process_tool_response(&key(), "getCustomerByPhoneNumber", &json!({ "id": 42 }))
            .await;
        assert!(!manager.has_address_data(&key()).await.expect("has address"));

        manager
            .process_tool_response(
                &key(),
                "createAddress",
                &json!({ "id": 7, "district": "Roma Norte", "postalCode": "06700" }),
            )
            .await;
        assert!(manager.has_address_data(&key()).await.expect("has address"));
        assert!(manager.has_required_order_data(&key()).await.expect("prerequisites"));
        assert!(!manager.has_order_data(&key()).await.expect("no order yet"));

        manager
            .process_tool_response(
                &key(),
                "createNewOrderForSimCardPurchase",
                &json!({ "id": 9001, "productId": 3 }),
            )
            .await;
        assert!(manager.has_order_data(&key()).await.expect("has order"));
        assert_eq!(manager.address_id(&key()).await.expect("address id"), Some(7));
    }

    #[tokio::test]
    async fn checkout_result_marks_payment_pending() {
        let (manager, conversations) = manager();
        let result = json!({
            "message": "Checkout session created successfully",
            "stripe_session_url": "https://checkout.stripe.com/c/pay/cs_test_123?token=abc",
            "checkout_session_id": "cs_1"
        });

        manager.process_tool_response(&key(), "Create_checkout_session", &result).await;

        let context = conversations.all_context(&key()).await.expect("context");
        assert_eq!(context.bool(ContextKey::PaymentCompleted), Some(false));
        assert_eq!(context.str(ContextKey::CheckoutSessionId), Some("cs_1"));
        assert_eq!(
            manager.checkout_url(&key()).await.expect("url").as_deref(),
            Some("https://checkout.stripe.com/c/pay/cs_test_123?token=abc")
        );
    }

    #[tokio::test]
    async fn undecryptable_value_reads_as_absent() {
        let (manager, conversations) = manager();
        let foreign = AesGcmCipher::from_key_bytes([9; 32]).encrypt("89570000000000000001").expect("encrypt");
        conversations.store_context(&key(), ContextKey::SimCardIcc, foreign).await.expect("store");

        assert_eq!(manager.sim_card_icc(&key()).await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn unknown_tool_or_non_object_result_stores_nothing() {
        let (manager, conversations) = manager();

        manager.process_tool_response(&key(), "scrapePortability", &json!({ "status": "ok" })).await;
        manager.process_tool_response(&key(), "getOrdersByCustomerId", &json!([{ "id": "P1" }])).await;

        assert!(conversations.load(&key()).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn operator_entries_encrypt_sensitive_keys_only() {
        let (manager, conversations) = manager();
        let entries = json!({ "portability_nip": "4321", "customer_id": 7, "campaign": "verano" });
        let serde_json::Value::Object(entries) = entries else { unreachable!() };

        let protected = manager.protect_entries(entries).expect("protect");
        conversations.store_context_map(&key(), protected).await.expect("store");

        let context = conversations.all_context(&key()).await.expect("context");
        assert_ne!(context.str(ContextKey::PortabilityNip), Some("4321"));
        assert_eq!(manager.portability_nip(&key()).await.expect("nip").as_deref(), Some("4321"));
        assert_eq!(context.i64(ContextKey::CustomerId), Some(7));
        assert_eq!(context.get_raw("campaign"), Some(&json!("verano")));
    }

    #[test]
    fn order_extraction_mirrors_id_into_last_order_id() {
        let (manager, _) = manager();

        let extracted = manager
            .extract("createNewOrderForSimCardPurchase", &json!({ "id": "P9", "productId": 3 }))
            .expect("extract");

        assert_eq!(extracted.str(ContextKey::OrderId), Some("P9"));
        assert_eq!(extracted.str(ContextKey::LastOrderId), Some("P9"));
        assert_eq!(extracted.i64(ContextKey::OrderProductId), Some(3));
    }
}
