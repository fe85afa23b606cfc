use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::dto::{
    AddressRequest, AddressResponse, CheckoutSessionRequest, CheckoutSessionResponse,
    CustomerRequest, CustomerResponse, OrderRequest, OrderResponse, PortabilityRequest,
    PortabilityResponse, ScrapePortabilityRequest, ScrapeRequest, ScrapeResponse, SimCardResponse,
};
use super::{
    AddressesClient, ClientError, CustomersClient, OrdersClient, PaymentsClient, ProductsClient,
    ScraperClient,
};

#[derive(Default)]
struct Script {
    responses: HashMap<&'static str, Result<Value, ClientError>>,
    calls: Vec<(&'static str, Value)>,
}

/// Scripted stand-in for every collaborator. Responses are keyed by operation
/// name (`create_order`, `customer_by_phone`, ...) and replayed on each call;
/// unscripted operations fail as unreachable.
#[derive(Default)]
pub struct FakeBackend {
    script: Mutex<Script>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, operation: &'static str, response: Result<Value, ClientError>) -> &Self {
        self.lock().responses.insert(operation, response);
        self
    }

    /// Operations invoked so far, with the request each one carried.
    pub fn calls(&self) -> Vec<(&'static str, Value)> {
        self.lock().calls.clone()
    }

    pub fn called(&self, operation: &str) -> bool {
        self.lock().calls.iter().any(|(name, _)| *name == operation)
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        match self.script.lock() {
            Ok(script) => script,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn call<R, T>(&self, operation: &'static str, request: &R) -> Result<T, ClientError>
    where
        R: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut script = self.lock();
        script.calls.push((operation, serde_json::to_value(request).unwrap_or(Value::Null)));
        let scripted = script
            .responses
            .get(operation)
            .cloned()
            .unwrap_or_else(|| Err(ClientError::Transport(format!("{operation} not scripted"))))?;
        serde_json::from_value(scripted).map_err(|error| ClientError::Decode(error.to_string()))
    }
}

#[async_trait]
impl CustomersClient for FakeBackend {
    async fn register(&self, request: &CustomerRequest) -> Result<CustomerResponse, ClientError> {
        self.call("register", request)
    }

    async fn customer_by_id(&self, id: i64) -> Result<CustomerResponse, ClientError> {
        self.call("customer_by_id", &json!({ "id": id }))
    }

    async fn customer_by_email(&self, email: &str) -> Result<CustomerResponse, ClientError> {
        self.call("customer_by_email", &json!({ "email": email }))
    }

    async fn customer_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<CustomerResponse, ClientError> {
        self.call("customer_by_phone", &json!({ "phoneNumber": phone_number }))
    }
}

#[async_trait]
impl AddressesClient for FakeBackend {
    async fn create_address(
        &self,
        request: &AddressRequest,
    ) -> Result<AddressResponse, ClientError> {
        self.call("create_address", request)
    }
}

#[async_trait]
impl OrdersClient for FakeBackend {
    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResponse, ClientError> {
        self.call("create_order", request)
    }

    async fn order_by_id(&self, id: &str) -> Result<OrderResponse, ClientError> {
        self.call("order_by_id", &json!({ "id": id }))
    }

    async fn orders_by_customer(
        &self,
        customer_id: i64,
    ) -> Result<Vec<OrderResponse>, ClientError> {
        self.call("orders_by_customer", &json!({ "customerId": customer_id }))
    }

    async fn create_portability(
        &self,
        request: &PortabilityRequest,
    ) -> Result<PortabilityResponse, ClientError> {
        self.call("create_portability", request)
    }

    async fn portability_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<PortabilityResponse, ClientError> {
        self.call("portability_by_phone", &json!({ "phoneNumber": phone_number }))
    }

    async fn update_imei(&self, id: i64, imei: &str) -> Result<PortabilityResponse, ClientError> {
        self.call("update_imei", &json!({ "id": id, "imei": imei }))
    }

    async fn update_nip(&self, id: i64, nip: &str) -> Result<PortabilityResponse, ClientError> {
        self.call("update_nip", &json!({ "id": id, "nip": nip }))
    }
}

#[async_trait]
impl ProductsClient for FakeBackend {
    async fn sim_card(&self, id: i64) -> Result<SimCardResponse, ClientError> {
        self.call("sim_card", &json!({ "id": id }))
    }
}

#[async_trait]
impl PaymentsClient for FakeBackend {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSessionResponse, ClientError> {
        self.call("create_checkout_session", request)
    }
}

#[async_trait]
impl ScraperClient for FakeBackend {
    async fn imei_compatibility(
        &self,
        request: &ScrapeRequest,
    ) -> Result<ScrapeResponse, ClientError> {
        self.call("imei_compatibility", request)
    }

    async fn portability(&self, request: &ScrapePortabilityRequest) -> Result<Value, ClientError> {
        self.call("scrape_portability", request)
    }
}
