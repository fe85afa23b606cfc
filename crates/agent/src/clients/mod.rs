//! Sibling business services the tools call: customers, addresses,
//! orders/portabilities, products, payments and the SIM scraper.

pub mod dto;
pub mod fake;
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use dto::{
    AddressRequest, AddressResponse, CheckoutSessionRequest, CheckoutSessionResponse,
    CustomerRequest, CustomerResponse, OrderRequest, OrderResponse, PortabilityRequest,
    PortabilityResponse, ScrapePortabilityRequest, ScrapeRequest, ScrapeResponse, SimCardResponse,
};

pub use fake::FakeBackend;
pub use http::RestClient;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("collaborator unreachable: {0}")]
    Transport(String),
    #[error("collaborator returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("collaborator response could not be decoded: {0}")]
    Decode(String),
}

impl ClientError {
    /// The service answered and refused (4xx), as opposed to being down.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Status { status, .. } if (400..500).contains(status))
    }

    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

#[async_trait]
pub trait CustomersClient: Send + Sync {
    async fn register(&self, request: &CustomerRequest) -> Result<CustomerResponse, ClientError>;
    async fn customer_by_id(&self, id: i64) -> Result<CustomerResponse, ClientError>;
    async fn customer_by_email(&self, email: &str) -> Result<CustomerResponse, ClientError>;
    async fn customer_by_phone(&self, phone_number: &str)
        -> Result<CustomerResponse, ClientError>;
}

#[async_trait]
pub trait AddressesClient: Send + Sync {
    async fn create_address(&self, request: &AddressRequest)
        -> Result<AddressResponse, ClientError>;
}

#[async_trait]
pub trait OrdersClient: Send + Sync {
    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResponse, ClientError>;
    async fn order_by_id(&self, id: &str) -> Result<OrderResponse, ClientError>;
    async fn orders_by_customer(&self, customer_id: i64)
        -> Result<Vec<OrderResponse>, ClientError>;
    async fn create_portability(
        &self,
        request: &PortabilityRequest,
    ) -> Result<PortabilityResponse, ClientError>;
    async fn portability_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<PortabilityResponse, ClientError>;
    async fn update_imei(&self, id: i64, imei: &str) -> Result<PortabilityResponse, ClientError>;
    async fn update_nip(&self, id: i64, nip: &str) -> Result<PortabilityResponse, ClientError>;
}

#[async_trait]
pub trait ProductsClient: Send + Sync {
    async fn sim_card(&self, id: i64) -> Result<SimCardResponse, ClientError>;
}

#[async_trait]
pub trait PaymentsClient: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSessionResponse, ClientError>;
}

#[async_trait]
pub trait ScraperClient: Send + Sync {
    async fn imei_compatibility(&self, request: &ScrapeRequest)
        -> Result<ScrapeResponse, ClientError>;
    async fn portability(&self, request: &ScrapePortabilityRequest) -> Result<Value, ClientError>;
}

/// One handle per collaborator, shared by every tool.
#[derive(Clone)]
pub struct Collaborators {
    pub customers: Arc<dyn CustomersClient>,
    pub addresses: Arc<dyn AddressesClient>,
    pub orders: Arc<dyn OrdersClient>,
    pub products: Arc<dyn ProductsClient>,
    pub payments: Arc<dyn PaymentsClient>,
    pub scraper: Arc<dyn ScraperClient>,
}

impl Collaborators {
    /// Every collaborator served by the same backend.
    pub fn single<B>(backend: Arc<B>) -> Self
    where
        B: CustomersClient
            + AddressesClient
            + OrdersClient
            + ProductsClient
            + PaymentsClient
            + ScraperClient
            + 'static,
    {
        Self {
            customers: backend.clone(),
            addresses: backend.clone(),
            orders: backend.clone(),
            products: backend.clone(),
            payments: backend.clone(),
            scraper: backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ClientError;

    #[test]
    fn status_classes_split_rejection_from_outage() {
        let not_found = ClientError::Status { status: 404, body: String::new() };
        let bad_gateway = ClientError::Status { status: 502, body: String::new() };

        assert!(not_found.is_rejection());
        assert!(!not_found.is_unavailable());
        assert!(bad_gateway.is_unavailable());
        assert!(ClientError::Transport("refused".to_string()).is_unavailable());
        assert!(!ClientError::Decode("eof".to_string()).is_rejection());
    }
}
