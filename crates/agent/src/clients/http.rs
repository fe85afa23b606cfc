use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::dto::{
    AddressRequest, AddressResponse, ByEmailRequest, ByPhoneNumberRequest, CheckoutSessionRequest,
    CheckoutSessionResponse, CustomerRequest, CustomerResponse, ImeiUpdate, NipUpdate,
    OrderRequest, OrderResponse, PortabilityRequest, PortabilityResponse,
    ScrapePortabilityRequest, ScrapeRequest, ScrapeResponse, SimCardResponse,
};
use super::{
    AddressesClient, ClientError, CustomersClient, OrdersClient, PaymentsClient, ProductsClient,
    ScraperClient,
};

/// JSON-over-HTTP client bound to one collaborator's base URL.
#[derive(Clone, Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ClientError::Transport(error.to_string()))?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { http, base_url })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path)).header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send<T>(&self, builder: RequestBuilder) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let response =
            builder.send().await.map_err(|error| ClientError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(base_url = %self.base_url, status = status.as_u16(), "collaborator refused request");
            return Err(ClientError::Status { status: status.as_u16(), body });
        }
        // an empty 2xx body is treated like a missing resource
        let bytes = response.bytes().await.map_err(|error| ClientError::Transport(error.to_string()))?;
        if bytes.is_empty() {
            return Err(ClientError::Status { status: status.as_u16(), body: String::new() });
        }
        serde_json::from_slice(&bytes).map_err(|error| ClientError::Decode(error.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send(self.request(Method::GET, path)).await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        self.send(self.request(Method::PATCH, path).json(body)).await
    }
}

#[async_trait]
impl CustomersClient for RestClient {
    async fn register(&self, request: &CustomerRequest) -> Result<CustomerResponse, ClientError> {
        self.post("api/customer/register", request).await
    }

    async fn customer_by_id(&self, id: i64) -> Result<CustomerResponse, ClientError> {
        self.get(&format!("api/customers/{id}")).await
    }

    async fn customer_by_email(&self, email: &str) -> Result<CustomerResponse, ClientError> {
        self.post("api/customers/by-email", &ByEmailRequest { email: email.to_string() }).await
    }

    async fn customer_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<CustomerResponse, ClientError> {
        self.post(
            "api/customers/by-phone",
            &ByPhoneNumberRequest { phone_number: phone_number.to_string() },
        )
        .await
    }
}

#[async_trait]
impl AddressesClient for RestClient {
    async fn create_address(
        &self,
        request: &AddressRequest,
    ) -> Result<AddressResponse, ClientError> {
        self.post("api/addresses", request).await
    }
}

#[async_trait]
impl OrdersClient for RestClient {
    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResponse, ClientError> {
        self.post("api/orders", request).await
    }

    async fn order_by_id(&self, id: &str) -> Result<OrderResponse, ClientError> {
        self.get(&format!("api/orders/{id}")).await
    }

    async fn orders_by_customer(
        &self,
        customer_id: i64,
    ) -> Result<Vec<OrderResponse>, ClientError> {
        self.get(&format!("api/orders/customer/{customer_id}")).await
    }

    async fn create_portability(
        &self,
        request: &PortabilityRequest,
    ) -> Result<PortabilityResponse, ClientError> {
        self.post("api/portabilities", request).await
    }

    async fn portability_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<PortabilityResponse, ClientError> {
        self.post(
            "api/portabilities/by-phone",
            &ByPhoneNumberRequest { phone_number: phone_number.to_string() },
        )
        .await
    }

    async fn update_imei(&self, id: i64, imei: &str) -> Result<PortabilityResponse, ClientError> {
        self.patch(&format!("api/portabilities/{id}/imei"), &ImeiUpdate { imei: imei.to_string() })
            .await
    }

    async fn update_nip(&self, id: i64, nip: &str) -> Result<PortabilityResponse, ClientError> {
        self.patch(&format!("api/portabilities/{id}/nip"), &NipUpdate { nip: nip.to_string() })
            .await
    }
}

#[async_trait]
impl ProductsClient for RestClient {
    async fn sim_card(&self, id: i64) -> Result<SimCardResponse, ClientError> {
        self.get(&format!("api/simcards/{id}")).await
    }
}

#[async_trait]
impl PaymentsClient for RestClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSessionResponse, ClientError> {
        self.post("api/checkout-sessions", request).await
    }
}

#[async_trait]
impl ScraperClient for RestClient {
    async fn imei_compatibility(
        &self,
        request: &ScrapeRequest,
    ) -> Result<ScrapeResponse, ClientError> {
        self.post("api/scrape-compatibility", request).await
    }

    async fn portability(&self, request: &ScrapePortabilityRequest) -> Result<Value, ClientError> {
        self.post("api/scrape-portability", request).await
    }
}
