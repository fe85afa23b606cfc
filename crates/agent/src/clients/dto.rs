//! Wire shapes of the collaborator services. Field names follow each
//! service's JSON; the payments and scraper services use snake_case.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerResponse {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByPhoneNumberRequest {
    pub phone_number: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByEmailRequest {
    pub email: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressType {
    Client,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    pub customer_id: i64,
    pub street: String,
    pub district: String,
    pub number: String,
    pub postal_code: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(rename = "type")]
    pub address_type: AddressType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressResponse {
    pub id: i64,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub customer_id: i64,
    pub product_id: i64,
    pub address_id: i64,
    /// Always null at creation; the checkout session comes after the order.
    #[serde(default)]
    pub checkout_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    #[serde(default)]
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub sim_id: Option<i64>,
    #[serde(default)]
    pub address_id: Option<i64>,
    #[serde(default)]
    pub checkout_id: Option<i64>,
    #[serde(default)]
    pub payment_id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortabilityRequest {
    pub phone_number: String,
    pub order_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortabilityResponse {
    pub id: i64,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub imei: Option<String>,
    #[serde(default)]
    pub portability_nip: Option<String>,
    #[serde(default)]
    pub portability_status: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImeiUpdate {
    pub imei: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NipUpdate {
    pub nip: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimCardResponse {
    pub id: i64,
    #[serde(default)]
    pub icc: Option<String>,
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub portability_id: Option<String>,
    #[serde(default)]
    pub sim_type: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub product_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    pub payment_link_id: i64,
    pub customer_id: i64,
    pub order_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stripe_session_url: Option<String>,
    #[serde(default)]
    pub checkout_session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub imei: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub compatibility: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapePortabilityRequest {
    pub phone_number: String,
    pub imei: String,
    pub portability_nip: String,
    pub icc: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AddressRequest, AddressType, OrderResponse};

    #[test]
    fn address_request_uses_camel_case_and_client_type() {
        let request = AddressRequest {
            customer_id: 42,
            street: "Av. Reforma".to_string(),
            district: "Juárez".to_string(),
            number: "222".to_string(),
            postal_code: "06600".to_string(),
            reference: None,
            address_type: AddressType::Client,
        };

        let value = serde_json::to_value(&request).expect("serialize");

        assert_eq!(value["customerId"], 42);
        assert_eq!(value["postalCode"], "06600");
        assert_eq!(value["type"], "CLIENT");
    }

    #[test]
    fn order_response_tolerates_missing_optional_fields() {
        let order: OrderResponse =
            serde_json::from_value(json!({ "id": "P17379827490001", "simId": 3 })).expect("decode");

        assert_eq!(order.id, "P17379827490001");
        assert_eq!(order.sim_id, Some(3));
        assert_eq!(order.checkout_id, None);
    }
}
