use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Known context keys. Anything else stored in a [`ContextMap`] is an unknown key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKey {
    CustomerId,
    CustomerName,
    CustomerFirstName,
    CustomerLastName,
    CustomerEmail,
    CustomerPhone,
    AddressId,
    AddressFull,
    AddressStreet,
    AddressNumber,
    AddressDistrict,
    AddressPostalCode,
    AddressReference,
    OrderId,
    OrderProductId,
    OrderStatus,
    LastOrderId,
    PortabilityId,
    PortabilityPhone,
    PortabilityStatus,
    PortabilityImei,
    PortabilityNip,
    PortabilityOrderId,
    SimCardIcc,
    CheckoutSessionId,
    CheckoutSessionUrl,
    PaymentCompleted,
    ImeiChecked,
    ImeiCompatible,
    ImeiCompatibilityMessage,
    LastError,
    ErrorTimestamp,
    FailedTool,
    ErrorCount,
    CleanedAt,
    RetentionPolicy,
}

impl ContextKey {
    pub const ALL: [ContextKey; 36] = [
        Self::CustomerId,
        Self::CustomerName,
        Self::CustomerFirstName,
        Self::CustomerLastName,
        Self::CustomerEmail,
        Self::CustomerPhone,
        Self::AddressId,
        Self::AddressFull,
        Self::AddressStreet,
        Self::AddressNumber,
        Self::AddressDistrict,
        Self::AddressPostalCode,
        Self::AddressReference,
        Self::OrderId,
        Self::OrderProductId,
        Self::OrderStatus,
        Self::LastOrderId,
        Self::PortabilityId,
        Self::PortabilityPhone,
        Self::PortabilityStatus,
        Self::PortabilityImei,
        Self::PortabilityNip,
        Self::PortabilityOrderId,
        Self::SimCardIcc,
        Self::CheckoutSessionId,
        Self::CheckoutSessionUrl,
        Self::PaymentCompleted,
        Self::ImeiChecked,
        Self::ImeiCompatible,
        Self::ImeiCompatibilityMessage,
        Self::LastError,
        Self::ErrorTimestamp,
        Self::FailedTool,
        Self::ErrorCount,
        Self::CleanedAt,
        Self::RetentionPolicy,
    ];

    /// Error-tracking fields cleared when a retry is detected.
    pub const ERROR_TRACKING: [ContextKey; 4] =
        [Self::LastError, Self::ErrorTimestamp, Self::FailedTool, Self::ErrorCount];

    /// PII purged by the retention cleanup.
    pub const RETENTION_PURGED: [ContextKey; 17] = [
        Self::CustomerEmail,
        Self::CustomerPhone,
        Self::CustomerName,
        Self::CustomerFirstName,
        Self::CustomerLastName,
        Self::AddressFull,
        Self::AddressStreet,
        Self::AddressDistrict,
        Self::AddressNumber,
        Self::AddressPostalCode,
        Self::AddressReference,
        Self::PortabilityNip,
        Self::PortabilityImei,
        Self::PortabilityPhone,
        Self::CheckoutSessionUrl,
        Self::SimCardIcc,
        Self::ImeiCompatibilityMessage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CustomerId => "customer_id",
            Self::CustomerName => "customer_name",
            Self::CustomerFirstName => "customer_first_name",
            Self::CustomerLastName => "customer_last_name",
            Self::CustomerEmail => "customer_email",
            Self::CustomerPhone => "customer_phone",
            Self::AddressId => "address_id",
            Self::AddressFull => "address_full",
            Self::AddressStreet => "address_street",
            Self::AddressNumber => "address_number",
            Self::AddressDistrict => "address_district",
            Self::AddressPostalCode => "address_postal_code",
            Self::AddressReference => "address_reference",
            Self::OrderId => "order_id",
            Self::OrderProductId => "order_product_id",
            Self::OrderStatus => "order_status",
            Self::LastOrderId => "last_order_id",
            Self::PortabilityId => "portability_id",
            Self::PortabilityPhone => "portability_phone",
            Self::PortabilityStatus => "portability_status",
            Self::PortabilityImei => "portability_imei",
            Self::PortabilityNip => "portability_nip",
            Self::PortabilityOrderId => "portability_order_id",
            Self::SimCardIcc => "sim_card_icc",
            Self::CheckoutSessionId => "checkout_session_id",
            Self::CheckoutSessionUrl => "checkout_session_url",
            Self::PaymentCompleted => "payment_completed",
            Self::ImeiChecked => "imei_checked",
            Self::ImeiCompatible => "imei_compatible",
            Self::ImeiCompatibilityMessage => "imei_compatibility_message",
            Self::LastError => "last_error",
            Self::ErrorTimestamp => "error_timestamp",
            Self::FailedTool => "failed_tool",
            Self::ErrorCount => "error_count",
            Self::CleanedAt => "_cleaned_at",
            Self::RetentionPolicy => "_retention_policy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|key| key.as_str() == value)
    }

    /// Values under these keys are stored as ciphertext.
    pub fn is_encrypted(self) -> bool {
        matches!(
            self,
            Self::PortabilityNip | Self::PortabilityImei | Self::CheckoutSessionUrl | Self::SimCardIcc
        )
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-conversation facts keyed by the [`ContextKey`] vocabulary.
///
/// Keys outside the vocabulary are accepted through the `*_raw` methods and reported by
/// [`ContextMap::unknown_keys`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextMap(BTreeMap<String, Value>);

impl ContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: ContextKey, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: ContextKey, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.as_str().to_owned(), value.into())
    }

    pub fn insert_raw(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: ContextKey) -> Option<&Value> {
        self.0.get(key.as_str())
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: ContextKey) -> Option<Value> {
        self.0.remove(key.as_str())
    }

    pub fn contains(&self, key: ContextKey) -> bool {
        self.0.get(key.as_str()).is_some_and(|value| !value.is_null())
    }

    pub fn str(&self, key: ContextKey) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Integer view that also accepts numeric strings.
    pub fn i64(&self, key: ContextKey) -> Option<i64> {
        match self.get(key)? {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn bool(&self, key: ContextKey) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(flag) => Some(*flag),
            Value::String(text) => text.parse().ok(),
            _ => None,
        }
    }

    /// Renders a scalar as display text; `None` for null or missing.
    pub fn display(&self, key: ContextKey) -> Option<String> {
        match self.get(key)? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn merge(&mut self, other: ContextMap) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn unknown_keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str).filter(|key| ContextKey::parse(key).is_none())
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl From<BTreeMap<String, Value>> for ContextMap {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::domain::context::{ContextKey, ContextMap};

    #[test]
    fn every_key_name_parses_back() {
        for key in ContextKey::ALL {
            assert_eq!(ContextKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(ContextKey::parse("favourite_color"), None);
    }

    #[test]
    fn only_secret_bearing_keys_are_encrypted() {
        let encrypted: Vec<ContextKey> =
            ContextKey::ALL.iter().copied().filter(|key| key.is_encrypted()).collect();
        assert_eq!(
            encrypted,
            vec![
                ContextKey::PortabilityImei,
                ContextKey::PortabilityNip,
                ContextKey::SimCardIcc,
                ContextKey::CheckoutSessionUrl,
            ]
        );
    }

    #[test]
    fn typed_views_tolerate_stringly_values() {
        let context = ContextMap::new()
            .with(ContextKey::CustomerId, "42")
            .with(ContextKey::ErrorCount, 3)
            .with(ContextKey::PaymentCompleted, "true")
            .with(ContextKey::OrderId, Value::Null);

        assert_eq!(context.i64(ContextKey::CustomerId), Some(42));
        assert_eq!(context.i64(ContextKey::ErrorCount), Some(3));
        assert_eq!(context.bool(ContextKey::PaymentCompleted), Some(true));
        assert!(!context.contains(ContextKey::OrderId));
        assert_eq!(context.display(ContextKey::ErrorCount).as_deref(), Some("3"));
    }

    #[test]
    fn unknown_keys_are_kept_and_reported() {
        let mut context = ContextMap::new().with(ContextKey::AddressId, 9);
        context.insert_raw("campaign", json!("verano"));

        let serialized = serde_json::to_value(&context).expect("serialize context");
        assert_eq!(serialized, json!({"address_id": 9, "campaign": "verano"}));
        assert_eq!(context.unknown_keys().collect::<Vec<_>>(), vec!["campaign"]);
    }
}
