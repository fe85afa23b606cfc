use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use portline_core::errors::ToolError;

use super::{parse_arguments, to_result, FailureMessages, Tool, ToolContext};
use crate::clients::dto::CheckoutSessionRequest;
use crate::clients::PaymentsClient;

const CHECKOUT: FailureMessages = FailureMessages {
    rejected: "No se pudo crear la sesión de pago. Verifica que los datos sean correctos",
    unavailable: "El servicio de pagos no está disponible en este momento",
    unexpected: "Ocurrió un error al crear la sesión de pago",
};

/// Where the payment page sends the customer afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutUrls {
    pub fn new(success_url: impl Into<String>, cancel_url: impl Into<String>) -> Self {
        Self { success_url: success_url.into(), cancel_url: cancel_url.into() }
    }
}

#[derive(Deserialize)]
struct CheckoutArguments {
    #[serde(default)]
    payment_link_id: Option<i64>,
    #[serde(default)]
    customer_id: Option<i64>,
    #[serde(default)]
    order_id: Option<String>,
}

pub struct CreateCheckoutSession {
    payments: Arc<dyn PaymentsClient>,
    urls: CheckoutUrls,
}

impl CreateCheckoutSession {
    pub fn new(payments: Arc<dyn PaymentsClient>, urls: CheckoutUrls) -> Self {
        Self { payments, urls }
    }

    fn validate(&self, args: CheckoutArguments) -> Result<CheckoutSessionRequest, ToolError> {
        let payment_link_id = args
            .payment_link_id
            .filter(|id| *id > 0)
            .ok_or_else(|| ToolError::validation(self.name(), "Se requiere un ID de enlace de pago válido"))?;
        let customer_id = args.customer_id.ok_or_else(|| {
            ToolError::validation(self.name(), "Se requiere el ID del cliente para crear la sesión de pago")
        })?;
        let order_id = args.order_id.filter(|id| !id.trim().is_empty()).ok_or_else(|| {
            ToolError::validation(self.name(), "Se requiere el ID de la orden para crear la sesión de pago")
        })?;
        Ok(CheckoutSessionRequest {
            payment_link_id,
            customer_id,
            order_id,
            success_url: self.urls.success_url.clone(),
            cancel_url: self.urls.cancel_url.clone(),
        })
    }
}

#[async_trait]
impl Tool for CreateCheckoutSession {
    fn name(&self) -> &'static str {
        "Create_checkout_session"
    }

    fn description(&self) -> &'static str {
        "Creates the payment checkout session AFTER the order exists. customer_id must be the \
         same customer used for the order and order_id comes from the order creation. Share the \
         returned stripe_session_url with the customer."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "payment_link_id": { "type": "integer", "description": "Payment link of the product being purchased" },
                "customer_id": { "type": "integer" },
                "order_id": { "type": "string" }
            },
            "required": ["payment_link_id", "customer_id", "order_id"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let args: CheckoutArguments = parse_arguments(self.name(), input)?;
        let request = self.validate(args)?;
        let session = self
            .payments
            .create_checkout_session(&request)
            .await
            .map_err(|error| CHECKOUT.classify(self.name(), error))?;
        to_result(self.name(), &session)
    }
}
