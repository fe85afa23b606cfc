use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use portline_core::errors::ToolError;
use portline_core::sanitize::mask_phone;

use super::{parse_arguments, require_text, to_result, FailureMessages, Tool, ToolContext};
use crate::clients::dto::{OrderRequest, PortabilityRequest};
use crate::clients::{OrdersClient, ProductsClient};

const ORDERS_DOWN: &str = "El servicio de órdenes no está disponible en este momento";
const PORTABILITY_DOWN: &str = "El servicio de portabilidad no está disponible en este momento";
const ORDER_NOT_FOUND: &str = "No se encontró una orden con ese ID";
const SIM_NOT_FOUND: &str = "No se encontró una tarjeta SIM con ese ID";

const CREATE_ORDER: FailureMessages = FailureMessages {
    rejected: "No se pudo crear la orden. Verifica que todos los datos sean correctos",
    unavailable: ORDERS_DOWN,
    unexpected: "Ocurrió un error al crear la orden",
};
const CREATE_PORTABILITY_ORDER: FailureMessages = FailureMessages {
    rejected: "No se pudo crear la orden. Verifica que todos los datos sean correctos",
    unavailable: PORTABILITY_DOWN,
    unexpected: "Ocurrió un error al crear la orden con portabilidad",
};
const ATTACH_PORTABILITY: FailureMessages = FailureMessages {
    rejected: "La orden se creó pero no se pudo procesar la portabilidad. El número podría estar ya en proceso de portabilidad",
    unavailable: PORTABILITY_DOWN,
    unexpected: "Ocurrió un error al crear la orden con portabilidad",
};
const ORDER_BY_ID: FailureMessages = FailureMessages {
    rejected: ORDER_NOT_FOUND,
    unavailable: ORDERS_DOWN,
    unexpected: "Ocurrió un error al buscar la orden",
};
const ORDERS_BY_CUSTOMER: FailureMessages = FailureMessages {
    rejected: "No se encontraron órdenes para ese cliente",
    unavailable: ORDERS_DOWN,
    unexpected: "Ocurrió un error al buscar las órdenes del cliente",
};
const PORTABILITY_BY_PHONE: FailureMessages = FailureMessages {
    rejected: "No se encontró información de portabilidad para ese número",
    unavailable: PORTABILITY_DOWN,
    unexpected: "Ocurrió un error al buscar la portabilidad",
};
const UPDATE_IMEI: FailureMessages = FailureMessages {
    rejected: "No se pudo registrar el IMEI. Verifica que la portabilidad exista",
    unavailable: PORTABILITY_DOWN,
    unexpected: "Ocurrió un error al registrar el IMEI",
};
const UPDATE_NIP: FailureMessages = FailureMessages {
    rejected: "No se pudo registrar el NIP. Verifica que la portabilidad exista",
    unavailable: PORTABILITY_DOWN,
    unexpected: "Ocurrió un error al registrar el NIP",
};
const SIM_ORDER_LOOKUP: FailureMessages = FailureMessages {
    rejected: ORDER_NOT_FOUND,
    unavailable: PORTABILITY_DOWN,
    unexpected: "Ocurrió un error al obtener el ICC de la SIM",
};
const SIM_LOOKUP: FailureMessages = FailureMessages {
    rejected: SIM_NOT_FOUND,
    unavailable: PORTABILITY_DOWN,
    unexpected: "Ocurrió un error al obtener el ICC de la SIM",
};

fn order_properties() -> Value {
    json!({
        "customerId": { "type": "integer", "description": "From registerCustomer or getCustomerByPhoneNumber. Never a made-up value." },
        "productId": { "type": "integer", "description": "Product chosen by the customer" },
        "addressId": { "type": "integer", "description": "From createAddress" }
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderArguments {
    customer_id: i64,
    product_id: i64,
    address_id: i64,
}

impl OrderArguments {
    fn validate(&self, tool: &str) -> Result<(), ToolError> {
        if self.customer_id <= 0 || self.product_id <= 0 || self.address_id <= 0 {
            return Err(ToolError::validation(
                tool,
                "Se requieren el cliente, el producto y la dirección para crear la orden",
            ));
        }
        Ok(())
    }

    fn into_request(self) -> OrderRequest {
        OrderRequest {
            customer_id: self.customer_id,
            product_id: self.product_id,
            address_id: self.address_id,
            checkout_id: None,
        }
    }
}

pub struct CreateNewOrder {
    orders: Arc<dyn OrdersClient>,
}

impl CreateNewOrder {
    pub fn new(orders: Arc<dyn OrdersClient>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for CreateNewOrder {
    fn name(&self) -> &'static str {
        "createNewOrderForSimCardPurchase"
    }

    fn description(&self) -> &'static str {
        "Creates a new SIM card order from customerId, productId and addressId. \
         Create the order BEFORE the checkout session and use the returned order id for it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": order_properties(),
            "required": ["customerId", "productId", "addressId"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let args: OrderArguments = parse_arguments(self.name(), input)?;
        args.validate(self.name())?;
        let order = self
            .orders
            .create_order(&args.into_request())
            .await
            .map_err(|error| CREATE_ORDER.classify(self.name(), error))?;
        to_result(self.name(), &order)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortabilityOrderArguments {
    #[serde(flatten)]
    order: OrderArguments,
    phone_number: String,
}

pub struct CreatePortabilityOrder {
    orders: Arc<dyn OrdersClient>,
}

impl CreatePortabilityOrder {
    pub fn new(orders: Arc<dyn OrdersClient>) -> Self {
        Self { orders }
    }
}

/// 10 to 15 digits, nothing else.
fn valid_portability_number(phone_number: &str) -> bool {
    (10..=15).contains(&phone_number.len()) && phone_number.chars().all(|c| c.is_ascii_digit())
}

#[async_trait]
impl Tool for CreatePortabilityOrder {
    fn name(&self) -> &'static str {
        "createOrderForSimCardPortabilityPurchase"
    }

    fn description(&self) -> &'static str {
        "For products that keep the customer's current number: creates the order and a \
         portability request for phoneNumber (10 to 15 digits). Create the order BEFORE the \
         checkout session."
    }

    fn parameters(&self) -> Value {
        let mut properties = order_properties();
        properties["phoneNumber"] =
            json!({ "type": "string", "description": "Number to port, 10 to 15 digits" });
        json!({
            "type": "object",
            "properties": properties,
            "required": ["customerId", "productId", "addressId", "phoneNumber"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let args: PortabilityOrderArguments = parse_arguments(self.name(), input)?;
        let phone_number = args.phone_number.trim().to_string();
        if !valid_portability_number(&phone_number) {
            return Err(ToolError::validation(
                self.name(),
                "El número de teléfono debe tener entre 10 y 15 dígitos",
            ));
        }
        args.order.validate(self.name())?;

        let order = self
            .orders
            .create_order(&args.order.into_request())
            .await
            .map_err(|error| CREATE_PORTABILITY_ORDER.classify(self.name(), error))?;

        let request = PortabilityRequest { phone_number, order_id: order.id.clone() };
        if let Err(error) = self.orders.create_portability(&request).await {
            warn!(
                event_name = "agent.tool.partial_failure",
                order_id = %order.id,
                phone = %mask_phone(&request.phone_number),
                "order created without portability"
            );
            return Err(ATTACH_PORTABILITY.classify(self.name(), error));
        }
        to_result(self.name(), &order)
    }
}

#[derive(Deserialize)]
struct OrderIdArgument {
    id: String,
}

pub struct GetOrderById {
    orders: Arc<dyn OrdersClient>,
}

impl GetOrderById {
    pub fn new(orders: Arc<dyn OrdersClient>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for GetOrderById {
    fn name(&self) -> &'static str {
        "getOrdersByOrderId"
    }

    fn description(&self) -> &'static str {
        "Get order information by order id (string, e.g. P17379827490001)"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let OrderIdArgument { id } = parse_arguments(self.name(), input)?;
        require_text(self.name(), &id, "Se requiere el ID de la orden")?;
        let order = self
            .orders
            .order_by_id(id.trim())
            .await
            .map_err(|error| ORDER_BY_ID.classify(self.name(), error))?;
        to_result(self.name(), &order)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerIdArgument {
    customer_id: i64,
}

pub struct GetOrdersByCustomerId {
    orders: Arc<dyn OrdersClient>,
}

impl GetOrdersByCustomerId {
    pub fn new(orders: Arc<dyn OrdersClient>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for GetOrdersByCustomerId {
    fn name(&self) -> &'static str {
        "getOrdersByCustomerId"
    }

    fn description(&self) -> &'static str {
        "Get every order of a customer by customer id"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "customerId": { "type": "integer" } },
            "required": ["customerId"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let CustomerIdArgument { customer_id } = parse_arguments(self.name(), input)?;
        let orders = self
            .orders
            .orders_by_customer(customer_id)
            .await
            .map_err(|error| ORDERS_BY_CUSTOMER.classify(self.name(), error))?;
        to_result(self.name(), &orders)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhoneArgument {
    phone_number: String,
}

pub struct GetPortabilityByPhoneNumber {
    orders: Arc<dyn OrdersClient>,
}

impl GetPortabilityByPhoneNumber {
    pub fn new(orders: Arc<dyn OrdersClient>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for GetPortabilityByPhoneNumber {
    fn name(&self) -> &'static str {
        "getPortabilityByPhoneNumber"
    }

    fn description(&self) -> &'static str {
        "Get portability information by phone number: portability id, status, order id and \
         whether IMEI and NIP were already provided"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "phoneNumber": { "type": "string" } },
            "required": ["phoneNumber"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let PhoneArgument { phone_number } = parse_arguments(self.name(), input)?;
        require_text(self.name(), &phone_number, "El número de teléfono es obligatorio")?;
        let portability = self
            .orders
            .portability_by_phone(phone_number.trim())
            .await
            .map_err(|error| PORTABILITY_BY_PHONE.classify(self.name(), error))?;
        to_result(self.name(), &portability)
    }
}

#[derive(Deserialize)]
struct ImeiArguments {
    id: i64,
    imei: String,
}

pub struct UpdateImei {
    orders: Arc<dyn OrdersClient>,
}

impl UpdateImei {
    pub fn new(orders: Arc<dyn OrdersClient>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for UpdateImei {
    fn name(&self) -> &'static str {
        "updateImei"
    }

    fn description(&self) -> &'static str {
        "Stores the device IMEI on an existing portability (id from getPortabilityByPhoneNumber)"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer", "description": "Portability id" },
                "imei": { "type": "string" }
            },
            "required": ["id", "imei"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let args: ImeiArguments = parse_arguments(self.name(), input)?;
        require_text(self.name(), &args.imei, "El IMEI es obligatorio")?;
        if args.id <= 0 {
            return Err(ToolError::validation(self.name(), "Se requiere el ID de la portabilidad"));
        }
        let portability = self
            .orders
            .update_imei(args.id, args.imei.trim())
            .await
            .map_err(|error| UPDATE_IMEI.classify(self.name(), error))?;
        to_result(self.name(), &portability)
    }
}

#[derive(Deserialize)]
struct NipArguments {
    id: i64,
    nip: String,
}

pub struct UpdatePortabilityNip {
    orders: Arc<dyn OrdersClient>,
}

impl UpdatePortabilityNip {
    pub fn new(orders: Arc<dyn OrdersClient>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for UpdatePortabilityNip {
    fn name(&self) -> &'static str {
        "updatePortabilityNip"
    }

    fn description(&self) -> &'static str {
        "Stores the portability NIP the customer received from their current carrier"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer", "description": "Portability id" },
                "nip": { "type": "string" }
            },
            "required": ["id", "nip"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let args: NipArguments = parse_arguments(self.name(), input)?;
        require_text(self.name(), &args.nip, "El NIP es obligatorio")?;
        if args.id <= 0 {
            return Err(ToolError::validation(self.name(), "Se requiere el ID de la portabilidad"));
        }
        let portability = self
            .orders
            .update_nip(args.id, args.nip.trim())
            .await
            .map_err(|error| UPDATE_NIP.classify(self.name(), error))?;
        to_result(self.name(), &portability)
    }
}

pub struct GetSimIcc {
    orders: Arc<dyn OrdersClient>,
    products: Arc<dyn ProductsClient>,
}

impl GetSimIcc {
    pub fn new(orders: Arc<dyn OrdersClient>, products: Arc<dyn ProductsClient>) -> Self {
        Self { orders, products }
    }
}

#[async_trait]
impl Tool for GetSimIcc {
    fn name(&self) -> &'static str {
        "getSimIcc"
    }

    fn description(&self) -> &'static str {
        "Get the ICC of the SIM card assigned to an order; needed to complete a portability"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string", "description": "Order id" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let OrderIdArgument { id } = parse_arguments(self.name(), input)?;
        require_text(self.name(), &id, "Se requiere el ID de la orden")?;
        let order = self
            .orders
            .order_by_id(id.trim())
            .await
            .map_err(|error| SIM_ORDER_LOOKUP.classify(self.name(), error))?;
        let Some(sim_id) = order.sim_id else {
            return Err(ToolError::rejected(
                self.name(),
                SIM_NOT_FOUND,
                format!("order {} has no SIM assigned", order.id),
            ));
        };
        let sim = self
            .products
            .sim_card(sim_id)
            .await
            .map_err(|error| SIM_LOOKUP.classify(self.name(), error))?;
        to_result(self.name(), &sim)
    }
}
