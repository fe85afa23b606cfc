use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use portline_core::errors::ToolError;

use super::{parse_arguments, require_text, to_result, FailureMessages, Tool, ToolContext};
use crate::clients::dto::CustomerRequest;
use crate::clients::CustomersClient;

const REGISTER: FailureMessages = FailureMessages {
    rejected: "No se pudo registrar el cliente. Verifica que el email o teléfono no estén ya registrados",
    unavailable: "El servicio de registro no está disponible en este momento",
    unexpected: "Ocurrió un error al registrar el cliente",
};
const BY_ID: FailureMessages = FailureMessages {
    rejected: "No se encontró un cliente con ese ID",
    unavailable: "El servicio de clientes no está disponible en este momento",
    unexpected: "Ocurrió un error al buscar el cliente",
};
const BY_EMAIL: FailureMessages = FailureMessages {
    rejected: "No se encontró un cliente con ese email",
    unavailable: "El servicio de clientes no está disponible en este momento",
    unexpected: "Ocurrió un error al buscar el cliente por email",
};
const BY_PHONE: FailureMessages = FailureMessages {
    rejected: "No se encontró un cliente con ese número de teléfono",
    unavailable: "El servicio de clientes no está disponible en este momento. Por favor intenta nuevamente.",
    unexpected: "Ocurrió un error inesperado al buscar el cliente por teléfono",
};

pub struct RegisterCustomer {
    customers: Arc<dyn CustomersClient>,
}

impl RegisterCustomer {
    pub fn new(customers: Arc<dyn CustomersClient>) -> Self {
        Self { customers }
    }
}

#[async_trait]
impl Tool for RegisterCustomer {
    fn name(&self) -> &'static str {
        "registerCustomer"
    }

    fn description(&self) -> &'static str {
        "Registers a new customer with first name, last name, email and phone number. \
         Returns the registered customer including its id."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "firstName": { "type": "string" },
                "lastName": { "type": "string" },
                "email": { "type": "string" },
                "phoneNumber": { "type": "string" }
            },
            "required": ["firstName", "lastName", "email", "phoneNumber"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let request: CustomerRequest = parse_arguments(self.name(), input)?;
        require_text(self.name(), &request.first_name, "El nombre es obligatorio")?;
        require_text(self.name(), &request.last_name, "El apellido es obligatorio")?;
        require_text(self.name(), &request.email, "El email es obligatorio")?;
        require_text(self.name(), &request.phone_number, "El teléfono es obligatorio")?;

        let customer = self
            .customers
            .register(&request)
            .await
            .map_err(|error| REGISTER.classify(self.name(), error))?;
        to_result(self.name(), &customer)
    }
}

#[derive(Deserialize)]
struct IdArgument {
    id: i64,
}

pub struct GetCustomerById {
    customers: Arc<dyn CustomersClient>,
}

impl GetCustomerById {
    pub fn new(customers: Arc<dyn CustomersClient>) -> Self {
        Self { customers }
    }
}

#[async_trait]
impl Tool for GetCustomerById {
    fn name(&self) -> &'static str {
        "getCustomerById"
    }

    fn description(&self) -> &'static str {
        "Get a customer information by their id"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "integer", "description": "Customer ID" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let IdArgument { id } = parse_arguments(self.name(), input)?;
        let customer = self
            .customers
            .customer_by_id(id)
            .await
            .map_err(|error| BY_ID.classify(self.name(), error))?;
        to_result(self.name(), &customer)
    }
}

#[derive(Deserialize)]
struct EmailArgument {
    email: String,
}

pub struct GetCustomerByEmail {
    customers: Arc<dyn CustomersClient>,
}

impl GetCustomerByEmail {
    pub fn new(customers: Arc<dyn CustomersClient>) -> Self {
        Self { customers }
    }
}

#[async_trait]
impl Tool for GetCustomerByEmail {
    fn name(&self) -> &'static str {
        "getCustomerByEmail"
    }

    fn description(&self) -> &'static str {
        "You can use this tool to get a customer information with their email"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "email": { "type": "string" } },
            "required": ["email"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let EmailArgument { email } = parse_arguments(self.name(), input)?;
        require_text(self.name(), &email, "El email es obligatorio")?;
        let customer = self
            .customers
            .customer_by_email(email.trim())
            .await
            .map_err(|error| BY_EMAIL.classify(self.name(), error))?;
        to_result(self.name(), &customer)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhoneArgument {
    phone_number: String,
}

pub struct GetCustomerByPhoneNumber {
    customers: Arc<dyn CustomersClient>,
}

impl GetCustomerByPhoneNumber {
    pub fn new(customers: Arc<dyn CustomersClient>) -> Self {
        Self { customers }
    }
}

#[async_trait]
impl Tool for GetCustomerByPhoneNumber {
    fn name(&self) -> &'static str {
        "getCustomerByPhoneNumber"
    }

    fn description(&self) -> &'static str {
        "Get a customer by phone number to learn whether they are registered instead of asking. \
         Fails with \"No se encontró un cliente con ese número de teléfono\" when the customer \
         is not registered."
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
        let customer = self
            .customers
            .customer_by_phone(phone_number.trim())
            .await
            .map_err(|error| BY_PHONE.classify(self.name(), error))?;
        to_result(self.name(), &customer)
    }
}
