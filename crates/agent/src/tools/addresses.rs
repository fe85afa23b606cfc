use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use portline_core::errors::ToolError;

use super::{parse_arguments, require_text, to_result, FailureMessages, Tool, ToolContext};
use crate::clients::dto::{AddressRequest, AddressType};
use crate::clients::AddressesClient;

const CREATE: FailureMessages = FailureMessages {
    rejected: "No se pudo registrar la dirección. Verifica que todos los datos sean correctos",
    unavailable: "El servicio de direcciones no está disponible en este momento",
    unexpected: "Ocurrió un error al registrar la dirección",
};

const STREET_MAX: usize = 200;
const DISTRICT_MAX: usize = 100;
const POSTAL_CODE_MAX: usize = 20;
const REFERENCE_MAX: usize = 45;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressArguments {
    customer_id: i64,
    street: String,
    #[serde(default)]
    district: String,
    #[serde(default)]
    number: String,
    postal_code: String,
    #[serde(default)]
    reference: Option<String>,
}

pub struct CreateAddress {
    addresses: Arc<dyn AddressesClient>,
}

impl CreateAddress {
    pub fn new(addresses: Arc<dyn AddressesClient>) -> Self {
        Self { addresses }
    }
}

#[async_trait]
impl Tool for CreateAddress {
    fn name(&self) -> &'static str {
        "createAddress"
    }

    fn description(&self) -> &'static str {
        "Registers the customer's shipping address. customerId comes from registerCustomer or \
         getCustomerByPhoneNumber. street (max 200) and postalCode (max 20) are required; \
         district max 100, reference max 45."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "customerId": { "type": "integer" },
                "street": { "type": "string", "maxLength": STREET_MAX },
                "district": { "type": "string", "maxLength": DISTRICT_MAX },
                "number": { "type": "string" },
                "postalCode": { "type": "string", "maxLength": POSTAL_CODE_MAX },
                "reference": { "type": "string", "maxLength": REFERENCE_MAX }
            },
            "required": ["customerId", "street", "postalCode"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let args: AddressArguments = parse_arguments(self.name(), input)?;
        require_text(self.name(), &args.street, "La calle es obligatoria")?;
        require_text(self.name(), &args.postal_code, "El código postal es obligatorio")?;
        let too_long = args.street.chars().count() > STREET_MAX
            || args.district.chars().count() > DISTRICT_MAX
            || args.postal_code.chars().count() > POSTAL_CODE_MAX
            || args.reference.as_deref().is_some_and(|reference| reference.chars().count() > REFERENCE_MAX);
        if too_long {
            return Err(ToolError::validation(
                self.name(),
                "Alguno de los datos de la dirección excede la longitud permitida",
            ));
        }

        let request = AddressRequest {
            customer_id: args.customer_id,
            street: args.street,
            district: args.district,
            number: args.number,
            postal_code: args.postal_code,
            reference: args.reference,
            address_type: AddressType::Client,
        };
        let address = self
            .addresses
            .create_address(&request)
            .await
            .map_err(|error| CREATE.classify(self.name(), error))?;
        to_result(self.name(), &address)
    }
}
