use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use portline_core::errors::ToolError;

use super::{parse_arguments, require_text, to_result, FailureMessages, Tool, ToolContext};
use crate::clients::dto::{ScrapePortabilityRequest, ScrapeRequest};
use crate::clients::ScraperClient;

const IMEI_CHECK: FailureMessages = FailureMessages {
    rejected: "No se pudo verificar la compatibilidad del IMEI. Intenta nuevamente más tarde",
    unavailable: "El servicio de verificación de IMEI no está disponible en este momento",
    unexpected: "Ocurrió un error al verificar la compatibilidad del IMEI",
};
const PORTABILITY_CHECK: FailureMessages = FailureMessages {
    rejected: "No se pudo verificar la portabilidad. Intenta nuevamente más tarde",
    unavailable: "El servicio de verificación de portabilidad no está disponible en este momento",
    unexpected: "Ocurrió un error al verificar la portabilidad",
};

pub struct ScrapeImeiCompatibility {
    scraper: Arc<dyn ScraperClient>,
}

impl ScrapeImeiCompatibility {
    pub fn new(scraper: Arc<dyn ScraperClient>) -> Self {
        Self { scraper }
    }
}

#[async_trait]
impl Tool for ScrapeImeiCompatibility {
    fn name(&self) -> &'static str {
        "scrapeImeiCompatibility"
    }

    fn description(&self) -> &'static str {
        "Checks whether a device IMEI is compatible with the network"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "imei": { "type": "string" } },
            "required": ["imei"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let mut request: ScrapeRequest = parse_arguments(self.name(), input)?;
        require_text(self.name(), &request.imei, "El IMEI es obligatorio")?;
        request.imei = request.imei.trim().to_string();
        let compatibility = self
            .scraper
            .imei_compatibility(&request)
            .await
            .map_err(|error| IMEI_CHECK.classify(self.name(), error))?;
        to_result(self.name(), &compatibility)
    }
}

pub struct ScrapePortability {
    scraper: Arc<dyn ScraperClient>,
}

impl ScrapePortability {
    pub fn new(scraper: Arc<dyn ScraperClient>) -> Self {
        Self { scraper }
    }
}

#[async_trait]
impl Tool for ScrapePortability {
    fn name(&self) -> &'static str {
        "scrapePortability"
    }

    fn description(&self) -> &'static str {
        "Submits the portability to the carrier once phone number, IMEI, NIP, SIM ICC and the \
         customer's name and email are all known"
    }

    fn parameters(&self) -> Value {
        let text = json!({ "type": "string" });
        json!({
            "type": "object",
            "properties": {
                "phone_number": text,
                "imei": text,
                "portability_nip": text,
                "icc": text,
                "first_name": text,
                "last_name": text,
                "email": text
            },
            "required": ["phone_number", "imei", "portability_nip", "icc", "first_name", "last_name", "email"]
        })
    }

    async fn execute(&self, _context: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let request: ScrapePortabilityRequest = parse_arguments(self.name(), input)?;
        let fields = [
            (&request.phone_number, "El número de teléfono es obligatorio"),
            (&request.imei, "El IMEI es obligatorio"),
            (&request.portability_nip, "El NIP es obligatorio"),
            (&request.icc, "El ICC de la SIM es obligatorio"),
        ];
        for (value, message) in fields {
            require_text(self.name(), value, message)?;
        }
        let outcome = self
            .scraper
            .portability(&request)
            .await
            .map_err(|error| PORTABILITY_CHECK.classify(self.name(), error))?;
        to_result(self.name(), &outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use portline_core::domain::conversation::ConversationKey;
    use portline_core::errors::ToolErrorKind;

    use crate::clients::{ClientError, FakeBackend};
    use crate::tools::{ScrapeImeiCompatibility, ScrapePortability, Tool, ToolContext};

    fn context() -> ToolContext {
        ToolContext { conversation_key: ConversationKey::new("525512345678") }
    }

    #[tokio::test]
    async fn imei_check_returns_compatibility() {
        let backend = Arc::new(FakeBackend::new());
        backend.respond("imei_compatibility", Ok(json!({ "compatibility": true, "message": "Compatible" })));
        let tool = ScrapeImeiCompatibility::new(backend);

        let result = tool.execute(&context(), json!({ "imei": "356938035643809" })).await.expect("checked");

        assert_eq!(result["compatibility"], true);
    }

    #[tokio::test]
    async fn scraper_outage_is_unavailable() {
        let backend = Arc::new(FakeBackend::new());
        backend.respond("scrape_portability", Err(ClientError::Transport("timeout".to_string())));
        let tool = ScrapePortability::new(backend);

        let error = tool
            .execute(
                &context(),
                json!({
                    "phone_number": "5512345678", "imei": "356938035643809", "portability_nip": "1234",
                    "icc": "89570000000000000001", "first_name": "Ana", "last_name": "López",
                    "email": "ana@example.com"
                }),
            )
            .await
            .expect_err("down");

        assert_eq!(error.kind, ToolErrorKind::Unavailable);
        assert_eq!(
            error.user_message,
            "El servicio de verificación de portabilidad no está disponible en este momento"
        );
    }
}
