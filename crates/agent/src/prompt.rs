use tera::{Context, Tera};
use thiserror::Error;

use portline_core::flows::ConversationState;

const SYSTEM_TEMPLATE: &str = "system_prompt.tera";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template error: {0}")]
    Template(String),
}

/// Everything the system prompt interpolates for one turn.
#[derive(Clone, Debug)]
pub struct PromptInputs<'a> {
    pub reference_text: &'a str,
    pub phone_number: &'a str,
    pub user_query: &'a str,
    pub state: ConversationState,
    pub available_data: &'a str,
}

pub struct PromptBuilder {
    tera: Tera,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, PromptError> {
        Self::from_template(include_str!("../../../templates/prompts/system_prompt.tera"))
    }

    pub fn from_template(source: &str) -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        tera.add_raw_template(SYSTEM_TEMPLATE, source)
            .map_err(|error| PromptError::Template(error.to_string()))?;
        Ok(Self { tera })
    }

    pub fn system_prompt(&self, inputs: &PromptInputs<'_>) -> Result<String, PromptError> {
        let mut context = Context::new();
        context.insert("context", inputs.reference_text);
        context.insert("phone_number", inputs.phone_number);
        context.insert("user_query", inputs.user_query);
        context.insert("conversation_state", inputs.state.as_str());
        context.insert("available_data", inputs.available_data);
        self.tera
            .render(SYSTEM_TEMPLATE, &context)
            .map_err(|error| PromptError::Template(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use portline_core::flows::ConversationState;

    use super::{PromptBuilder, PromptInputs};

    #[test]
    fn bundled_template_renders_every_input() {
        let builder = PromptBuilder::new().expect("template loads");

        let prompt = builder
            .system_prompt(&PromptInputs {
                reference_text: "Plan básico 5GB por $199",
                phone_number: "525512345678",
                user_query: "Quiero un chip",
                state: ConversationState::ProductSelected,
                available_data: "=== INFORMACIÓN DISPONIBLE EN EL CONTEXTO ===",
            })
            .expect("render");

        assert!(prompt.contains("Plan básico 5GB por $199"));
        assert!(prompt.contains("525512345678"));
        assert!(prompt.contains("Estado actual de la conversación: PRODUCT_SELECTED"));
        assert!(prompt.contains("Mensaje del cliente: Quiero un chip"));
        assert!(prompt.contains("=== INFORMACIÓN DISPONIBLE EN EL CONTEXTO ==="));
        assert!(prompt.contains("[STATE:NOMBRE_DEL_ESTADO]"));
    }

    #[test]
    fn broken_template_is_reported() {
        assert!(PromptBuilder::from_template("{{ unclosed").is_err());
    }
}
