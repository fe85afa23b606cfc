use thiserror::Error;

use crate::crypto::CryptoError;
use crate::flows::TransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested conversation does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(DomainError::Transition(_))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Domain(DomainError::Crypto(error)) => {
                Self::Internal { message: error.to_string(), correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

/// Which part of the tool boundary produced a [`ToolError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolErrorKind {
    /// Arguments rejected before any network call.
    Validation,
    /// Collaborator unreachable or failing.
    Unavailable,
    /// Collaborator answered but refused the operation.
    Rejected,
    Unexpected,
}

/// Normalized failure of a single tool invocation.
///
/// `user_message` is localized and safe to show; `technical_detail` is for logs only.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("tool `{tool}` failed: {technical_detail}")]
pub struct ToolError {
    pub tool: String,
    pub kind: ToolErrorKind,
    pub user_message: String,
    pub technical_detail: String,
}

impl ToolError {
    pub fn new(
        tool: impl Into<String>,
        kind: ToolErrorKind,
        user_message: impl Into<String>,
        technical_detail: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            kind,
            user_message: user_message.into(),
            technical_detail: technical_detail.into(),
        }
    }

    pub fn validation(tool: impl Into<String>, user_message: impl Into<String>) -> Self {
        let user_message = user_message.into();
        let detail = format!("validation failed: {user_message}");
        Self::new(tool, ToolErrorKind::Validation, user_message, detail)
    }

    pub fn unavailable(
        tool: impl Into<String>,
        user_message: impl Into<String>,
        technical_detail: impl Into<String>,
    ) -> Self {
        Self::new(tool, ToolErrorKind::Unavailable, user_message, technical_detail)
    }

    pub fn rejected(
        tool: impl Into<String>,
        user_message: impl Into<String>,
        technical_detail: impl Into<String>,
    ) -> Self {
        Self::new(tool, ToolErrorKind::Rejected, user_message, technical_detail)
    }

    pub fn unexpected(tool: impl Into<String>, technical_detail: impl Into<String>) -> Self {
        Self::new(
            tool,
            ToolErrorKind::Unexpected,
            "Ocurrió un error inesperado al procesar la operación",
            technical_detail,
        )
    }

    /// Text returned to the end user and recorded as `last_error`.
    pub fn message_for_user(&self) -> String {
        format!(
            "La operación '{}' no pudo completarse: {}. Por favor, verifica los datos e intenta nuevamente.",
            self.tool, self.user_message
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError, ToolError, ToolErrorKind};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "unknown message type".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("missing key".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn tool_error_renders_localized_user_message() {
        let error = ToolError::unavailable(
            "createNewOrderForSimCardPurchase",
            "El servicio de órdenes no está disponible en este momento",
            "connection refused",
        );

        assert_eq!(error.kind, ToolErrorKind::Unavailable);
        assert_eq!(
            error.message_for_user(),
            "La operación 'createNewOrderForSimCardPurchase' no pudo completarse: El servicio de órdenes no está disponible en este momento. Por favor, verifica los datos e intenta nuevamente."
        );
        assert!(!error.message_for_user().contains("connection refused"));
        assert!(error.to_string().contains("connection refused"));
    }

    #[test]
    fn validation_errors_keep_the_specific_message() {
        let error =
            ToolError::validation("Create_checkout_session", "Se requiere el ID del cliente");
        assert_eq!(error.kind, ToolErrorKind::Validation);
        assert_eq!(error.user_message, "Se requiere el ID del cliente");
    }
}
