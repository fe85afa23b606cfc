pub mod audit;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod sanitize;

pub use audit::{AuditActor, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use crypto::{AesGcmCipher, CryptoError, FieldCipher};
pub use domain::context::{ContextKey, ContextMap};
pub use domain::conversation::{Conversation, ConversationKey, ConversationStats};
pub use domain::message::{ChatMessage, MessageId, MessageType, NewMessage};
pub use errors::{ApplicationError, DomainError, InterfaceError, ToolError, ToolErrorKind};
pub use flows::{
    ConversationState, OrdinalTransitionPolicy, StateMachine, TableTransitionPolicy,
    TransitionPolicy,
};
