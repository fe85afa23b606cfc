use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::context::ContextMap;
use crate::flows::states::ConversationState;
use crate::sanitize::mask_phone;

/// Stable identifier derived from the sender's phone number.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(pub String);

impl ConversationKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Form safe to place in log fields.
    pub fn masked(&self) -> String {
        mask_phone(&self.0)
    }
}

impl fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConversationKey").field(&self.masked()).finish()
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub key: ConversationKey,
    pub phone_number: Option<String>,
    pub state: ConversationState,
    pub context: ContextMap,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(key: ConversationKey, now: DateTime<Utc>) -> Self {
        Self {
            phone_number: Some(key.as_str().to_owned()),
            key,
            state: ConversationState::Initial,
            context: ContextMap::new(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub conversation_key: ConversationKey,
    pub current_state: ConversationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active: bool,
    pub message_count: u64,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::conversation::{Conversation, ConversationKey};
    use crate::flows::states::ConversationState;

    #[test]
    fn new_conversation_starts_initial_and_active() {
        let now = Utc::now();
        let conversation = Conversation::new(ConversationKey::new("525512345678"), now);

        assert_eq!(conversation.state, ConversationState::Initial);
        assert!(conversation.active);
        assert!(conversation.context.is_empty());
        assert_eq!(conversation.phone_number.as_deref(), Some("525512345678"));
        assert_eq!(conversation.created_at, conversation.updated_at);
    }

    #[test]
    fn debug_output_masks_the_key() {
        let key = ConversationKey::new("525512345678");
        let rendered = format!("{key:?}");
        assert!(rendered.contains("***5678"));
        assert!(!rendered.contains("5255123"));
    }
}
