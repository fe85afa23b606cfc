use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of conversation states. The rank returned by [`ConversationState::ordinal`]
/// drives progression checks in the ordinal transition policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    Initial,
    CustomerRegistration,
    IntentSelection,
    ProductSelected,
    ImeiRequired,
    ImeiValidated,
    AddressRequired,
    PaymentPending,
    PaymentConfirmed,
    SimShipped,
    PortabilityWaitSim,
    PortabilityNipRequired,
    PortabilitySimActivation,
    PortabilityInProgress,
    PortabilityCompleted,
    Completed,
    Blocked,
    ErrorState,
    Abandoned,
}

impl ConversationState {
    pub const ALL: [ConversationState; 19] = [
        Self::Initial,
        Self::CustomerRegistration,
        Self::IntentSelection,
        Self::ProductSelected,
        Self::ImeiRequired,
        Self::ImeiValidated,
        Self::AddressRequired,
        Self::PaymentPending,
        Self::PaymentConfirmed,
        Self::SimShipped,
        Self::PortabilityWaitSim,
        Self::PortabilityNipRequired,
        Self::PortabilitySimActivation,
        Self::PortabilityInProgress,
        Self::PortabilityCompleted,
        Self::Completed,
        Self::Blocked,
        Self::ErrorState,
        Self::Abandoned,
    ];

    pub fn ordinal(self) -> i32 {
        match self {
            Self::Initial => 0,
            Self::CustomerRegistration => 5,
            Self::IntentSelection => 10,
            Self::ProductSelected => 20,
            Self::ImeiRequired => 30,
            Self::ImeiValidated => 35,
            Self::AddressRequired => 40,
            Self::PaymentPending => 50,
            Self::PaymentConfirmed => 60,
            Self::SimShipped => 70,
            Self::PortabilityWaitSim => 80,
            Self::PortabilityNipRequired => 85,
            Self::PortabilitySimActivation => 90,
            Self::PortabilityInProgress => 95,
            Self::PortabilityCompleted => 100,
            Self::Completed => 110,
            Self::Blocked => 900,
            Self::ErrorState => 950,
            Self::Abandoned => 999,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::CustomerRegistration => "CUSTOMER_REGISTRATION",
            Self::IntentSelection => "INTENT_SELECTION",
            Self::ProductSelected => "PRODUCT_SELECTED",
            Self::ImeiRequired => "IMEI_REQUIRED",
            Self::ImeiValidated => "IMEI_VALIDATED",
            Self::AddressRequired => "ADDRESS_REQUIRED",
            Self::PaymentPending => "PAYMENT_PENDING",
            Self::PaymentConfirmed => "PAYMENT_CONFIRMED",
            Self::SimShipped => "SIM_SHIPPED",
            Self::PortabilityWaitSim => "PORTABILITY_WAIT_SIM",
            Self::PortabilityNipRequired => "PORTABILITY_NIP_REQUIRED",
            Self::PortabilitySimActivation => "PORTABILITY_SIM_ACTIVATION",
            Self::PortabilityInProgress => "PORTABILITY_IN_PROGRESS",
            Self::PortabilityCompleted => "PORTABILITY_COMPLETED",
            Self::Completed => "COMPLETED",
            Self::Blocked => "BLOCKED",
            Self::ErrorState => "ERROR_STATE",
            Self::Abandoned => "ABANDONED",
        }
    }

    /// Terminal states only restart into `INITIAL` or `INTENT_SELECTION`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned | Self::Blocked)
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::Initial
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown conversation state `{0}`")]
pub struct UnknownStateError(pub String);

impl FromStr for ConversationState {
    type Err = UnknownStateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == value)
            .ok_or_else(|| UnknownStateError(value.to_owned()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ConversationState,
    pub to: ConversationState,
    pub changed: bool,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::flows::states::ConversationState;

    #[test]
    fn names_round_trip_through_from_str() {
        for state in ConversationState::ALL {
            assert_eq!(ConversationState::from_str(state.as_str()), Ok(state));
        }
        assert!(ConversationState::from_str("PAYMENT").is_err());
        assert!(ConversationState::from_str("initial").is_err());
    }

    #[test]
    fn ordinals_are_strictly_increasing_in_declaration_order() {
        let ordinals: Vec<i32> = ConversationState::ALL.iter().map(|s| s.ordinal()).collect();
        assert!(ordinals.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&ConversationState::PortabilityNipRequired)
            .expect("serialize state");
        assert_eq!(json, "\"PORTABILITY_NIP_REQUIRED\"");
        let parsed: ConversationState =
            serde_json::from_str("\"ERROR_STATE\"").expect("deserialize state");
        assert_eq!(parsed, ConversationState::ErrorState);
    }
}
