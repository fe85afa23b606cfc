pub mod engine;
pub mod marker;
pub mod states;

pub use engine::{
    OrdinalTransitionPolicy, StateMachine, TableTransitionPolicy, TransitionError,
    TransitionPolicy,
};
pub use marker::{extract_state_marker, strip_state_markers, StateMarker};
pub use states::{ConversationState, TransitionOutcome, UnknownStateError};
