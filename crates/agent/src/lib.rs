//! Conversation orchestration for the portline WhatsApp sales assistant.
//!
//! Inbound fragments are coalesced per sender (`buffer`), then each batch runs
//! one bounded turn (`runtime`): the system prompt is rendered from retrieved
//! reference text, the conversation state and the collected context; the model
//! may request business tools (`tools`) whose results feed back into the loop
//! and into the encrypted context store (`context`). The final reply carries a
//! `[STATE:...]` marker that drives the state machine (`state`) before it is
//! stripped and delivered (`delivery`).
//!
//! The model never writes context directly. Only tool results extracted by
//! `context::ContextDataManager` reach the conversation record.

pub mod audit;
pub mod buffer;
pub mod clients;
pub mod context;
pub mod delivery;
pub mod enricher;
pub mod llm;
mod locks;
pub mod prompt;
pub mod retention;
pub mod retrieval;
pub mod runtime;
pub mod state;
pub mod tools;

pub use buffer::{BatchHandler, CoalescedBatch, MessageBuffer};
pub use delivery::TurnDispatcher;
pub use runtime::{AgentRuntime, RuntimeSettings};
pub use state::ConversationService;
