pub mod context;
pub mod conversation;
pub mod message;
