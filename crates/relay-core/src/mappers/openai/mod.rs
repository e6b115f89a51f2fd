mod models;
mod request;

pub use models::{ChatMessage, ChatRequest, MessageContent};
pub use request::build_upstream_request;
