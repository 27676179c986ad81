//! Streaming chat over a hosted inference endpoint, plus PDF text extraction,
//! served to the browser by a small actix-web application.

pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod params;
pub mod pdf;
pub mod responder;
pub mod server;

pub use config::Config;
pub use conversation::{assemble, repair_surrogate_escapes, sanitize, Message, Role, Turn};
pub use llm::{CompletionBackend, HfClient};
pub use params::GenerationParams;
pub use pdf::process_pdf;
pub use responder::{respond, respond_updates, ResponseUpdate};
