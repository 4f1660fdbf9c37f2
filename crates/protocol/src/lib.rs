//! QBit Protocol
//!
//! Shared types for the QBit session client: the JSON shapes exchanged with
//! the remote session service, and the typed messages front ends use to talk
//! to a session controller.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod event;
pub mod requests;
pub mod server;
pub mod types;

pub use client::{ActionSelector, ClientMessage};
pub use event::{EventKind, StreamEvent};
pub use requests::{ContinueRequest, CreateSessionRequest, PromptRequest};
pub use server::ServerMessage;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
