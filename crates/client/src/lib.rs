//! QBit streaming session client
//!
//! Creates a session on the remote service, listens to its event stream,
//! submits prompts into it, and resumes it after a skill clash. All
//! conversation state lives in a [`SessionControllerHandle`].

pub mod api;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod dispatch;
pub mod error;

pub use api::{parse_session_id, SessionApi};
pub use config::ClientConfig;
pub use controller::{resolve_selector, SessionControllerHandle};
pub use decoder::{decode_stream, EventStream, IdleLimit, LineDecoder};
pub use dispatch::{transition, Effect, Input};
pub use error::{ApiError, ConfigError, ContinueError, EventParseError, StreamReadError};
