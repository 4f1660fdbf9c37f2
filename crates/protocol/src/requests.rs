//! Request bodies sent to the session service

use serde::{Deserialize, Serialize};

/// POST session-create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
}

/// PUT session-prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub session_id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub prompt_type: u32,
    pub prompt_mode: u32,
    pub vendor: String,
    pub model: String,
    /// The service expects the flag as a string.
    pub heat: String,
}

/// PUT session-continue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueRequest {
    pub session_id: String,
    pub offset: u64,
    pub action_offset: usize,
    pub consent: bool,
}

impl ContinueRequest {
    pub fn new(session_id: impl Into<String>, offset: u64, action_offset: usize) -> Self {
        Self {
            session_id: session_id.into(),
            offset,
            action_offset,
            consent: true,
        }
    }
}
