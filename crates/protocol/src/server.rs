//! Controller → front end messages

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Messages broadcast from a session controller to its front ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    // Full state sync
    StateSnapshot {
        state: ConversationState,
    },

    // Lifecycle
    SessionCreated {
        session_id: String,
    },
    StreamEnded {
        session_id: String,
    },

    // Incremental updates
    SessionDelta {
        changes: StateChanges,
    },
    MessageAppended {
        message: Message,
    },

    // Skill clash
    ActionsOffered {
        actions: Vec<ActionCandidate>,
    },
    SelectionCleared,

    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_with_snake_case_type() {
        let msg = ServerMessage::SelectionCleared;
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"selection_cleared"}"#
        );
    }
}
