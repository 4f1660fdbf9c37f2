//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Who authored a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Ai,
    System,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    pub timestamp: String,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>, timestamp: &str) -> Self {
        Self {
            id: crate::new_id(),
            sender,
            text: text.into(),
            timestamp: timestamp.to_string(),
        }
    }
}

/// One selectable option offered when the server finds several viable
/// actions for a prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCandidate {
    #[serde(default)]
    pub appid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "desc")]
    pub description: String,
}

impl ActionCandidate {
    /// Label used when confirming a selection.
    pub fn label(&self) -> &str {
        if !self.title.is_empty() {
            &self.title
        } else if !self.description.is_empty() {
            &self.description
        } else {
            "Action"
        }
    }
}

/// Identity and cursor of one remote session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub title: Option<String>,
    pub offset: u64,
}

/// Full conversation state for one view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session: Option<Session>,
    pub messages: Vec<Message>,
    pub pending_actions: Vec<ActionCandidate>,
    pub awaiting_selection: bool,
    pub loading: bool,
    pub draft: String,
}

impl ConversationState {
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }

    pub fn title(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.title.as_deref())
    }

    pub fn offset(&self) -> u64 {
        self.session.as_ref().map(|s| s.offset).unwrap_or(0)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Changes to apply to a conversation state (delta updates)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loading: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awaiting_selection: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
}

impl StateChanges {
    pub fn is_empty(&self) -> bool {
        self == &StateChanges::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_accepts_desc_alias() {
        let candidate: ActionCandidate =
            serde_json::from_str(r#"{"appid":"a1","title":"","desc":"Block the IP"}"#).unwrap();
        assert_eq!(candidate.description, "Block the IP");
        assert_eq!(candidate.label(), "Block the IP");
    }

    #[test]
    fn candidate_label_falls_back_to_action() {
        let candidate: ActionCandidate = serde_json::from_str(r#"{"appid":"a1"}"#).unwrap();
        assert_eq!(candidate.label(), "Action");
    }

    #[test]
    fn empty_changes_serialize_to_empty_object() {
        let changes = StateChanges::default();
        assert!(changes.is_empty());
        assert_eq!(serde_json::to_string(&changes).unwrap(), "{}");
    }
}
