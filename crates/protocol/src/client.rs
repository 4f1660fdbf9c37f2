//! Front end → controller messages

use serde::{Deserialize, Serialize};

/// Messages sent from a front end (popup, terminal, bridge) to a session controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a new session for this prompt. An empty `text` submits the draft.
    Ask {
        #[serde(default)]
        text: String,
    },
    /// Replace the input buffer (e.g. with text selected on a page)
    SetDraft { text: String },
    /// Resolve a pending skill clash
    SelectAction { selector: ActionSelector },
    /// Request a full state snapshot
    GetState,
    /// Stop listening to the session
    Close,
}

/// How a front end names the candidate it picked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSelector {
    /// Zero-based position in the most recently offered list
    Index(usize),
    /// The candidate's own `appid`
    AppId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_action_wire_shape() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"select_action","selector":{"app_id":"b"}}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::SelectAction {
                selector: ActionSelector::AppId("b".into())
            }
        );
    }

    #[test]
    fn ask_without_text_defaults_to_empty() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ask"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ask { text: String::new() });
    }
}
