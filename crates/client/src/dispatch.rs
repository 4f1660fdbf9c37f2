//! Pure conversation state transition
//!
//! Every change to a [`ConversationState`] goes through
//! `transition(state, input, now) -> (state, effects)`: stream events from
//! the join connection as well as the client-side inputs (prompt submitted,
//! stream ended, action accepted, failures). No IO, no async, no locking.

use qbit_protocol::{
    ActionCandidate, ConversationState, EventKind, Message, Sender, ServerMessage, Session,
    StateChanges, StreamEvent,
};
use tracing::{debug, info, warn};

pub const ANALYZING_TEXT: &str = "Analyzing your request...";
pub const EXECUTING_TEXT: &str = "Executing selected action...";
pub const SUMMARIZING_TEXT: &str = "Summarizing results...";
pub const CLASH_FALLBACK_TEXT: &str =
    "I found multiple suitable actions. Please select one to proceed:";

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Input {
    /// User sent a prompt; a new session is about to be created for it
    PromptSubmitted { text: String },
    DraftChanged(String),
    SessionCreated { session_id: String },
    /// One decoded event from the join stream
    Event(StreamEvent),
    /// The join stream's body ended
    StreamEnded,
    /// A continue request is in flight
    ActionRequested,
    /// The service accepted the chosen action
    ActionAccepted { candidate: ActionCandidate },
    /// An operation failed; `message` is shown to the user
    Failed {
        message: String,
        preserve_selection: bool,
    },
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Emit(Box<ServerMessage>),
}

fn emit(effects: &mut Vec<Effect>, msg: ServerMessage) {
    effects.push(Effect::Emit(Box::new(msg)));
}

fn emit_delta(effects: &mut Vec<Effect>, changes: StateChanges) {
    if !changes.is_empty() {
        emit(effects, ServerMessage::SessionDelta { changes });
    }
}

fn append(
    state: &mut ConversationState,
    effects: &mut Vec<Effect>,
    sender: Sender,
    text: &str,
    now: &str,
) {
    let message = Message::new(sender, text, now);
    state.messages.push(message.clone());
    emit(effects, ServerMessage::MessageAppended { message });
}

fn set_loading(state: &mut ConversationState, loading: bool, changes: &mut StateChanges) {
    if state.loading != loading {
        state.loading = loading;
        changes.loading = Some(loading);
    }
}

fn clear_selection(state: &mut ConversationState, effects: &mut Vec<Effect>) {
    if state.awaiting_selection || !state.pending_actions.is_empty() {
        state.pending_actions.clear();
        state.awaiting_selection = false;
        emit(effects, ServerMessage::SelectionCleared);
    }
}

// ---------------------------------------------------------------------------
// transition(): the pure core
// ---------------------------------------------------------------------------

/// Pure, synchronous state transition.
///
/// Given the current state and an input, returns the new state and the
/// messages to broadcast to front ends.
pub fn transition(
    mut state: ConversationState,
    input: Input,
    now: &str,
) -> (ConversationState, Vec<Effect>) {
    let mut effects: Vec<Effect> = Vec::new();
    let mut changes = StateChanges::default();

    match input {
        Input::PromptSubmitted { text } => {
            clear_selection(&mut state, &mut effects);
            append(&mut state, &mut effects, Sender::User, &text, now);
            if !state.draft.is_empty() {
                state.draft.clear();
                changes.draft = Some(String::new());
            }
            set_loading(&mut state, true, &mut changes);
        }

        Input::DraftChanged(text) => {
            if state.draft != text {
                state.draft = text.clone();
                changes.draft = Some(text);
            }
        }

        Input::SessionCreated { session_id } => {
            state.session = Some(Session {
                session_id: session_id.clone(),
                title: None,
                offset: 0,
            });
            emit(&mut effects, ServerMessage::SessionCreated { session_id });
        }

        Input::Event(event) => {
            apply_event(&mut state, &mut effects, &mut changes, event, now);
        }

        Input::StreamEnded => {
            // A pending skill clash keeps the loading indicator up until the
            // user picks an action.
            if !state.awaiting_selection {
                set_loading(&mut state, false, &mut changes);
            }
            if let Some(session_id) = state.session_id() {
                let session_id = session_id.to_string();
                emit(&mut effects, ServerMessage::StreamEnded { session_id });
            }
        }

        Input::ActionRequested => {
            set_loading(&mut state, true, &mut changes);
        }

        Input::ActionAccepted { candidate } => {
            clear_selection(&mut state, &mut effects);
            changes.awaiting_selection = Some(false);
            let text = format!("Selected: {}. Processing...", candidate.label());
            append(&mut state, &mut effects, Sender::System, &text, now);
        }

        Input::Failed {
            message,
            preserve_selection,
        } => {
            append(&mut state, &mut effects, Sender::System, &message, now);
            set_loading(&mut state, false, &mut changes);
            if !preserve_selection && state.awaiting_selection {
                clear_selection(&mut state, &mut effects);
                changes.awaiting_selection = Some(false);
            }
            emit(&mut effects, ServerMessage::Error { message });
        }
    }

    emit_delta(&mut effects, changes);
    (state, effects)
}

fn apply_event(
    state: &mut ConversationState,
    effects: &mut Vec<Effect>,
    changes: &mut StateChanges,
    event: StreamEvent,
    now: &str,
) {
    debug!(
        component = "dispatch",
        event = "dispatch.event",
        name = %event.name(),
        code = event.event,
        offset = ?event.offset,
        "Received stream event"
    );

    if let Some(offset) = event.offset {
        advance_offset(state, changes, offset);
    }

    match event.kind() {
        EventKind::PromptEcho => {
            debug!(component = "dispatch", data = ?event.data, "Prompt echoed");
        }

        EventKind::Analyzing => {
            append(state, effects, Sender::System, ANALYZING_TEXT, now);
        }

        EventKind::TitleChanged => match (event.title(), state.session.as_mut()) {
            (Some(title), Some(session)) => {
                if session.title.as_deref() != Some(title) {
                    session.title = Some(title.to_string());
                    changes.title = Some(Some(title.to_string()));
                }
            }
            (None, _) => {
                warn!(component = "dispatch", data = ?event.data, "Title event without a string payload");
            }
            (Some(_), None) => {
                warn!(component = "dispatch", "Title event before session was created");
            }
        },

        EventKind::Answer => {
            if event.action_count() > 1 {
                let actions = event.actions();
                info!(
                    component = "dispatch",
                    event = "dispatch.skill_clash",
                    candidates = actions.len(),
                    "Multiple actions offered"
                );
                state.pending_actions = actions.clone();
                state.awaiting_selection = true;
                changes.awaiting_selection = Some(true);
                let text = event.content().unwrap_or(CLASH_FALLBACK_TEXT);
                append(state, effects, Sender::Ai, text, now);
                emit(effects, ServerMessage::ActionsOffered { actions });
            } else if let Some(content) = event.content() {
                append(state, effects, Sender::Ai, content, now);
                if !state.draft.is_empty() {
                    state.draft.clear();
                    changes.draft = Some(String::new());
                }
                set_loading(state, false, changes);
            } else {
                debug!(component = "dispatch", "Answer event without content");
            }
        }

        EventKind::SkillClash => {
            debug!(
                component = "dispatch",
                awaiting_selection = state.awaiting_selection,
                "Skill clash acknowledged"
            );
        }

        EventKind::Executing => {
            debug!(component = "dispatch", action = ?event.action, "Executing action");
            append(state, effects, Sender::System, EXECUTING_TEXT, now);
        }

        EventKind::ActionResult => {
            debug!(component = "dispatch", data = ?event.data, "Action result");
        }

        EventKind::Executed => {
            debug!(component = "dispatch", "Action executed");
        }

        EventKind::Summarizing => {
            append(state, effects, Sender::System, SUMMARIZING_TEXT, now);
        }

        EventKind::Unknown(code) => {
            debug!(
                component = "dispatch",
                code,
                name = %event.name(),
                "Unhandled event type"
            );
        }
    }
}

fn advance_offset(state: &mut ConversationState, changes: &mut StateChanges, offset: u64) {
    let Some(session) = state.session.as_mut() else {
        debug!(component = "dispatch", offset, "Offset before session was created");
        return;
    };
    if offset < session.offset {
        warn!(
            component = "dispatch",
            session_id = %session.session_id,
            current = session.offset,
            received = offset,
            "Ignoring offset that moves backwards"
        );
        return;
    }
    if offset != session.offset {
        session.offset = offset;
        changes.offset = Some(offset);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
