//! Events pushed by the session service over the join stream

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ActionCandidate;

/// Numeric event codes defined by the session service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// 3: AI answer, or several candidate actions (skill clash)
    Answer,
    /// 5: session title changed
    TitleChanged,
    /// 7: executing the selected action
    Executing,
    /// 8: action executed
    Executed,
    /// 9: echo of the submitted prompt
    PromptEcho,
    /// 10: analyzing the request
    Analyzing,
    /// 15: skill clash acknowledged
    SkillClash,
    /// 16: raw action result
    ActionResult,
    /// 17: summarizing results
    Summarizing,
    Unknown(i64),
}

impl EventKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            3 => EventKind::Answer,
            5 => EventKind::TitleChanged,
            7 => EventKind::Executing,
            8 => EventKind::Executed,
            9 => EventKind::PromptEcho,
            10 => EventKind::Analyzing,
            15 => EventKind::SkillClash,
            16 => EventKind::ActionResult,
            17 => EventKind::Summarizing,
            other => EventKind::Unknown(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            EventKind::Answer => 3,
            EventKind::TitleChanged => 5,
            EventKind::Executing => 7,
            EventKind::Executed => 8,
            EventKind::PromptEcho => 9,
            EventKind::Analyzing => 10,
            EventKind::SkillClash => 15,
            EventKind::ActionResult => 16,
            EventKind::Summarizing => 17,
            EventKind::Unknown(code) => code,
        }
    }
}

/// One decoded unit from the join stream.
///
/// `data` is kept as raw JSON: its shape depends on the event code (a bare
/// string for title changes, `{data: {content, actions}}` for answers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ev_name: Option<String>,
    pub event: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
}

impl StreamEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            ev_name: None,
            event: kind.code(),
            offset: None,
            data: None,
            action: None,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_code(self.event)
    }

    /// Name for logs: `ev_name` when the server sent one, else the code.
    pub fn name(&self) -> String {
        self.ev_name
            .clone()
            .unwrap_or_else(|| format!("event-{}", self.event))
    }

    fn inner(&self) -> Option<&Value> {
        self.data.as_ref()?.get("data")
    }

    /// Textual answer at `data.data.content`.
    pub fn content(&self) -> Option<&str> {
        self.inner()?
            .get("content")?
            .as_str()
            .filter(|s| !s.is_empty())
    }

    /// Number of entries in `data.data.actions` (0 when absent).
    pub fn action_count(&self) -> usize {
        self.inner()
            .and_then(|d| d.get("actions"))
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Candidates at `data.data.actions`, in server order. Entries that are
    /// not objects decode as empty candidates so positions stay aligned.
    pub fn actions(&self) -> Vec<ActionCandidate> {
        self.inner()
            .and_then(|d| d.get("actions"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| serde_json::from_value(item.clone()).unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Title carried as a bare string in `data`.
    pub fn title(&self) -> Option<&str> {
        self.data.as_ref()?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_codes_round_trip() {
        for code in [3, 5, 7, 8, 9, 10, 15, 16, 17, 42] {
            assert_eq!(EventKind::from_code(code).code(), code);
        }
        assert_eq!(EventKind::from_code(42), EventKind::Unknown(42));
    }

    #[test]
    fn parses_title_event_with_bare_string_data() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"ev_name":"title","event":5,"offset":4,"data":"Understanding DoS Attacks"}"#,
        )
        .unwrap();
        assert_eq!(event.kind(), EventKind::TitleChanged);
        assert_eq!(event.offset, Some(4));
        assert_eq!(event.title(), Some("Understanding DoS Attacks"));
        assert_eq!(event.content(), None);
    }

    #[test]
    fn reads_nested_content_and_actions() {
        let event = StreamEvent::new(EventKind::Answer).with_data(json!({
            "data": {
                "content": "pick one",
                "actions": [
                    {"appid": "a", "title": "Alpha"},
                    {"appid": "b", "desc": "Beta"},
                    "garbage"
                ]
            }
        }));
        assert_eq!(event.content(), Some("pick one"));
        assert_eq!(event.action_count(), 3);
        let actions = event.actions();
        assert_eq!(actions[1].appid, "b");
        assert_eq!(actions[1].description, "Beta");
        assert_eq!(actions[2], ActionCandidate::default());
    }

    #[test]
    fn missing_fields_are_tolerated() {
        let event: StreamEvent = serde_json::from_str(r#"{"event":10}"#).unwrap();
        assert_eq!(event.kind(), EventKind::Analyzing);
        assert_eq!(event.offset, None);
        assert_eq!(event.action_count(), 0);
        assert_eq!(event.name(), "event-10");
    }

    #[test]
    fn empty_content_counts_as_absent() {
        let event = StreamEvent::new(EventKind::Answer).with_data(json!({"data": {"content": ""}}));
        assert_eq!(event.content(), None);
    }
}
