//! Terminal rendering for conversation messages, offered actions and raw
//! stream events.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use console::style;
use qbit_protocol::{ActionCandidate, Message, Sender, StreamEvent};

pub fn message(msg: &Message) -> String {
    match msg.sender {
        Sender::User => format!("{} {}", style("you ›").bold().blue(), msg.text),
        Sender::Ai => format!("{} {}", style("qbit ›").bold().green(), msg.text),
        Sender::System => style(&msg.text).dim().italic().to_string(),
    }
}

pub fn title(title: &str) -> String {
    format!("{} {}", style("■").cyan(), style(title).bold().underlined())
}

/// Numbered table of candidates; numbers start at 1.
pub fn actions_table(actions: &[ActionCandidate]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["#", "App", "Title", "Description"]);
    for (i, action) in actions.iter().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            action.appid.clone(),
            action.title.clone(),
            action.description.clone(),
        ]);
    }
    table
}

/// One-line summary of a decoded stream event.
pub fn event_line(event: &StreamEvent) -> String {
    let offset = event
        .offset
        .map(|o| o.to_string())
        .unwrap_or_else(|| "-".into());
    let detail = if let Some(title) = event.title() {
        format!("title={title:?}")
    } else if event.action_count() > 1 {
        let ids: Vec<_> = event.actions().into_iter().map(|a| a.appid).collect();
        format!("actions=[{}]", ids.join(", "))
    } else if let Some(content) = event.content() {
        content.to_string()
    } else {
        String::new()
    };
    format!(
        "{:>6} {:<14} {}",
        style(offset).dim(),
        style(event.name()).yellow(),
        detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_numbers_candidates_from_one() {
        let actions = vec![
            ActionCandidate {
                appid: "scan".into(),
                title: "Port scan".into(),
                ..Default::default()
            },
            ActionCandidate {
                appid: "block".into(),
                description: "Block the source address".into(),
                ..Default::default()
            },
        ];
        let rendered = actions_table(&actions).to_string();
        assert!(rendered.contains("Port scan"));
        assert!(rendered.contains("Block the source address"));
        assert!(rendered.contains(" 2 "));
    }

    #[test]
    fn event_line_shows_title() {
        console::set_colors_enabled(false);
        let event: StreamEvent =
            serde_json::from_str(r#"{"event":5,"offset":3,"data":"Hello"}"#).unwrap();
        let line = event_line(&event);
        assert!(line.contains("title=\"Hello\""));
        assert!(line.contains('3'));
    }

    #[test]
    fn system_messages_render_plain_text() {
        console::set_colors_enabled(false);
        let msg = Message::new(Sender::System, "Analyzing your request...", "0Z");
        assert_eq!(message(&msg), "Analyzing your request...");
    }
}
