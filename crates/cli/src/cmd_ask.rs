//! `qbit ask`: run one prompt through a new session and print the answer.

use std::io::Read;

use anyhow::{bail, Context};
use qbit_client::{ApiError, ClientConfig, SessionApi, SessionControllerHandle};
use qbit_protocol::{ActionCandidate, ActionSelector, ConversationState, Sender, ServerMessage};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::render;

/// How to answer a skill clash without asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pick {
    /// 1-based position in the offered list
    Number(usize),
    AppId(String),
}

impl Pick {
    fn selector(&self) -> anyhow::Result<ActionSelector> {
        match self {
            Pick::Number(0) => bail!("--pick counts from 1"),
            Pick::Number(n) => Ok(ActionSelector::Index(n - 1)),
            Pick::AppId(id) => Ok(ActionSelector::AppId(id.clone())),
        }
    }
}

pub struct AskOptions {
    pub prompt: Option<String>,
    pub stdin: bool,
    pub pick: Option<Pick>,
    pub json: bool,
}

pub async fn run(config: ClientConfig, opts: AskOptions) -> anyhow::Result<()> {
    let prompt = read_prompt(opts.prompt.as_deref(), opts.stdin)?;
    let handle = SessionControllerHandle::spawn(SessionApi::new(config)?);
    let mut updates = handle.subscribe();
    let mut chooser = Chooser::new(opts.pick.clone(), !opts.stdin && console::user_attended());

    let result = async {
        let session_id = match handle.ask(prompt).await {
            Ok(id) => id,
            Err(e) => bail!(e.user_message()),
        };
        info!(component = "cli", session_id = %session_id, "Session started");
        if !opts.json {
            eprintln!("{}", console::style(format!("session {session_id}")).dim());
        }

        let mut progress = Progress::default();
        while !progress.finished() {
            let msg = match updates.recv().await {
                Ok(msg) => msg,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(component = "cli", skipped, "Update receiver lagged");
                    progress.resync(&handle.state().await?);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            progress.observe(&msg);

            match msg {
                ServerMessage::MessageAppended { message } if !opts.json => {
                    if message.sender != Sender::User {
                        println!("{}", render::message(&message));
                    }
                }
                ServerMessage::SessionDelta { changes } if !opts.json => {
                    if let Some(Some(title)) = changes.title {
                        println!("{}", render::title(&title));
                    }
                }
                ServerMessage::ActionsOffered { actions } => {
                    if !opts.json {
                        println!("{}", render::actions_table(&actions));
                    }
                    chooser.resolve(&handle, &actions).await?;
                }
                _ => {}
            }
        }
        if let Some(err) = progress.unanswered_error() {
            bail!(err);
        }

        if opts.json {
            let state = handle.state().await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    handle.close().await;
    result
}

/// Tracks the run from the updates already printed, so the loop never stops
/// ahead of output it has not shown yet.
#[derive(Debug)]
struct Progress {
    loading: bool,
    awaiting_selection: bool,
    last_sender: Option<Sender>,
    last_error: Option<String>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            loading: true,
            awaiting_selection: false,
            last_sender: None,
            last_error: None,
        }
    }
}

impl Progress {
    fn observe(&mut self, msg: &ServerMessage) {
        match msg {
            ServerMessage::SessionDelta { changes } => {
                if let Some(loading) = changes.loading {
                    self.loading = loading;
                }
                if let Some(awaiting) = changes.awaiting_selection {
                    self.awaiting_selection = awaiting;
                }
            }
            ServerMessage::MessageAppended { message } => self.last_sender = Some(message.sender),
            ServerMessage::Error { message } => self.last_error = Some(message.clone()),
            _ => {}
        }
    }

    fn resync(&mut self, state: &ConversationState) {
        self.loading = state.loading;
        self.awaiting_selection = state.awaiting_selection;
        self.last_sender = state.last_message().map(|m| m.sender);
    }

    fn finished(&self) -> bool {
        !self.loading && !self.awaiting_selection
    }

    /// The last error, unless an answer came after it.
    fn unanswered_error(&mut self) -> Option<String> {
        match self.last_sender {
            Some(Sender::Ai) => None,
            _ => self.last_error.take(),
        }
    }
}

fn read_prompt(arg: Option<&str>, from_stdin: bool) -> anyhow::Result<String> {
    let prompt = if from_stdin {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading prompt from stdin")?;
        buf
    } else {
        arg.unwrap_or_default().to_string()
    };
    let prompt = prompt.trim().to_string();
    if prompt.is_empty() {
        bail!("no prompt given; pass one as an argument or use --stdin");
    }
    Ok(prompt)
}

/// Picks a candidate when the server offers several.
struct Chooser {
    preset: Option<Pick>,
    interactive: bool,
    input: Option<Lines<BufReader<Stdin>>>,
}

impl Chooser {
    fn new(preset: Option<Pick>, interactive: bool) -> Self {
        Self {
            preset,
            interactive,
            input: None,
        }
    }

    async fn resolve(
        &mut self,
        handle: &SessionControllerHandle,
        actions: &[ActionCandidate],
    ) -> anyhow::Result<()> {
        // A preset is used once; a second clash in the same run asks again.
        if let Some(pick) = self.preset.take() {
            return match handle.select_action(pick.selector()?).await {
                Ok(()) => Ok(()),
                Err(e) => bail!(e.user_message()),
            };
        }
        if !self.interactive {
            bail!("several actions were offered; rerun with --pick N or --pick-app APPID");
        }

        loop {
            let Some(answer) = self.ask_line(actions.len()).await? else {
                bail!("no action selected");
            };
            let selector = match parse_choice(&answer, actions.len()) {
                Some(selector) => selector,
                None => {
                    eprintln!("{}", console::style("Not a listed action.").red());
                    continue;
                }
            };
            match handle.select_action(selector).await {
                Ok(()) => return Ok(()),
                // Shown already as a system message; the list stays open.
                Err(ApiError::Continue(_)) => continue,
                Err(e) => bail!(e.user_message()),
            }
        }
    }

    async fn ask_line(&mut self, count: usize) -> anyhow::Result<Option<String>> {
        eprint!(
            "{} ",
            console::style(format!("Pick an action [1-{count}] or app id (empty to cancel):")).bold()
        );
        let input = self
            .input
            .get_or_insert_with(|| BufReader::new(tokio::io::stdin()).lines());
        let line = input.next_line().await.context("reading choice")?;
        Ok(line
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty()))
    }
}

/// `"2"` picks the second candidate; anything else is taken as an app id.
fn parse_choice(answer: &str, count: usize) -> Option<ActionSelector> {
    match answer.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Some(ActionSelector::Index(n - 1)),
        Ok(_) => None,
        Err(_) => Some(ActionSelector::AppId(answer.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbit_protocol::StateChanges;

    #[test]
    fn numeric_choice_is_one_based() {
        assert_eq!(parse_choice("1", 3), Some(ActionSelector::Index(0)));
        assert_eq!(parse_choice("3", 3), Some(ActionSelector::Index(2)));
        assert_eq!(parse_choice("4", 3), None);
        assert_eq!(parse_choice("0", 3), None);
    }

    #[test]
    fn non_numeric_choice_is_an_app_id() {
        assert_eq!(
            parse_choice("port-scan", 3),
            Some(ActionSelector::AppId("port-scan".into()))
        );
    }

    #[test]
    fn preset_pick_converts_to_selector() {
        assert_eq!(Pick::Number(2).selector().unwrap(), ActionSelector::Index(1));
        assert!(Pick::Number(0).selector().is_err());
        assert_eq!(
            Pick::AppId("b".into()).selector().unwrap(),
            ActionSelector::AppId("b".into())
        );
    }

    fn appended(sender: Sender, text: &str) -> ServerMessage {
        ServerMessage::MessageAppended {
            message: qbit_protocol::Message::new(sender, text, "0Z"),
        }
    }

    fn delta(changes: StateChanges) -> ServerMessage {
        ServerMessage::SessionDelta { changes }
    }

    #[test]
    fn run_finishes_only_after_the_answer_is_seen() {
        // A one-chunk answer: everything lands before the first update is read.
        let updates = [
            appended(Sender::System, "Analyzing your request..."),
            delta(StateChanges {
                title: Some(Some("Understanding DoS Attacks".into())),
                ..Default::default()
            }),
            appended(Sender::Ai, "A DoS attack floods a service."),
            delta(StateChanges {
                loading: Some(false),
                ..Default::default()
            }),
        ];
        let mut progress = Progress::default();
        for msg in &updates {
            assert!(!progress.finished());
            progress.observe(msg);
        }
        assert!(progress.finished());
        assert_eq!(progress.unanswered_error(), None);
    }

    #[test]
    fn pending_clash_keeps_run_open() {
        let mut progress = Progress::default();
        progress.observe(&delta(StateChanges {
            awaiting_selection: Some(true),
            ..Default::default()
        }));
        // A rejected continue clears loading but the list stays open.
        progress.observe(&delta(StateChanges {
            loading: Some(false),
            ..Default::default()
        }));
        assert!(!progress.finished());
        progress.observe(&delta(StateChanges {
            awaiting_selection: Some(false),
            ..Default::default()
        }));
        assert!(progress.finished());
    }

    #[test]
    fn failure_without_answer_is_reported() {
        let mut progress = Progress::default();
        progress.observe(&appended(Sender::System, "Error connecting to session. Please try again."));
        progress.observe(&ServerMessage::Error {
            message: "Error connecting to session. Please try again.".into(),
        });
        progress.observe(&delta(StateChanges {
            loading: Some(false),
            ..Default::default()
        }));
        assert!(progress.finished());
        assert_eq!(
            progress.unanswered_error().as_deref(),
            Some("Error connecting to session. Please try again.")
        );
    }

    #[test]
    fn blank_prompt_is_rejected() {
        assert!(read_prompt(Some("   "), false).is_err());
        assert_eq!(read_prompt(Some(" hi \n"), false).unwrap(), "hi");
    }
}
