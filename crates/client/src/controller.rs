//! Session controller: owns one conversation and applies every change to it.
//!
//! The controller runs as a tokio task. Front ends talk to it through a
//! cheap-to-clone [`SessionControllerHandle`]: commands go over an mpsc channel,
//! reads go through a lock-free `ArcSwap` snapshot, and updates are pushed
//! on a broadcast channel. Network calls run in their own tasks and report
//! back to the actor, so the join stream keeps flowing while a prompt or a
//! continue request is in flight.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use futures::StreamExt;
use qbit_protocol::{
    ActionCandidate, ActionSelector, ClientMessage, ConversationState, ServerMessage,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::SessionApi;
use crate::decoder::IdleLimit;
use crate::dispatch::{transition, Effect, Input};
use crate::error::{ApiError, StreamReadError};

const COMMAND_BUFFER: usize = 64;
const BROADCAST_BUFFER: usize = 256;

/// A command sent to the controller from a handle.
enum ControllerCommand {
    Ask {
        text: String,
        reply: oneshot::Sender<Result<String, ApiError>>,
    },
    Watch {
        session_id: String,
    },
    SetDraft {
        text: String,
    },
    SelectAction {
        selector: ActionSelector,
        reply: oneshot::Sender<Result<(), ApiError>>,
    },
    GetState {
        reply: oneshot::Sender<ConversationState>,
    },
    Close,
}

/// Reports from the controller's own network tasks. `generation` ties each
/// report to the prompt that started it; reports from a superseded prompt
/// are dropped.
enum TaskReport {
    Apply {
        generation: u64,
        input: Input,
    },
    Created {
        generation: u64,
        session_id: String,
        text: String,
        reply: oneshot::Sender<Result<String, ApiError>>,
    },
    CreateFailed {
        generation: u64,
        error: ApiError,
        reply: oneshot::Sender<Result<String, ApiError>>,
    },
    ContinueDone {
        generation: u64,
        candidate: ActionCandidate,
        result: Result<(), ApiError>,
        reply: oneshot::Sender<Result<(), ApiError>>,
    },
}

/// Handle to a running session controller (cheap to Clone).
#[derive(Clone)]
pub struct SessionControllerHandle {
    command_tx: mpsc::Sender<ControllerCommand>,
    snapshot: Arc<ArcSwap<ConversationState>>,
    updates: broadcast::Sender<ServerMessage>,
}

impl SessionControllerHandle {
    /// Spawn a controller with an empty conversation.
    pub fn spawn(api: SessionApi) -> SessionControllerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(BROADCAST_BUFFER);
        let snapshot = Arc::new(ArcSwap::from_pointee(ConversationState::default()));

        let actor = ControllerActor {
            api,
            state: ConversationState::default(),
            snapshot: snapshot.clone(),
            updates: updates.clone(),
            report_tx,
            idle_armed: watch::channel(true).0,
            generation: 0,
            join_task: None,
            continue_in_flight: false,
        };
        tokio::spawn(actor.run(command_rx, report_rx));

        SessionControllerHandle {
            command_tx,
            snapshot,
            updates,
        }
    }

    async fn send(&self, cmd: ControllerCommand) -> Result<(), ApiError> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| ApiError::ControllerClosed)
    }

    /// Submit a prompt: create a session, start listening to it and send the
    /// prompt. Returns the new session id once the session exists; the answer
    /// arrives later as updates. An empty `text` submits the current draft.
    pub async fn ask(&self, text: impl Into<String>) -> Result<String, ApiError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::Ask {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ApiError::ControllerClosed)?
    }

    /// Listen to an existing session without sending a prompt.
    pub async fn watch(&self, session_id: impl Into<String>) -> Result<(), ApiError> {
        self.send(ControllerCommand::Watch {
            session_id: session_id.into(),
        })
        .await
    }

    pub async fn set_draft(&self, text: impl Into<String>) -> Result<(), ApiError> {
        self.send(ControllerCommand::SetDraft { text: text.into() })
            .await
    }

    /// Resolve a pending skill clash. On failure the selection stays pending
    /// so another candidate can be tried.
    pub async fn select_action(&self, selector: ActionSelector) -> Result<(), ApiError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::SelectAction { selector, reply })
            .await?;
        rx.await.map_err(|_| ApiError::ControllerClosed)?
    }

    /// Stop listening and shut the controller down.
    pub async fn close(&self) {
        if self.command_tx.send(ControllerCommand::Close).await.is_err() {
            debug!(component = "controller", "Controller already closed");
        }
    }

    /// State after every command sent so far has been applied.
    pub async fn state(&self) -> Result<ConversationState, ApiError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::GetState { reply }).await?;
        rx.await.map_err(|_| ApiError::ControllerClosed)
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<ConversationState> {
        self.snapshot.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.updates.subscribe()
    }

    /// Route a typed front-end message. Queries answer directly; everything
    /// else reports through the update channel.
    pub async fn handle(&self, msg: ClientMessage) -> Result<Option<ServerMessage>, ApiError> {
        match msg {
            ClientMessage::Ask { text } => {
                self.ask(text).await?;
                Ok(None)
            }
            ClientMessage::SetDraft { text } => {
                self.set_draft(text).await?;
                Ok(None)
            }
            ClientMessage::SelectAction { selector } => {
                self.select_action(selector).await?;
                Ok(None)
            }
            ClientMessage::GetState => Ok(Some(ServerMessage::StateSnapshot {
                state: self.state().await?,
            })),
            ClientMessage::Close => {
                self.close().await;
                Ok(None)
            }
        }
    }
}

struct ControllerActor {
    api: SessionApi,
    state: ConversationState,
    snapshot: Arc<ArcSwap<ConversationState>>,
    updates: broadcast::Sender<ServerMessage>,
    report_tx: mpsc::UnboundedSender<TaskReport>,
    /// Join idle limit runs only while no skill clash is waiting on the user
    idle_armed: watch::Sender<bool>,
    generation: u64,
    join_task: Option<JoinHandle<()>>,
    continue_in_flight: bool,
}

impl ControllerActor {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<ControllerCommand>,
        mut report_rx: mpsc::UnboundedReceiver<TaskReport>,
    ) {
        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(ControllerCommand::Close) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(report) = report_rx.recv() => self.handle_report(report),
            }
        }
        self.stop_join();
        debug!(component = "controller", "Controller stopped");
    }

    fn apply(&mut self, input: Input) {
        let state = std::mem::take(&mut self.state);
        let (state, effects) = transition(state, input, &now_stamp());
        self.state = state;
        self.snapshot.store(Arc::new(self.state.clone()));
        let armed = !self.state.awaiting_selection;
        self.idle_armed.send_if_modified(|current| {
            let changed = *current != armed;
            *current = armed;
            changed
        });
        for Effect::Emit(msg) in effects {
            // No subscribers is fine.
            let _ = self.updates.send(*msg);
        }
    }

    fn stop_join(&mut self) {
        if let Some(task) = self.join_task.take() {
            task.abort();
        }
    }

    fn handle_command(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::Ask { text, reply } => self.start_prompt(text, reply),
            ControllerCommand::Watch { session_id } => {
                self.generation += 1;
                self.stop_join();
                self.apply(Input::SessionCreated {
                    session_id: session_id.clone(),
                });
                self.start_join(session_id);
            }
            ControllerCommand::SetDraft { text } => self.apply(Input::DraftChanged(text)),
            ControllerCommand::SelectAction { selector, reply } => {
                self.start_continue(selector, reply)
            }
            ControllerCommand::GetState { reply } => {
                let _ = reply.send(self.state.clone());
            }
            ControllerCommand::Close => {}
        }
    }

    fn handle_report(&mut self, report: TaskReport) {
        match report {
            TaskReport::Apply { generation, input } => {
                if generation == self.generation {
                    self.apply(input);
                } else {
                    debug!(component = "controller", generation, "Dropping stale report");
                }
            }
            TaskReport::Created {
                generation,
                session_id,
                text,
                reply,
            } => {
                if generation == self.generation {
                    self.apply(Input::SessionCreated {
                        session_id: session_id.clone(),
                    });
                    // Listen first, then submit; the submit runs alongside the
                    // join and never waits for it.
                    self.start_join(session_id.clone());
                    self.start_submit(session_id.clone(), text);
                    let _ = reply.send(Ok(session_id));
                } else {
                    debug!(
                        component = "controller",
                        session_id = %session_id,
                        "Session created for a superseded prompt; not joining"
                    );
                    let _ = reply.send(Err(ApiError::Superseded));
                }
            }
            TaskReport::CreateFailed {
                generation,
                error,
                reply,
            } => {
                if generation == self.generation {
                    self.apply(Input::Failed {
                        message: error.user_message(),
                        preserve_selection: false,
                    });
                }
                let _ = reply.send(Err(error));
            }
            TaskReport::ContinueDone {
                generation,
                candidate,
                result,
                reply,
            } => {
                if generation == self.generation {
                    self.continue_in_flight = false;
                    match &result {
                        Ok(()) => self.apply(Input::ActionAccepted { candidate }),
                        Err(e) => self.apply(Input::Failed {
                            message: e.user_message(),
                            preserve_selection: true,
                        }),
                    }
                }
                let _ = reply.send(result);
            }
        }
    }

    fn start_prompt(&mut self, text: String, reply: oneshot::Sender<Result<String, ApiError>>) {
        let text = if text.trim().is_empty() {
            self.state.draft.clone()
        } else {
            text
        };
        if text.trim().is_empty() {
            let _ = reply.send(Err(ApiError::EmptyPrompt));
            return;
        }

        self.generation += 1;
        self.continue_in_flight = false;
        self.stop_join();
        self.apply(Input::PromptSubmitted { text: text.clone() });

        let generation = self.generation;
        let api = self.api.clone();
        let report_tx = self.report_tx.clone();
        tokio::spawn(async move {
            let report = match api.create_session(&text).await {
                Ok(session_id) => TaskReport::Created {
                    generation,
                    session_id,
                    text,
                    reply,
                },
                Err(error) => {
                    warn!(
                        component = "controller",
                        event = "session.create_failed",
                        error = %error,
                        "Failed to create session"
                    );
                    TaskReport::CreateFailed {
                        generation,
                        error,
                        reply,
                    }
                }
            };
            let _ = report_tx.send(report);
        });
    }

    fn start_join(&mut self, session_id: String) {
        let idle = self
            .api
            .config()
            .join_idle_timeout()
            .map(|limit| IdleLimit::pausable(limit, self.idle_armed.subscribe()));
        let task = tokio::spawn(run_join(
            self.api.clone(),
            session_id,
            self.generation,
            idle,
            self.report_tx.clone(),
        ));
        self.join_task = Some(task);
    }

    fn start_submit(&self, session_id: String, text: String) {
        let generation = self.generation;
        let api = self.api.clone();
        let report_tx = self.report_tx.clone();
        tokio::spawn(async move {
            if let Err(error) = api.submit_prompt(&session_id, &text).await {
                warn!(
                    component = "controller",
                    event = "session.submit_failed",
                    session_id = %session_id,
                    error = %error,
                    "Failed to send prompt"
                );
                let _ = report_tx.send(TaskReport::Apply {
                    generation,
                    input: Input::Failed {
                        message: error.user_message(),
                        preserve_selection: false,
                    },
                });
            }
        });
    }

    fn start_continue(
        &mut self,
        selector: ActionSelector,
        reply: oneshot::Sender<Result<(), ApiError>>,
    ) {
        let session_id = match self.state.session_id() {
            Some(id) if self.state.awaiting_selection && !self.state.pending_actions.is_empty() => {
                id.to_string()
            }
            _ => {
                let _ = reply.send(Err(ApiError::NoPendingSelection));
                return;
            }
        };

        if self.continue_in_flight {
            let _ = reply.send(Err(ApiError::SelectionInFlight));
            return;
        }

        let Some(action_offset) = resolve_selector(&self.state.pending_actions, &selector) else {
            let _ = reply.send(Err(ApiError::UnknownAction(format!("{selector:?}"))));
            return;
        };
        let candidate = self.state.pending_actions[action_offset].clone();
        let offset = self.state.offset();

        info!(
            component = "controller",
            event = "session.action_selected",
            session_id = %session_id,
            appid = %candidate.appid,
            action_offset,
            offset,
            "Continuing with selected action"
        );
        self.apply(Input::ActionRequested);
        self.continue_in_flight = true;

        let generation = self.generation;
        let api = self.api.clone();
        let report_tx = self.report_tx.clone();
        tokio::spawn(async move {
            let result = api
                .continue_with_action(&session_id, offset, action_offset)
                .await;
            let _ = report_tx.send(TaskReport::ContinueDone {
                generation,
                candidate,
                result,
                reply,
            });
        });
    }
}

/// Position of the chosen candidate in the offered list. An `AppId` is
/// matched against the list as it stands now, so the server receives the
/// position in the exact list it sent.
pub fn resolve_selector(actions: &[ActionCandidate], selector: &ActionSelector) -> Option<usize> {
    match selector {
        ActionSelector::Index(index) => (*index < actions.len()).then_some(*index),
        ActionSelector::AppId(appid) => actions.iter().position(|a| &a.appid == appid),
    }
}

/// Read the join stream until it ends, forwarding events in arrival order.
async fn run_join(
    api: SessionApi,
    session_id: String,
    generation: u64,
    idle: Option<IdleLimit>,
    report_tx: mpsc::UnboundedSender<TaskReport>,
) {
    let report = |input: Input| {
        report_tx
            .send(TaskReport::Apply { generation, input })
            .is_ok()
    };
    let fail = |error: ApiError| {
        report(Input::Failed {
            message: error.user_message(),
            preserve_selection: false,
        })
    };

    let mut stream = match api.join_session(&session_id, idle).await {
        Ok(stream) => stream,
        Err(error) => {
            warn!(
                component = "controller",
                event = "session.join_failed",
                session_id = %session_id,
                error = %error,
                "Failed to join session"
            );
            fail(error);
            return;
        }
    };

    loop {
        match stream.next().await {
            Some(Ok(event)) => {
                if !report(Input::Event(event)) {
                    return;
                }
            }
            Some(Err(StreamReadError::Idle(secs))) => {
                warn!(
                    component = "controller",
                    event = "session.join_idle",
                    session_id = %session_id,
                    idle_secs = secs,
                    "Join stream went idle"
                );
                fail(ApiError::IdleTimeout(secs));
                return;
            }
            Some(Err(e)) => {
                warn!(
                    component = "controller",
                    event = "session.join_broken",
                    session_id = %session_id,
                    error = %e,
                    "Join stream failed"
                );
                fail(ApiError::SessionJoin(e.to_string()));
                return;
            }
            None => {
                info!(
                    component = "controller",
                    event = "session.stream_completed",
                    session_id = %session_id,
                    "Join stream completed"
                );
                report(Input::StreamEnded);
                return;
            }
        }
    }
}

/// Current time as `<unix seconds>.<millis>Z`
fn now_stamp() -> String {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}Z", duration.as_secs(), duration.subsec_millis())
}
