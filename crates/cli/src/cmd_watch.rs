//! `qbit watch`: follow the event stream of an existing session.

use anyhow::{bail, Context};
use futures::StreamExt;
use qbit_client::{parse_session_id, ClientConfig, IdleLimit, SessionApi, StreamReadError};
use tracing::{info, warn};

use crate::render;

pub async fn run(config: ClientConfig, session_id: &str, json: bool) -> anyhow::Result<()> {
    let Some(session_id) = parse_session_id(session_id) else {
        bail!("session id is empty");
    };
    let idle = config.join_idle_timeout().map(IdleLimit::new);
    let api = SessionApi::new(config)?;

    let mut stream = api
        .join_session(&session_id, idle)
        .await
        .with_context(|| format!("joining session {session_id}"))?;
    info!(component = "cli", session_id = %session_id, "Watching session");

    loop {
        let item = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(component = "cli", session_id = %session_id, "Interrupted");
                return Ok(());
            }
            item = stream.next() => item,
        };

        let event = match item {
            None => break,
            Some(Ok(event)) => event,
            Some(Err(StreamReadError::Idle(secs))) => {
                warn!(component = "cli", session_id = %session_id, "Join stream went idle");
                bail!("no events for {secs}s; stopped watching");
            }
            Some(Err(e)) => return Err(e).context("reading session stream"),
        };

        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", render::event_line(&event));
        }
    }

    if !json {
        eprintln!("{}", console::style("stream ended").dim());
    }
    Ok(())
}
