//! HTTP calls to the session service.
//!
//! Four request types: create a session, join its event stream, submit a
//! prompt into it, and continue after a skill clash. None of them retry.

use std::sync::Arc;
use std::time::Duration;

use qbit_protocol::{ContinueRequest, CreateSessionRequest, PromptRequest};
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::decoder::{decode_stream, EventStream, IdleLimit};
use crate::error::{ApiError, ConfigError, ContinueError};

const JOIN_PATH: &str = "session/join";
const PROMPT_PATH: &str = "session/prompt/";
const CONTINUE_PATH: &str = "session/continue/";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the remote session service (cheap to Clone).
#[derive(Clone)]
pub struct SessionApi {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl SessionApi {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("qbit/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match self.config.authorization() {
            Some(value) => builder.header(AUTHORIZATION, value),
            None => builder,
        }
    }

    fn json_request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request(method, &self.config.url(path))
            .header(ACCEPT, "application/json")
            .timeout(self.config.request_timeout())
    }

    /// Open a new session labelled with the prompt. The response body is the
    /// bare session id.
    pub async fn create_session(&self, name: &str) -> Result<String, ApiError> {
        if name.trim().is_empty() {
            return Err(ApiError::EmptyPrompt);
        }

        let resp = self
            .json_request(Method::POST, &self.config.create_path)
            .json(&CreateSessionRequest {
                name: name.to_string(),
            })
            .send()
            .await
            .map_err(|e| ApiError::SessionCreate(e.to_string()))?;

        let resp = check_status(resp, "create")
            .await
            .map_err(ApiError::SessionCreate)?;
        let raw = resp
            .text()
            .await
            .map_err(|e| ApiError::SessionCreate(e.to_string()))?;

        let session_id = parse_session_id(&raw)
            .ok_or_else(|| ApiError::SessionCreate("empty session id in response".into()))?;
        info!(
            component = "api",
            event = "session.created",
            session_id = %session_id,
            "Created session"
        );
        Ok(session_id)
    }

    /// Open the long-lived event stream for a session. Joining again later
    /// does not replay events missed in between. `idle` bounds the gap
    /// between received chunks.
    pub async fn join_session(
        &self,
        session_id: &str,
        idle: Option<IdleLimit>,
    ) -> Result<EventStream, ApiError> {
        let url = self.config.url(&format!(
            "{}/{}/",
            JOIN_PATH,
            urlencoding::encode(session_id)
        ));
        let resp = self
            .request(Method::GET, &url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| ApiError::SessionJoin(e.to_string()))?;

        let status = resp.status();
        let resp = check_status(resp, "join")
            .await
            .map_err(ApiError::SessionJoin)?;

        if status == StatusCode::NO_CONTENT || status == StatusCode::RESET_CONTENT {
            warn!(
                component = "api",
                session_id = %session_id,
                status = %status,
                "Join response carries no body to stream"
            );
            return Err(ApiError::StreamUnsupported);
        }

        info!(
            component = "api",
            event = "session.joined",
            session_id = %session_id,
            "Joined session stream"
        );
        Ok(decode_stream(resp.bytes_stream(), idle))
    }

    /// Push the prompt into an existing session. The answer arrives on the
    /// join stream, not in this response.
    pub async fn submit_prompt(&self, session_id: &str, text: &str) -> Result<(), ApiError> {
        let config = &self.config;
        let body = PromptRequest {
            session_id: session_id.to_string(),
            text: text.to_string(),
            prompt_type: config.prompt_type,
            prompt_mode: config.prompt_mode,
            vendor: config.vendor.clone(),
            model: config.model.clone(),
            heat: config.heat.to_string(),
        };

        let resp = self
            .json_request(Method::PUT, PROMPT_PATH)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Submit(e.to_string()))?;
        check_status(resp, "prompt")
            .await
            .map_err(ApiError::Submit)?;

        debug!(component = "api", session_id = %session_id, "Prompt sent");
        Ok(())
    }

    /// Resume a session after a skill clash with the candidate at
    /// `action_offset` in the most recently offered list.
    pub async fn continue_with_action(
        &self,
        session_id: &str,
        offset: u64,
        action_offset: usize,
    ) -> Result<(), ApiError> {
        let resp = self
            .json_request(Method::PUT, CONTINUE_PATH)
            .json(&ContinueRequest::new(session_id, offset, action_offset))
            .send()
            .await
            .map_err(|e| ContinueError::Other(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(
                component = "api",
                session_id = %session_id,
                status = %status,
                body = %text,
                "Continue request rejected"
            );
            return Err(ContinueError::from_status(status).into());
        }

        info!(
            component = "api",
            event = "session.continued",
            session_id = %session_id,
            offset,
            action_offset,
            "Continued with action"
        );
        Ok(())
    }
}

/// Pass 2xx responses through; otherwise read the body for the log and
/// return a short description.
async fn check_status(resp: Response, op: &'static str) -> Result<Response, String> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    warn!(
        component = "api",
        op,
        status = %status,
        body = %text,
        "Session service returned an error"
    );
    Err(format!("HTTP {status}"))
}

/// Session ids come back as raw text, sometimes JSON-quoted.
pub fn parse_session_id(raw: &str) -> Option<String> {
    let id = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'')
        .trim();
    (!id.is_empty()).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_trimmed_and_unquoted() {
        assert_eq!(parse_session_id("ABC123").as_deref(), Some("ABC123"));
        assert_eq!(parse_session_id("\"ABC123\"").as_deref(), Some("ABC123"));
        assert_eq!(parse_session_id("  \"ABC123\"\n").as_deref(), Some("ABC123"));
        assert_eq!(parse_session_id("'ABC123'").as_deref(), Some("ABC123"));
    }

    #[test]
    fn session_id_parsing_is_idempotent() {
        let once = parse_session_id("\"ABC123\"").unwrap();
        assert_eq!(parse_session_id(&once).as_deref(), Some(once.as_str()));
    }

    #[test]
    fn empty_session_id_is_rejected() {
        assert_eq!(parse_session_id(""), None);
        assert_eq!(parse_session_id(" \"\" "), None);
    }

    #[tokio::test]
    async fn empty_prompt_never_hits_the_network() {
        let api = SessionApi::new(ClientConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            api.create_session("   ").await,
            Err(ApiError::EmptyPrompt)
        ));
    }
}
