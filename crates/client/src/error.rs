//! Error types for the session client

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by session operations.
///
/// Each variant is caught at the operation boundary and rendered as a
/// system message via [`ApiError::user_message`].
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to create session: {0}")]
    SessionCreate(String),

    #[error("failed to join session: {0}")]
    SessionJoin(String),

    #[error("response body cannot be streamed incrementally")]
    StreamUnsupported,

    #[error("failed to send prompt: {0}")]
    Submit(String),

    #[error("failed to continue with action: {0}")]
    Continue(#[from] ContinueError),

    #[error("join stream idle for {0} seconds")]
    IdleTimeout(u64),

    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("no action selection is pending")]
    NoPendingSelection,

    #[error("no offered action matches {0}")]
    UnknownAction(String),

    #[error("an action selection is already being sent")]
    SelectionInFlight,

    #[error("replaced by a newer prompt")]
    Superseded,

    #[error("session controller closed")]
    ControllerClosed,
}

impl ApiError {
    /// Text shown to the user as a system message.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::SessionCreate(_) => {
                "Sorry, there was an error creating a new session.".to_string()
            }
            ApiError::SessionJoin(_) => "Error connecting to session. Please try again.".to_string(),
            ApiError::StreamUnsupported => {
                "Sorry, this client can't read streaming responses from the server.".to_string()
            }
            ApiError::Submit(_) => "Sorry, there was an error sending your prompt.".to_string(),
            ApiError::Continue(e) => e.user_message(),
            ApiError::IdleTimeout(_) => {
                "The session stopped responding. Please try again.".to_string()
            }
            ApiError::EmptyPrompt => "Please enter a prompt first.".to_string(),
            ApiError::NoPendingSelection => "There is no action waiting to be chosen.".to_string(),
            ApiError::UnknownAction(_) => {
                "Could not find the selected action. Please pick one from the list.".to_string()
            }
            ApiError::SelectionInFlight => {
                "Your previous choice is still being processed.".to_string()
            }
            ApiError::Superseded => "This request was replaced by a newer prompt.".to_string(),
            ApiError::ControllerClosed => "The session has been closed.".to_string(),
        }
    }
}

/// Failure of the session-continue request, keyed by HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContinueError {
    #[error("bad request")]
    BadRequest,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("session not found")]
    NotFound,

    #[error("server error ({0})")]
    ServerError(u16),

    #[error("{0}")]
    Other(String),
}

impl ContinueError {
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            400 => ContinueError::BadRequest,
            401 => ContinueError::Unauthorized,
            403 => ContinueError::Forbidden,
            404 => ContinueError::NotFound,
            code @ 500..=599 => ContinueError::ServerError(code),
            _ => ContinueError::Other(
                status
                    .canonical_reason()
                    .map(str::to_string)
                    .unwrap_or_else(|| status.as_u16().to_string()),
            ),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ContinueError::BadRequest => {
                "Invalid request. Please try selecting a different action.".to_string()
            }
            ContinueError::Unauthorized => {
                "Authentication failed. Please refresh and try again.".to_string()
            }
            ContinueError::Forbidden => {
                "You don't have permission to perform this action.".to_string()
            }
            ContinueError::NotFound => {
                "Session not found. Please start a new conversation.".to_string()
            }
            ContinueError::ServerError(_) => "Server error. Please try again later.".to_string(),
            ContinueError::Other(reason) => format!("Failed to continue with action: {reason}"),
        }
    }
}

/// One stream line that could not be decoded as an event. Never fatal.
#[derive(Debug, Error)]
#[error("invalid event line {line:?}: {source}")]
pub struct EventParseError {
    pub line: String,
    #[source]
    pub source: serde_json::Error,
}

/// Failure while reading the join stream. Always the stream's last item.
#[derive(Debug, Error)]
pub enum StreamReadError {
    #[error("stream read failed: {0}")]
    Transport(String),

    /// No bytes arrived for the configured idle limit.
    #[error("no data for {0} seconds")]
    Idle(u64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn continue_statuses_map_to_taxonomy() {
        assert_eq!(
            ContinueError::from_status(StatusCode::BAD_REQUEST),
            ContinueError::BadRequest
        );
        assert_eq!(
            ContinueError::from_status(StatusCode::UNAUTHORIZED),
            ContinueError::Unauthorized
        );
        assert_eq!(
            ContinueError::from_status(StatusCode::FORBIDDEN),
            ContinueError::Forbidden
        );
        assert_eq!(
            ContinueError::from_status(StatusCode::NOT_FOUND),
            ContinueError::NotFound
        );
        assert_eq!(
            ContinueError::from_status(StatusCode::BAD_GATEWAY),
            ContinueError::ServerError(502)
        );
        assert_eq!(
            ContinueError::from_status(StatusCode::CONFLICT),
            ContinueError::Other("Conflict".into())
        );
    }

    #[test]
    fn each_continue_error_has_distinct_message() {
        let messages = [
            ContinueError::BadRequest,
            ContinueError::Unauthorized,
            ContinueError::Forbidden,
            ContinueError::NotFound,
            ContinueError::ServerError(500),
            ContinueError::Other("Conflict".into()),
        ]
        .iter()
        .map(ContinueError::user_message)
        .collect::<std::collections::HashSet<_>>();
        assert_eq!(messages.len(), 6);
    }
}
