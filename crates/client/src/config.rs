//! Client configuration.
//!
//! Resolved from: built-in defaults < TOML file < `QBIT_*` environment
//! variables. The binary applies its own CLI overrides on top.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/qb/v1";
const DEFAULT_CREATE_PATH: &str = "session/ctix/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Root of the session service, e.g. `https://host/qb/v1`
    pub base_url: String,
    /// Path of the session-create endpoint relative to `base_url`
    pub create_path: String,
    pub auth_token: Option<String>,
    /// Scheme placed before the token in the `authorization` header
    pub auth_scheme: String,
    pub vendor: String,
    pub model: String,
    pub prompt_type: u32,
    pub prompt_mode: u32,
    pub heat: bool,
    /// Per-request timeout for create/prompt/continue
    pub request_timeout_secs: u64,
    /// Longest gap between stream chunks before the join is abandoned.
    /// `None` or 0 waits forever.
    pub join_idle_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            create_path: DEFAULT_CREATE_PATH.to_string(),
            auth_token: None,
            auth_scheme: "Bearer".to_string(),
            vendor: "openai".to_string(),
            model: "gpt-4o".to_string(),
            prompt_type: 1,
            prompt_mode: 2,
            heat: false,
            request_timeout_secs: 30,
            join_idle_timeout_secs: Some(300),
        }
    }
}

impl ClientConfig {
    /// Load from an optional TOML file, then apply the process environment.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `QBIT_*` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("QBIT_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = non_empty("QBIT_AUTH_TOKEN") {
            self.auth_token = Some(v);
        }
        if let Some(v) = non_empty("QBIT_AUTH_SCHEME") {
            self.auth_scheme = v;
        }
        if let Some(v) = non_empty("QBIT_VENDOR") {
            self.vendor = v;
        }
        if let Some(v) = non_empty("QBIT_MODEL") {
            self.model = v;
        }
        if let Some(v) = non_empty("QBIT_JOIN_IDLE_TIMEOUT_SECS") {
            let secs = v
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidEnv {
                    key: "QBIT_JOIN_IDLE_TIMEOUT_SECS",
                    value: v.clone(),
                })?;
            self.join_idle_timeout_secs = Some(secs);
        }
        Ok(())
    }

    /// Absolute URL for an endpoint path.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn authorization(&self) -> Option<String> {
        self.auth_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|token| format!("{} {}", self.auth_scheme, token))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn join_idle_timeout(&self) -> Option<Duration> {
        self.join_idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "base_url = \"https://qb.example.test/qb/v1/\"\nauth_token = \"tok\"\nheat = true"
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.base_url, "https://qb.example.test/qb/v1/");
        assert!(config.heat);
        assert_eq!(config.prompt_mode, 2);
        assert_eq!(
            config.url("session/prompt/"),
            "https://qb.example.test/qb/v1/session/prompt/"
        );
        assert_eq!(config.authorization().as_deref(), Some("Bearer tok"));
    }

    #[test]
    fn malformed_toml_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url = ").unwrap();
        let err = ClientConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("QBIT_BASE_URL", "http://localhost:9999"),
            ("QBIT_AUTH_SCHEME", "CYW"),
            ("QBIT_AUTH_TOKEN", "abc"),
            ("QBIT_MODEL", ""),
            ("QBIT_JOIN_IDLE_TIMEOUT_SECS", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.base_url, "http://localhost:9999");
        assert_eq!(config.authorization().as_deref(), Some("CYW abc"));
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.join_idle_timeout(), None);
    }

    #[test]
    fn invalid_timeout_env_is_rejected() {
        let mut config = ClientConfig::default();
        let err = config
            .apply_env(|k| (k == "QBIT_JOIN_IDLE_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn blank_token_sends_no_authorization() {
        let config = ClientConfig {
            auth_token: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(config.authorization(), None);
    }
}
