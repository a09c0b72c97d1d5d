//! Resolved configuration types shared across crates.
//!
//! These types represent fully-validated, resolved configuration state.
//! Raw TOML deserialization structs (with `Option` fields) stay private in
//! `proofview-config`. The config loader resolves them into these types at
//! the parse boundary.

use std::time::Duration;

use serde::Deserialize;

use crate::version::ProtocolPreference;

/// Delay before a fetch when the server reports the document as idle.
pub const DEFAULT_FAST_DELAY: Duration = Duration::from_millis(50);

/// Delay before a fetch while the server is still elaborating the document.
pub const DEFAULT_SLOW_DELAY: Duration = Duration::from_millis(500);

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServerConfigError {
    #[error("server command must not be empty")]
    EmptyCommand,
}

#[derive(Deserialize)]
struct RawServerConfig {
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

/// Validated language server launch configuration.
///
/// Invariant: `command` is non-empty (enforced via `#[serde(try_from)]` at
/// the deserialization boundary).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawServerConfig")]
pub struct ServerConfig {
    command: String,
    args: Vec<String>,
}

impl TryFrom<RawServerConfig> for ServerConfig {
    type Error = ServerConfigError;

    fn try_from(raw: RawServerConfig) -> Result<Self, Self::Error> {
        if raw.command.trim().is_empty() {
            return Err(ServerConfigError::EmptyCommand);
        }
        Ok(Self {
            command: raw.command,
            args: raw.args,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: "lake".to_string(),
            args: vec!["serve".to_string()],
        }
    }
}

impl ServerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Result<Self, ServerConfigError> {
        Self::try_from(RawServerConfig {
            command: command.into(),
            args,
        })
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Spacing between info queries for one tracked position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    fast: Duration,
    slow: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            fast: DEFAULT_FAST_DELAY,
            slow: DEFAULT_SLOW_DELAY,
        }
    }
}

impl SchedulerSettings {
    /// A slow delay shorter than the fast one is raised to match it.
    #[must_use]
    pub fn new(fast: Duration, slow: Duration) -> Self {
        Self {
            fast,
            slow: slow.max(fast),
        }
    }

    #[must_use]
    pub fn fast(&self) -> Duration {
        self.fast
    }

    #[must_use]
    pub fn slow(&self) -> Duration {
        self.slow
    }

    /// Delay to use given whether the server is busy processing.
    #[must_use]
    pub fn delay(&self, busy: bool) -> Duration {
        if busy { self.slow } else { self.fast }
    }
}

/// Protocol-level settings for the backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcSettings {
    pub protocol: ProtocolPreference,
    pub request_timeout: Duration,
    pub keep_alive: Duration,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            protocol: ProtocolPreference::Auto,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}
