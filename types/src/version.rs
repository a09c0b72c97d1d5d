//! Server version and the protocol surface it implies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which query surface the backend is spoken to with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// RPC sessions with interactive goals, term goals and widgets.
    Interactive,
    /// `$/lean/plainGoal` and `$/lean/plainTermGoal` only.
    Legacy,
}

/// User preference for the protocol surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolPreference {
    /// Decide from the version the server reports.
    #[default]
    Auto,
    Interactive,
    Legacy,
}

impl ProtocolPreference {
    #[must_use]
    pub fn resolve(self, server: Option<&ServerVersion>) -> ProtocolVersion {
        match self {
            Self::Interactive => ProtocolVersion::Interactive,
            Self::Legacy => ProtocolVersion::Legacy,
            Self::Auto => {
                if server.is_some_and(ServerVersion::has_widgets_v1) {
                    ProtocolVersion::Interactive
                } else {
                    ProtocolVersion::Legacy
                }
            }
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("invalid server version `{0}`")]
pub struct ServerVersionError(String);

/// `serverInfo.version` reported at initialize (`major.minor.patch`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Interactive goals and widget queries arrived with protocol 0.2.0.
    #[must_use]
    pub fn has_widgets_v1(&self) -> bool {
        *self >= Self::new(0, 2, 0)
    }
}

impl FromStr for ServerVersion {
    type Err = ServerVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ServerVersionError(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u32, ServerVersionError> {
            parts
                .next()
                .ok_or_else(err)?
                .parse::<u32>()
                .map_err(|_| err())
        };
        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
