//! Configuration file for proofview.
//!
//! `~/.proofview/config.toml`, or the file named by `PROOFVIEW_CONFIG`.
//! Every key is optional; a missing file means defaults throughout.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;

use proofview_types::{
    ProtocolPreference, RpcSettings, SchedulerSettings, ServerConfig, ServerConfigError,
};

const CONFIG_PATH_ENV: &str = "PROOFVIEW_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProofviewConfig {
    pub server: Option<ServerSection>,
    pub scheduler: Option<SchedulerSection>,
    pub protocol: Option<ProtocolSection>,
}

/// How to launch the language server. Values may reference environment
/// variables as `${NAME}`.
#[derive(Debug, Default, Deserialize)]
pub struct ServerSection {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SchedulerSection {
    /// Spacing between queries while the server is idle.
    pub fast_delay_ms: Option<u64>,
    /// Spacing between queries while the document is still being processed.
    pub slow_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProtocolSection {
    pub mode: Option<ProtocolPreference>,
    pub request_timeout_secs: Option<u64>,
    pub keep_alive_secs: Option<u64>,
}

/// Fully resolved settings, defaults applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub server: ServerConfig,
    pub scheduler: SchedulerSettings,
    pub rpc: RpcSettings,
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &after[..end];
        if var.is_empty() {
            out.push_str("${}");
        } else {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl ProofviewConfig {
    /// Load from the default location. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {}: {err}", path.display());
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {}: {err}", path.display());
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Apply defaults for everything left unset.
    pub fn resolve(&self) -> Result<Settings, ServerConfigError> {
        let defaults = Settings::default();

        let server = match &self.server {
            Some(section) => {
                let command = section
                    .command
                    .as_deref()
                    .map_or_else(|| defaults.server.command().to_string(), expand_env_vars);
                let args = section.args.as_ref().map_or_else(
                    || defaults.server.args().to_vec(),
                    |args| args.iter().map(|a| expand_env_vars(a)).collect(),
                );
                ServerConfig::new(command, args)?
            }
            None => defaults.server,
        };

        let scheduler = match &self.scheduler {
            Some(section) => SchedulerSettings::new(
                section
                    .fast_delay_ms
                    .map_or(defaults.scheduler.fast(), Duration::from_millis),
                section
                    .slow_delay_ms
                    .map_or(defaults.scheduler.slow(), Duration::from_millis),
            ),
            None => defaults.scheduler,
        };

        let rpc = match &self.protocol {
            // Timer periods must be non-zero.
            Some(section) => RpcSettings {
                protocol: section.mode.unwrap_or(defaults.rpc.protocol),
                request_timeout: section
                    .request_timeout_secs
                    .map_or(defaults.rpc.request_timeout, |s| {
                        Duration::from_secs(s.max(1))
                    }),
                keep_alive: section
                    .keep_alive_secs
                    .map_or(defaults.rpc.keep_alive, |s| Duration::from_secs(s.max(1))),
            },
            None => defaults.rpc,
        };

        Ok(Settings {
            server,
            scheduler,
            rpc,
        })
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".proofview").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ProofviewConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn empty_file_resolves_to_defaults() {
        let file = write_config("");
        let config = ProofviewConfig::load_from(file.path()).unwrap().unwrap();
        assert_eq!(config.resolve().unwrap(), Settings::default());
        assert_eq!(Settings::default().server.command(), "lake");
        assert_eq!(Settings::default().server.args(), ["serve"]);
    }

    #[test]
    fn full_file_overrides_every_section() {
        let file = write_config(
            r#"
            [server]
            command = "lean"
            args = ["--server"]

            [scheduler]
            fast_delay_ms = 20
            slow_delay_ms = 800

            [protocol]
            mode = "legacy"
            request_timeout_secs = 5
            keep_alive_secs = 3
            "#,
        );
        let settings = ProofviewConfig::load_from(file.path())
            .unwrap()
            .unwrap()
            .resolve()
            .unwrap();

        assert_eq!(settings.server.command(), "lean");
        assert_eq!(settings.server.args(), ["--server"]);
        assert_eq!(settings.scheduler.fast(), Duration::from_millis(20));
        assert_eq!(settings.scheduler.slow(), Duration::from_millis(800));
        assert_eq!(settings.rpc.protocol, ProtocolPreference::Legacy);
        assert_eq!(settings.rpc.request_timeout, Duration::from_secs(5));
        assert_eq!(settings.rpc.keep_alive, Duration::from_secs(3));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let file = write_config("[scheduler]\nslow_delay_ms = 1000\n");
        let settings = ProofviewConfig::load_from(file.path())
            .unwrap()
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(settings.scheduler.fast(), Duration::from_millis(50));
        assert_eq!(settings.scheduler.slow(), Duration::from_millis(1000));
        assert_eq!(settings.rpc, RpcSettings::default());
    }

    #[test]
    fn zero_periods_are_raised() {
        let file = write_config("[protocol]\nkeep_alive_secs = 0\nrequest_timeout_secs = 0\n");
        let settings = ProofviewConfig::load_from(file.path())
            .unwrap()
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(settings.rpc.keep_alive, Duration::from_secs(1));
        assert_eq!(settings.rpc.request_timeout, Duration::from_secs(1));
    }

    #[test]
    fn empty_command_is_rejected() {
        let file = write_config("[server]\ncommand = \"\"\n");
        let config = ProofviewConfig::load_from(file.path()).unwrap().unwrap();
        assert!(config.resolve().is_err());
    }

    #[test]
    fn parse_error_carries_path() {
        let file = write_config("[scheduler\nfast_delay_ms = 1");
        let err = ProofviewConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), file.path());
    }

    #[test]
    fn unknown_protocol_mode_is_a_parse_error() {
        let file = write_config("[protocol]\nmode = \"fast\"\n");
        assert!(ProofviewConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn expand_env_vars_cases() {
        assert_eq!(expand_env_vars("lake"), "lake");
        assert_eq!(expand_env_vars("${PROOFVIEW_TEST_SURELY_UNSET}/lake"), "/lake");
        assert_eq!(expand_env_vars("a${}b"), "a${}b");
        assert_eq!(expand_env_vars("unclosed ${HOME"), "unclosed ${HOME");
        assert_eq!(expand_env_vars("∀ ${PROOFVIEW_TEST_SURELY_UNSET}x"), "∀ x");
    }
}
