//! proofview CLI - drives the info pipeline from line commands.
//!
//! The binary stands in for an editor host: it starts the Lean server for a
//! workspace, reads cursor/pin/pause/refresh actions from stdin, and prints
//! every published view state and editor request to stdout as JSON lines.
//!
//! ```text
//! stdin -> command::parse -> Session::execute -> Infoview
//!                                                   |
//! stdout <- output::emit <- printers / editor requests
//! ```

mod command;
mod output;

use std::{
    env,
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use proofview_config::{ProofviewConfig, Settings, config_path};
use proofview_engine::Infoview;
use proofview_lsp::{LeanServer, ServerEvent, path_to_file_uri};
use proofview_types::Position;

use command::Command;
use output::{Output, emit, emit_error, spawn_printer, spawn_request_printer};

const EVENT_CHANNEL_CAPACITY: usize = 256;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout carries the JSON protocol, so logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: next to the config file, ~/.proofview/logs/proofview.log
    if let Some(config_path) = config_path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("proofview.log"));
    }

    // Fallback: ./.proofview/logs/proofview.log
    candidates.push(PathBuf::from(".proofview").join("logs").join("proofview.log"));

    candidates
}

fn load_settings() -> Result<Settings> {
    match ProofviewConfig::load() {
        Ok(Some(config)) => config.resolve().context("invalid [server] config"),
        Ok(None) => Ok(Settings::default()),
        Err(err) => {
            emit_error(format!("{err}; using defaults"));
            Ok(Settings::default())
        }
    }
}

enum Flow {
    Continue,
    Quit,
}

struct Session {
    root: PathBuf,
    server: Arc<LeanServer>,
    view: Infoview<LeanServer>,
}

impl Session {
    fn document_uri(&self, path: &Path) -> Result<String> {
        let absolute = self.root.join(path);
        Ok(path_to_file_uri(&absolute)?.to_string())
    }

    async fn execute(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Open { path } => {
                let absolute = self.root.join(&path);
                let text = tokio::fs::read_to_string(&absolute)
                    .await
                    .with_context(|| format!("reading {}", absolute.display()))?;
                let uri = self.document_uri(&path)?;
                self.server.sync_document(&uri, &text).await?;
                tracing::info!(%uri, "Document synced");
            }
            Command::Cursor {
                path,
                line,
                character,
            } => {
                let uri = self.document_uri(&path)?;
                self.view
                    .cursor_moved(Position::new(uri, line, character))
                    .await?;
            }
            Command::Pin => {
                let id = self.view.pin().await?;
                spawn_printer(self.view.view(id)?);
            }
            Command::Unpin(index) => {
                self.view.unpin(index).await?;
            }
            Command::Pause(id) => {
                self.view.toggle_paused(id).await?;
            }
            Command::Refresh(id) => {
                let report = self.view.refresh(id).await?;
                tracing::debug!(?id, ?report, "Refresh finished");
            }
            Command::Copy(id) => {
                if !self.view.copy_to_comment(id).await? {
                    emit_error("no goals to copy");
                }
            }
            Command::Reveal(id) => {
                if !self.view.reveal(id).await? {
                    emit_error("nothing to reveal yet");
                }
            }
            Command::Show(id) => {
                let state = self.view.view(id)?.state();
                emit(&Output::State { state: &state });
            }
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    async fn on_server_event(&mut self, event: ServerEvent) -> Flow {
        match event {
            ServerEvent::Processing { uri, busy } => {
                if let Err(e) = self.view.processing_changed(&uri, busy).await {
                    tracing::warn!("Failed to forward processing state: {e}");
                }
                Flow::Continue
            }
            ServerEvent::DiagnosticsChanged { uri } => {
                tracing::trace!(%uri, "Diagnostics changed");
                Flow::Continue
            }
            ServerEvent::Stopped { reason } => {
                emit_error(format!("Lean server stopped: {reason:?}"));
                Flow::Quit
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let root = match env::args_os().nth(1) {
        Some(dir) => PathBuf::from(dir),
        None => env::current_dir().context("resolving current directory")?,
    };
    let root = root
        .canonicalize()
        .with_context(|| format!("workspace root {}", root.display()))?;

    let settings = load_settings()?;
    tracing::info!(
        root = %root.display(),
        command = settings.server.command(),
        "Starting proofview"
    );

    let (event_tx, mut events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let server = Arc::new(
        LeanServer::start(&settings.server, settings.rpc, &root, event_tx)
            .await
            .context("starting Lean server")?,
    );

    let (view, requests) = Infoview::new(Arc::clone(&server), settings.scheduler);
    spawn_printer(view.cursor());
    spawn_request_printer(requests);
    let mut session = Session {
        root,
        server: Arc::clone(&server),
        view,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let flow = tokio::select! {
            line = lines.next_line() => match line.context("reading stdin")? {
                Some(line) if line.trim().is_empty() => Flow::Continue,
                Some(line) => match command::parse(&line) {
                    Ok(command) => session.execute(command).await.unwrap_or_else(|e| {
                        emit_error(format!("{e:#}"));
                        Flow::Continue
                    }),
                    Err(e) => {
                        emit_error(e.to_string());
                        Flow::Continue
                    }
                },
                None => Flow::Quit,
            },
            Some(event) = events.recv() => session.on_server_event(event).await,
            _ = tokio::signal::ctrl_c() => Flow::Quit,
        };
        if matches!(flow, Flow::Quit) {
            break;
        }
    }

    tracing::info!("Shutting down");
    drop(session);
    server.shutdown().await;
    Ok(())
}
