//! Lean server handle: the child process and its JSON-RPC plumbing.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use proofview_types::{Position, ProtocolVersion, RpcSettings, ServerConfig, ServerVersion};

use crate::codec::{FrameReader, FrameWriter};
use crate::diagnostics::DiagnosticsStore;
use crate::error::{BackendError, codes};
use crate::protocol::{
    self, FileProgressParams, InitializeResult, Notification, PublishDiagnosticsParams, Request,
    RpcConnected, methods,
};
use crate::rpc::{self, RpcSessions};

const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

const WRITER_CHANNEL_CAPACITY: usize = 64;

pub(crate) enum WriterCommand {
    Send(Value),
    Shutdown,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Out-of-band events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Elaboration progress for a document; `busy` while anything is pending.
    Processing { uri: String, busy: bool },
    DiagnosticsChanged { uri: String },
    Stopped { reason: StopReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Exited,
    Failed(String),
}

enum IncomingFrame {
    Response { id: u64, body: Value },
    ServerRequest { id: Value, method: String },
    Notification { method: String, params: Option<Value> },
}

fn parse_incoming(frame: &Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_result_or_error) {
        (Some(id_val), None, true) => Some(IncomingFrame::Response {
            id: id_val.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id_val), Some(method), _) => Some(IncomingFrame::ServerRequest {
            id: id_val.clone(),
            method,
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

/// Split a response body into its result or its classified error.
fn into_result(body: Value) -> Result<Value, BackendError> {
    match body {
        Value::Object(mut map) => {
            if let Some(error) = map.remove("error") {
                return Err(BackendError::from_response_error(error));
            }
            Ok(map.remove("result").unwrap_or(Value::Null))
        }
        other => Err(BackendError::Payload(other)),
    }
}

/// A running Lean language server.
///
/// All query methods take `&self`; one handle is shared by every info view.
pub struct LeanServer {
    name: String,
    child: Mutex<Child>,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: AtomicU64,
    pending: PendingMap,
    /// Last version sent per open document; presence means didOpen was sent.
    documents: Mutex<HashMap<String, i32>>,
    diagnostics: Arc<Mutex<DiagnosticsStore>>,
    sessions: Arc<RpcSessions>,
    settings: RpcSettings,
    protocol: ProtocolVersion,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    keep_alive_handle: Option<JoinHandle<()>>,
}

impl LeanServer {
    /// Spawn the configured command in `workspace_root` and run the
    /// initialize handshake. The protocol surface is fixed from here on.
    pub async fn start(
        config: &ServerConfig,
        settings: RpcSettings,
        workspace_root: &Path,
        event_tx: mpsc::Sender<ServerEvent>,
    ) -> Result<Self> {
        let resolved_cmd = which::which(config.command())
            .with_context(|| format!("{} not found in PATH", config.command()))?;
        let mut child = Command::new(&resolved_cmd)
            .args(config.args())
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", config.command()))?;

        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let diagnostics = Arc::new(Mutex::new(DiagnosticsStore::new()));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(stdin);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("Lean server write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let name = config.command().to_string();
        let reader_pending = pending.clone();
        let reader_diagnostics = diagnostics.clone();
        let reader_writer_tx = writer_tx.clone();
        let reader_name = name.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(stdout);
            let reason = loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        Self::dispatch_frame(
                            &frame,
                            &reader_pending,
                            &reader_diagnostics,
                            &event_tx,
                            &reader_writer_tx,
                            &reader_name,
                        )
                        .await;
                    }
                    Ok(None) => {
                        tracing::info!(server = %reader_name, "Lean server closed stdout");
                        break StopReason::Exited;
                    }
                    Err(e) => {
                        tracing::warn!(server = %reader_name, error = %e, "Lean server read error");
                        break StopReason::Failed(e.to_string());
                    }
                }
            };
            // Dropping the senders fails every outstanding request.
            reader_pending.lock().await.clear();
            let _ = event_tx.send(ServerEvent::Stopped { reason }).await;
        });

        let mut server = Self {
            name,
            child: Mutex::new(child),
            writer_tx,
            next_id: AtomicU64::new(1),
            pending,
            documents: Mutex::new(HashMap::new()),
            diagnostics,
            sessions: Arc::new(RpcSessions::new()),
            settings,
            protocol: ProtocolVersion::Legacy,
            reader_handle,
            writer_handle,
            keep_alive_handle: None,
        };

        server.initialize(workspace_root).await?;

        if server.protocol == ProtocolVersion::Interactive {
            server.keep_alive_handle = Some(rpc::spawn_keep_alive(
                server.sessions.clone(),
                server.writer_tx.clone(),
                server.settings.keep_alive,
            ));
        }

        Ok(server)
    }

    async fn dispatch_frame(
        frame: &Value,
        pending: &Mutex<HashMap<u64, oneshot::Sender<Value>>>,
        diagnostics: &Mutex<DiagnosticsStore>,
        event_tx: &mpsc::Sender<ServerEvent>,
        writer_tx: &mpsc::Sender<WriterCommand>,
        server_name: &str,
    ) {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!("Ignoring malformed JSON-RPC frame from '{server_name}'");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, body } => {
                let sender = pending.lock().await.remove(&id);
                if let Some(tx) = sender {
                    let _ = tx.send(body);
                }
            }
            IncomingFrame::ServerRequest { id, method } => {
                tracing::debug!("'{server_name}' sent request: {method}, replying method not found");
                let response = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": codes::METHOD_NOT_FOUND,
                        "message": format!("Method not found: {method}")
                    }
                });
                let _ = writer_tx.send(WriterCommand::Send(response)).await;
            }
            IncomingFrame::Notification { method, params } => {
                Self::handle_notification(server_name, &method, params, diagnostics, event_tx)
                    .await;
            }
        }
    }

    async fn handle_notification(
        server_name: &str,
        method: &str,
        params: Option<Value>,
        diagnostics: &Mutex<DiagnosticsStore>,
        event_tx: &mpsc::Sender<ServerEvent>,
    ) {
        let Some(params) = params else { return };
        match method {
            methods::PUBLISH_DIAGNOSTICS => {
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(published) => {
                        let items = published
                            .diagnostics
                            .iter()
                            .map(protocol::LspDiagnostic::to_diagnostic)
                            .collect();
                        let errors = {
                            let mut store = diagnostics.lock().await;
                            store.update(published.uri.clone(), items);
                            store.error_count(&published.uri)
                        };
                        tracing::debug!(uri = %published.uri, errors, "Diagnostics updated");
                        let _ = event_tx
                            .send(ServerEvent::DiagnosticsChanged { uri: published.uri })
                            .await;
                    }
                    Err(e) => {
                        tracing::debug!(
                            "Failed to parse publishDiagnostics from '{server_name}': {e}"
                        );
                    }
                }
            }
            methods::FILE_PROGRESS => match serde_json::from_value::<FileProgressParams>(params) {
                Ok(progress) => {
                    let busy = progress.is_busy();
                    let _ = event_tx
                        .send(ServerEvent::Processing {
                            uri: progress.text_document.uri,
                            busy,
                        })
                        .await;
                }
                Err(e) => {
                    tracing::debug!("Failed to parse fileProgress from '{server_name}': {e}");
                }
            },
            _ => {
                tracing::trace!("Ignoring notification from '{server_name}': {method}");
            }
        }
    }

    async fn initialize(&mut self, workspace_root: &Path) -> Result<()> {
        let root_uri = protocol::path_to_file_uri(workspace_root)
            .context("converting workspace root to URI")?;

        let result = self
            .send_request(
                methods::INITIALIZE,
                Some(protocol::initialize_params(root_uri.as_str())),
            )
            .await
            .context("Lean initialize failed")?;

        let init: InitializeResult = serde_json::from_value(result).unwrap_or_else(|e| {
            tracing::debug!("Unexpected initialize result shape: {e}");
            InitializeResult::default()
        });
        let reported = init.server_info.unwrap_or_default();
        let server_version = reported
            .version
            .as_deref()
            .and_then(|raw| match raw.parse::<ServerVersion>() {
                Ok(version) => Some(version),
                Err(e) => {
                    tracing::warn!("{e}; assuming legacy protocol");
                    None
                }
            });
        self.protocol = self
            .settings
            .protocol
            .resolve(server_version.as_ref());
        tracing::info!(
            server = %self.name,
            reported_name = %reported.name,
            version = ?server_version,
            protocol = ?self.protocol,
            "Lean server initialized"
        );

        self.send_notification(methods::INITIALIZED, Some(serde_json::json!({})))
            .await?;
        Ok(())
    }

    pub(crate) async fn send_request(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<Value, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = Request::new(id, method, params);
        let frame = serde_json::to_value(&request)
            .map_err(|e| BackendError::Transport(format!("serializing {method}: {e}")))?;
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(BackendError::Transport("writer channel closed".into()));
        }

        let response = match tokio::time::timeout(self.settings.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                return Err(BackendError::Transport(
                    "server stopped before responding".into(),
                ));
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(BackendError::Timeout {
                    method: method.to_string(),
                    secs: self.settings.request_timeout.as_secs(),
                });
            }
        };

        into_result(response)
    }

    pub(crate) async fn request_typed<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<T, BackendError> {
        let value = self.send_request(method, Some(params)).await?;
        serde_json::from_value(value).map_err(|e| BackendError::decode(method, &e))
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<(), BackendError> {
        let notification = Notification::new(method, params);
        let frame = serde_json::to_value(&notification)
            .map_err(|e| BackendError::Transport(format!("serializing {method}: {e}")))?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| BackendError::Transport("writer channel closed".into()))
    }

    /// Send the full text of a document: didOpen the first time, then
    /// didChange with a monotonically increasing version.
    pub async fn sync_document(&self, uri: &str, text: &str) -> Result<(), BackendError> {
        let (method, params) = {
            let mut documents = self.documents.lock().await;
            match documents.get_mut(uri) {
                Some(version) => {
                    *version += 1;
                    (
                        methods::DID_CHANGE,
                        protocol::did_change_params(uri, *version, text),
                    )
                }
                None => {
                    documents.insert(uri.to_string(), 1);
                    (methods::DID_OPEN, protocol::did_open_params(uri, 1, text))
                }
            }
        };
        self.send_notification(method, Some(params)).await
    }

    /// Call a server-side RPC method at `position`, reconnecting the
    /// document's session once if the server reports it expired.
    pub(crate) async fn rpc_call<T: DeserializeOwned>(
        &self,
        position: &Position,
        method: &'static str,
    ) -> Result<T, BackendError> {
        let mut reconnected = false;
        loop {
            let session = self.session_for(position.uri()).await?;
            let params = protocol::rpc_call_params(
                &session,
                position,
                method,
                protocol::position_params(position),
            );
            match self.send_request(methods::RPC_CALL, Some(params)).await {
                Ok(value) => {
                    return serde_json::from_value(value)
                        .map_err(|e| BackendError::decode(method, &e));
                }
                Err(err) if err.needs_reconnect() && !reconnected => {
                    tracing::debug!(uri = position.uri(), method, "RPC session expired, reconnecting");
                    self.sessions.invalidate(position.uri(), &session).await;
                    reconnected = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn session_for(&self, uri: &str) -> Result<Value, BackendError> {
        if let Some(session) = self.sessions.get(uri).await {
            return Ok(session);
        }
        let connected: RpcConnected = self
            .request_typed(methods::RPC_CONNECT, protocol::rpc_connect_params(uri))
            .await?;
        tracing::debug!(uri, session = %connected.session_id, "RPC session connected");
        Ok(self
            .sessions
            .insert_if_absent(uri, connected.session_id)
            .await)
    }

    pub(crate) async fn messages_at(&self, position: &Position) -> Vec<proofview_types::Diagnostic> {
        self.diagnostics
            .lock()
            .await
            .messages_at(position.uri(), position.line())
    }

    #[must_use]
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Gracefully shut the server down, killing it if it lingers.
    pub async fn shutdown(&self) {
        if let Some(handle) = &self.keep_alive_handle {
            handle.abort();
        }
        if self.send_request(methods::SHUTDOWN, None).await.is_ok() {
            let _ = self.send_notification(methods::EXIT, None).await;
        }

        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;

        let mut child = self.child.lock().await;
        let exited = tokio::time::timeout(
            Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
            child.wait(),
        )
        .await;

        if exited.is_err() {
            tracing::debug!("'{}' didn't exit in time, killing", self.name);
            let _ = child.kill().await;
        }
    }
}

impl Drop for LeanServer {
    fn drop(&mut self) {
        if let Some(handle) = &self.keep_alive_handle {
            handle.abort();
        }
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Channels = (
        PendingMap,
        Arc<Mutex<DiagnosticsStore>>,
        mpsc::Sender<ServerEvent>,
        mpsc::Receiver<ServerEvent>,
        mpsc::Sender<WriterCommand>,
        mpsc::Receiver<WriterCommand>,
    );

    fn test_channels() -> Channels {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let diagnostics = Arc::new(Mutex::new(DiagnosticsStore::new()));
        let (event_tx, event_rx) = mpsc::channel(32);
        let (writer_tx, writer_rx) = mpsc::channel(32);
        (pending, diagnostics, event_tx, event_rx, writer_tx, writer_rx)
    }

    #[tokio::test]
    async fn test_dispatch_response_routes_to_pending() {
        let (pending, diagnostics, event_tx, _event_rx, writer_tx, _writer_rx) = test_channels();
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(1, tx);

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": { "goals": [] }
        });
        LeanServer::dispatch_frame(&frame, &pending, &diagnostics, &event_tx, &writer_tx, "test")
            .await;

        let body = rx.await.unwrap();
        assert_eq!(into_result(body).unwrap(), serde_json::json!({ "goals": [] }));
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_error_response_classified() {
        let (pending, diagnostics, event_tx, _event_rx, writer_tx, _writer_rx) = test_channels();
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(2, tx);

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": { "code": -32801, "message": "content modified" }
        });
        LeanServer::dispatch_frame(&frame, &pending, &diagnostics, &event_tx, &writer_tx, "test")
            .await;

        let err = into_result(rx.await.unwrap()).unwrap_err();
        assert!(err.is_content_modified());
    }

    #[tokio::test]
    async fn test_dispatch_publish_diagnostics_updates_store() {
        let (pending, diagnostics, event_tx, mut event_rx, writer_tx, _writer_rx) = test_channels();

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {
                "uri": "file:///work/Main.lean",
                "diagnostics": [{
                    "range": { "start": { "line": 5, "character": 0 }, "end": { "line": 5, "character": 10 } },
                    "severity": 1,
                    "message": "unsolved goals"
                }]
            }
        });
        LeanServer::dispatch_frame(&frame, &pending, &diagnostics, &event_tx, &writer_tx, "test")
            .await;

        assert_eq!(
            event_rx.try_recv().unwrap(),
            ServerEvent::DiagnosticsChanged {
                uri: "file:///work/Main.lean".into()
            }
        );
        let messages = diagnostics
            .lock()
            .await
            .messages_at("file:///work/Main.lean", 5);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message(), "unsolved goals");
    }

    #[tokio::test]
    async fn test_dispatch_file_progress_emits_processing() {
        let (pending, diagnostics, event_tx, mut event_rx, writer_tx, _writer_rx) = test_channels();

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "$/lean/fileProgress",
            "params": {
                "textDocument": { "uri": "file:///work/Main.lean", "version": 2 },
                "processing": [{ "range": { "start": { "line": 3, "character": 0 }, "end": { "line": 40, "character": 0 } } }]
            }
        });
        LeanServer::dispatch_frame(&frame, &pending, &diagnostics, &event_tx, &writer_tx, "test")
            .await;

        assert_eq!(
            event_rx.try_recv().unwrap(),
            ServerEvent::Processing {
                uri: "file:///work/Main.lean".into(),
                busy: true
            }
        );
    }

    #[tokio::test]
    async fn test_dispatch_server_request_sends_method_not_found() {
        let (pending, diagnostics, event_tx, _event_rx, writer_tx, mut writer_rx) = test_channels();

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "client/registerCapability",
            "params": {}
        });
        LeanServer::dispatch_frame(&frame, &pending, &diagnostics, &event_tx, &writer_tx, "test")
            .await;

        match writer_rx.try_recv().unwrap() {
            WriterCommand::Send(response) => {
                assert_eq!(response["id"], 5);
                assert_eq!(response["error"]["code"], -32601);
            }
            WriterCommand::Shutdown => panic!("expected Send, got Shutdown"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_unknown_notification_ignored() {
        let (pending, diagnostics, event_tx, mut event_rx, writer_tx, mut writer_rx) =
            test_channels();

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "window/logMessage",
            "params": { "type": 3, "message": "hello" }
        });
        LeanServer::dispatch_frame(&frame, &pending, &diagnostics, &event_tx, &writer_tx, "test")
            .await;

        assert!(event_rx.try_recv().is_err());
        assert!(writer_rx.try_recv().is_err());
    }

    #[test]
    fn test_into_result_null_result() {
        let body = serde_json::json!({ "jsonrpc": "2.0", "id": 3, "result": null });
        assert_eq!(into_result(body).unwrap(), Value::Null);
    }

    #[test]
    fn test_into_result_empty_error_is_sentinel() {
        let body = serde_json::json!({ "jsonrpc": "2.0", "id": 3, "error": {} });
        assert!(into_result(body).unwrap_err().is_empty_sentinel());
    }
}
