//! JSON-RPC message shapes and Lean-specific method names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use proofview_types::{Diagnostic, DiagnosticSeverity, Position, Range};

pub(crate) mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
    pub const DID_OPEN: &str = "textDocument/didOpen";
    pub const DID_CHANGE: &str = "textDocument/didChange";
    pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

    pub const PLAIN_GOAL: &str = "$/lean/plainGoal";
    pub const PLAIN_TERM_GOAL: &str = "$/lean/plainTermGoal";
    pub const FILE_PROGRESS: &str = "$/lean/fileProgress";
    pub const RPC_CONNECT: &str = "$/lean/rpc/connect";
    pub const RPC_CALL: &str = "$/lean/rpc/call";
    pub const RPC_KEEP_ALIVE: &str = "$/lean/rpc/keepAlive";

    pub const INTERACTIVE_GOALS: &str = "Lean.Widget.getInteractiveGoals";
    pub const INTERACTIVE_TERM_GOAL: &str = "Lean.Widget.getInteractiveTermGoal";
    pub const GET_WIDGETS: &str = "Lean.Widget.getWidgets";
}

const LANGUAGE_ID: &str = "lean4";

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

pub(crate) fn initialize_params(root_uri: &str) -> Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "clientInfo": { "name": "proofview" },
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "didSave": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                }
            }
        },
        "initializationOptions": {
            "hasWidgets": true
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

pub(crate) fn did_open_params(uri: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": LANGUAGE_ID,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn position_params(position: &Position) -> Value {
    serde_json::json!({
        "textDocument": { "uri": position.uri() },
        "position": {
            "line": position.line(),
            "character": position.character()
        }
    })
}

pub(crate) fn rpc_connect_params(uri: &str) -> Value {
    serde_json::json!({ "uri": uri })
}

pub(crate) fn rpc_call_params(
    session: &Value,
    position: &Position,
    method: &str,
    params: Value,
) -> Value {
    serde_json::json!({
        "textDocument": { "uri": position.uri() },
        "position": {
            "line": position.line(),
            "character": position.character()
        },
        "sessionId": session,
        "method": method,
        "params": params
    })
}

pub(crate) fn rpc_keep_alive_params(uri: &str, session: &Value) -> Value {
    serde_json::json!({ "uri": uri, "sessionId": session })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitializeResult {
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Session ids are 64-bit and may exceed what some peers encode as numbers,
/// so the value is echoed back exactly as received.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcConnected {
    pub session_id: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WidgetsResponse {
    #[serde(default)]
    pub widgets: Vec<proofview_types::WidgetInstance>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDiagnostic {
    pub range: Range,
    pub severity: Option<u64>,
    pub source: Option<String>,
    pub message: String,
}

impl LspDiagnostic {
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(
            self.severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Information),
            self.message.clone(),
            self.range,
            self.source.clone().unwrap_or_else(|| String::from("lean")),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileProgressParams {
    pub text_document: DocumentId,
    #[serde(default)]
    pub processing: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DocumentId {
    pub uri: String,
}

impl FileProgressParams {
    /// The server is still elaborating some part of the document.
    pub fn is_busy(&self) -> bool {
        !self.processing.is_empty()
    }
}

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}
