//! Per-document RPC sessions for interactive queries.
//!
//! The server ties interactive objects to a session opened with
//! `$/lean/rpc/connect`. Sessions expire unless kept alive, so a background
//! task pings every open session on a fixed period.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::protocol::{self, Notification, methods};
use crate::server::WriterCommand;

#[derive(Debug, Default)]
pub(crate) struct RpcSessions {
    sessions: Mutex<HashMap<String, Value>>,
}

impl RpcSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, uri: &str) -> Option<Value> {
        self.sessions.lock().await.get(uri).cloned()
    }

    /// Store a freshly connected session unless a concurrent connect won the
    /// race; returns whichever session is now current.
    pub async fn insert_if_absent(&self, uri: &str, session: Value) -> Value {
        self.sessions
            .lock()
            .await
            .entry(uri.to_string())
            .or_insert(session)
            .clone()
    }

    /// Forget `session` for `uri`, unless it was already replaced.
    pub async fn invalidate(&self, uri: &str, session: &Value) {
        let mut sessions = self.sessions.lock().await;
        if sessions.get(uri) == Some(session) {
            sessions.remove(uri);
        }
    }

    pub async fn snapshot(&self) -> Vec<(String, Value)> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|(uri, session)| (uri.clone(), session.clone()))
            .collect()
    }
}

pub(crate) fn spawn_keep_alive(
    sessions: Arc<RpcSessions>,
    writer_tx: mpsc::Sender<WriterCommand>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; sessions are fresh then.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for (uri, session) in sessions.snapshot().await {
                let notification = Notification::new(
                    methods::RPC_KEEP_ALIVE,
                    Some(protocol::rpc_keep_alive_params(&uri, &session)),
                );
                let Ok(frame) = serde_json::to_value(&notification) else {
                    continue;
                };
                if writer_tx.send(WriterCommand::Send(frame)).await.is_err() {
                    tracing::debug!("Writer closed, stopping RPC keep-alive");
                    return;
                }
            }
        }
    })
}
