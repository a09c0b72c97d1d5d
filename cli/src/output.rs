//! JSON lines written to stdout, one per event.

use std::io::{Write, stdout};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use proofview_engine::{EditorRequest, InfoSlotHandle};
use proofview_types::DisplayState;

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Output<'a> {
    /// A view published a new state.
    State {
        #[serde(flatten)]
        state: &'a DisplayState,
    },
    /// Work for the editor host.
    Editor {
        #[serde(flatten)]
        request: &'a EditorRequest,
    },
    Error {
        message: String,
    },
}

pub fn emit(output: &Output<'_>) {
    let mut out = stdout().lock();
    let written = serde_json::to_writer(&mut out, output)
        .map_err(std::io::Error::from)
        .and_then(|()| writeln!(out))
        .and_then(|()| out.flush());
    if let Err(e) = written {
        tracing::warn!("Failed to write output: {e}");
    }
}

pub fn emit_error(message: impl Into<String>) {
    emit(&Output::Error {
        message: message.into(),
    });
}

/// Print every state `slot` publishes until the slot stops.
pub fn spawn_printer(slot: &InfoSlotHandle) {
    let mut rx = slot.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            emit(&Output::State { state: &state });
        }
    });
}

/// Print editor requests until every sender is gone. Runs apart from the
/// command loop, which may be blocked sending more of them.
pub fn spawn_request_printer(mut requests: mpsc::Receiver<EditorRequest>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            emit(&Output::Editor { request: &request });
        }
    })
}
