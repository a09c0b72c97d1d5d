//! The info view: one cursor-following slot plus any number of pinned ones,
//! all sharing one backend.
//!
//! Actions that belong to the editor (revealing a position, inserting a
//! comment, persisting pins) are not performed here. They go out as
//! [`EditorRequest`]s for the host to carry out.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use proofview_lsp::InfoBackend;
use proofview_types::{Position, SchedulerSettings, ViewKind};

use crate::fetcher::GoalFetcher;
use crate::guard::StaleRequestGuard;
use crate::slot::{CycleReport, InfoSlotHandle, SlotClosed, spawn_slot};

const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Addresses one view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewId {
    Cursor,
    /// Index into the pinned list, oldest first.
    Pinned(usize),
}

/// Work handed to the editor host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "request", rename_all = "camelCase")]
pub enum EditorRequest {
    Reveal { position: Position },
    CopyToComment { text: String },
    PinsChanged { pins: Vec<Position> },
}

#[derive(Debug, thiserror::Error)]
pub enum InfoviewError {
    #[error("no pinned view at index {0}")]
    NoSuchView(usize),
    #[error("the cursor has no position to pin yet")]
    NothingToPin,
    #[error(transparent)]
    Closed(#[from] SlotClosed),
}

struct Pin {
    position: Position,
    slot: InfoSlotHandle,
}

pub struct Infoview<B> {
    guard: StaleRequestGuard<B>,
    settings: SchedulerSettings,
    cursor: InfoSlotHandle,
    cursor_position: Option<Position>,
    pins: Vec<Pin>,
    /// Documents the server reports as still being processed.
    busy_documents: HashSet<String>,
    requests: mpsc::Sender<EditorRequest>,
}

impl<B: InfoBackend> Infoview<B> {
    /// Build the view and the receiving end of its editor requests.
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        settings: SchedulerSettings,
    ) -> (Self, mpsc::Receiver<EditorRequest>) {
        let guard = StaleRequestGuard::new(GoalFetcher::new(backend));
        let cursor = spawn_slot(ViewKind::Cursor, guard.clone(), settings);
        let (requests, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let view = Self {
            guard,
            settings,
            cursor,
            cursor_position: None,
            pins: Vec::new(),
            busy_documents: HashSet::new(),
            requests,
        };
        (view, requests_rx)
    }

    #[must_use]
    pub fn cursor(&self) -> &InfoSlotHandle {
        &self.cursor
    }

    #[must_use]
    pub fn pinned_positions(&self) -> Vec<Position> {
        self.pins.iter().map(|pin| pin.position.clone()).collect()
    }

    pub fn view(&self, id: ViewId) -> Result<&InfoSlotHandle, InfoviewError> {
        match id {
            ViewId::Cursor => Ok(&self.cursor),
            ViewId::Pinned(index) => self
                .pins
                .get(index)
                .map(|pin| &pin.slot)
                .ok_or(InfoviewError::NoSuchView(index)),
        }
    }

    /// Returns whether the cursor actually moved.
    pub async fn cursor_moved(&mut self, position: Position) -> Result<bool, InfoviewError> {
        let busy = self.busy_documents.contains(position.uri());
        let moved = self.cursor.track(position.clone(), busy).await?;
        self.cursor_position = Some(position);
        Ok(moved)
    }

    /// Forward a processing change to every view showing `uri`.
    pub async fn processing_changed(&mut self, uri: &str, busy: bool) -> Result<(), InfoviewError> {
        let was_busy = if busy {
            !self.busy_documents.insert(uri.to_string())
        } else {
            self.busy_documents.remove(uri)
        };
        if was_busy == busy {
            return Ok(());
        }

        if self
            .cursor_position
            .as_ref()
            .is_some_and(|p| p.in_document(uri))
        {
            self.cursor.processing_changed(busy).await?;
        }
        for pin in self.pins.iter().filter(|pin| pin.position.in_document(uri)) {
            pin.slot.processing_changed(busy).await?;
        }
        Ok(())
    }

    /// Pin the current cursor position in a new view.
    pub async fn pin(&mut self) -> Result<ViewId, InfoviewError> {
        let position = self
            .cursor_position
            .clone()
            .ok_or(InfoviewError::NothingToPin)?;
        let slot = spawn_slot(ViewKind::Pinned, self.guard.clone(), self.settings);
        let busy = self.busy_documents.contains(position.uri());
        slot.track(position.clone(), busy).await?;
        tracing::info!(%position, "Pinned position");
        self.pins.push(Pin { position, slot });
        self.emit_pins().await;
        Ok(ViewId::Pinned(self.pins.len() - 1))
    }

    /// Drop a pinned view. Later pins shift down by one.
    pub async fn unpin(&mut self, index: usize) -> Result<Position, InfoviewError> {
        if index >= self.pins.len() {
            return Err(InfoviewError::NoSuchView(index));
        }
        let pin = self.pins.remove(index);
        tracing::info!(position = %pin.position, "Unpinned position");
        self.emit_pins().await;
        Ok(pin.position)
    }

    pub async fn toggle_paused(&self, id: ViewId) -> Result<bool, InfoviewError> {
        Ok(self.view(id)?.toggle_paused().await?)
    }

    pub async fn refresh(&self, id: ViewId) -> Result<CycleReport, InfoviewError> {
        Ok(self.view(id)?.refresh().await?)
    }

    /// Ask the editor to insert the visible goals as a comment. Returns
    /// false when the view shows no goals.
    pub async fn copy_to_comment(&self, id: ViewId) -> Result<bool, InfoviewError> {
        let Some(text) = self.view(id)?.state().goals_text() else {
            return Ok(false);
        };
        self.emit(EditorRequest::CopyToComment { text }).await;
        Ok(true)
    }

    /// Ask the editor to show the position the view's content belongs to.
    pub async fn reveal(&self, id: ViewId) -> Result<bool, InfoviewError> {
        let Some(position) = self.view(id)?.state().position().cloned() else {
            return Ok(false);
        };
        self.emit(EditorRequest::Reveal { position }).await;
        Ok(true)
    }

    async fn emit_pins(&self) {
        let pins = self.pinned_positions();
        self.emit(EditorRequest::PinsChanged { pins }).await;
    }

    async fn emit(&self, request: EditorRequest) {
        if self.requests.send(request).await.is_err() {
            tracing::debug!("Editor request receiver dropped");
        }
    }
}
