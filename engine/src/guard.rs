//! Failure classification around a fetch.
//!
//! A document edit racing a query makes the server answer
//! `ContentModified`. Such a response says nothing about the position, so
//! the fetch is simply repeated until the document settles.

use proofview_lsp::{BackendError, InfoBackend};
use proofview_types::{InfoSnapshot, Position};

use crate::fetcher::GoalFetcher;

/// How a backend failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The document changed while the query was in flight.
    StaleDocument,
    /// A rejection with nothing to report.
    EmptySentinel,
    /// An optional query the server does not implement. The fetcher absorbs
    /// these; one that reaches the guard came from a required query.
    UnsupportedFeature,
    Genuine,
}

#[must_use]
pub fn classify(err: &BackendError) -> FailureClass {
    if err.is_content_modified() {
        FailureClass::StaleDocument
    } else if err.is_empty_sentinel() {
        FailureClass::EmptySentinel
    } else if err.is_method_not_found() {
        FailureClass::UnsupportedFeature
    } else {
        FailureClass::Genuine
    }
}

/// Settled result of one fetch cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome {
    Ready(InfoSnapshot),
    /// Clear any shown error and leave the rest as it is.
    Cleared,
    Failed(String),
}

pub struct StaleRequestGuard<B> {
    fetcher: GoalFetcher<B>,
}

impl<B> Clone for StaleRequestGuard<B> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
        }
    }
}

impl<B: InfoBackend> StaleRequestGuard<B> {
    #[must_use]
    pub fn new(fetcher: GoalFetcher<B>) -> Self {
        Self { fetcher }
    }

    /// Fetch `position`, retrying on stale-document failures.
    ///
    /// Retries run one after another with no cap. Each yields to the
    /// runtime first so pending edits can reach the server.
    pub async fn run(&self, position: &Position) -> GuardOutcome {
        let mut retries: u32 = 0;
        loop {
            let err = match self.fetcher.fetch(position).await {
                Ok(snapshot) => {
                    if retries > 0 {
                        tracing::debug!(%position, retries, "Fetch settled after stale retries");
                    }
                    return GuardOutcome::Ready(snapshot);
                }
                Err(err) => err,
            };

            match classify(&err) {
                FailureClass::StaleDocument => {
                    retries += 1;
                    tracing::trace!(%position, retries, "Document changed during fetch, retrying");
                    tokio::task::yield_now().await;
                }
                FailureClass::EmptySentinel => return GuardOutcome::Cleared,
                FailureClass::UnsupportedFeature | FailureClass::Genuine => {
                    tracing::warn!(%position, error = %err, "Info fetch failed");
                    return GuardOutcome::Failed(format!("Error updating: {err}."));
                }
            }
        }
    }
}
