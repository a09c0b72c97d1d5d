//! Latest published diagnostics per document.

use std::collections::HashMap;

use proofview_types::Diagnostic;

#[derive(Debug, Default)]
pub(crate) struct DiagnosticsStore {
    data: HashMap<String, Vec<Diagnostic>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Servers republish the full set for a document; an empty set clears it.
    pub fn update(&mut self, uri: String, items: Vec<Diagnostic>) {
        if items.is_empty() {
            self.data.remove(&uri);
        } else {
            self.data.insert(uri, items);
        }
    }

    /// Diagnostics starting on `line`, most severe first.
    pub fn messages_at(&self, uri: &str, line: u32) -> Vec<Diagnostic> {
        let mut items: Vec<Diagnostic> = self
            .data
            .get(uri)
            .into_iter()
            .flatten()
            .filter(|d| d.range().starts_on_line(line))
            .cloned()
            .collect();
        items.sort_by_key(|d| (d.severity(), d.range().start));
        items
    }

    pub fn error_count(&self, uri: &str) -> usize {
        self.data
            .get(uri)
            .map_or(0, |items| {
                items.iter().filter(|d| d.severity().is_error()).count()
            })
    }
}
