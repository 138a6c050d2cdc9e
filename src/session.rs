//! # Session state
//!
//! The engine holds no state between runs; whatever lives across user
//! interactions is the caller's. [SessionState] is that object: the current
//! dataset, the pristine original, and an append-only history of the runs that
//! produced the current shape.
//!
//! [SessionState::commit] is the only way the current dataset advances, and it
//! takes a complete result dataset plus its history entry. A run that failed
//! never reaches it, so partially processed data cannot leak into the session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::dataset::Dataset;

/// One successfully completed run. Appended, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    /// Output column the run added or replaced.
    pub column: String,
    /// Provider display name, as shown to the user.
    pub provider: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(column: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            provider: provider.into(),
            model: model.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Dataset state held across processing runs.
#[derive(Debug, Clone)]
pub struct SessionState {
    current: Dataset,
    original: Dataset,
    history: Vec<HistoryEntry>,
}

impl SessionState {
    /// Start a session from a freshly loaded dataset.
    pub fn new(dataset: Dataset) -> Self {
        Self {
            current: dataset.clone(),
            original: dataset,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> &Dataset {
        &self.current
    }

    pub fn original(&self) -> &Dataset {
        &self.original
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Publish the result of a successful run.
    pub fn commit(&mut self, result: Dataset, entry: HistoryEntry) {
        self.current = result;
        self.history.push(entry);
    }

    /// Drop all derived columns and history, restoring the original dataset.
    pub fn reset(&mut self) {
        self.current = self.original.clone();
        self.history.clear();
    }
}
