//! Recently submitted prompts.
//!
//! Unstarred entries are capped at [`MAX_UNSTARRED_HISTORY`]; starred
//! entries are never evicted.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Maximum number of unstarred prompts kept.
pub const MAX_UNSTARRED_HISTORY: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptHistoryEntry {
    pub prompt: String,
    pub starred: bool,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptHistory {
    entries: Vec<PromptHistoryEntry>,
}

impl PromptHistory {
    pub fn entries(&self) -> &[PromptHistoryEntry] {
        &self.entries
    }

    /// Record a prompt. Known prompts are left where they are; when the
    /// unstarred cap is reached the oldest unstarred entry is evicted.
    pub fn push(&mut self, prompt: &str) {
        if self.entries.iter().any(|e| e.prompt == prompt) {
            return;
        }
        let unstarred = self.entries.iter().filter(|e| !e.starred).count();
        if unstarred >= MAX_UNSTARRED_HISTORY {
            if let Some(index) = self.entries.iter().position(|e| !e.starred) {
                self.entries.remove(index);
            }
        }
        self.entries.push(PromptHistoryEntry {
            prompt: prompt.to_string(),
            starred: false,
            timestamp: Utc::now(),
        });
    }

    pub fn remove(&mut self, prompt: &str) {
        self.entries.retain(|e| e.prompt != prompt);
    }

    /// Flip the starred flag. Returns the new value, or `None` when the
    /// prompt is not in the history.
    pub fn toggle_star(&mut self, prompt: &str) -> Option<bool> {
        let entry = self.entries.iter_mut().find(|e| e.prompt == prompt)?;
        entry.starred = !entry.starred;
        Some(entry.starred)
    }
}
