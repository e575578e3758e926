use serde::Serialize;
use serde_json::Value;
use tether_protocol::{HistoryResponse, Role};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub index: u64,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
}

/// Local view of the current session's messages, ordered by index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces everything with the authoritative history.
    pub fn replace_with_history(&mut self, history: &HistoryResponse) {
        let mut entries: Vec<TranscriptEntry> = history
            .messages
            .iter()
            .map(|message| TranscriptEntry {
                index: message.index,
                role: message.role,
                content: message.content.clone().unwrap_or_default(),
                tool_calls: message.tool_calls.clone(),
            })
            .collect();
        entries.sort_by_key(|entry| entry.index);
        self.entries = entries;
    }

    pub fn push(&mut self, index: u64, role: Role, content: &str) {
        self.entries.push(TranscriptEntry {
            index,
            role,
            content: content.to_string(),
            tool_calls: None,
        });
    }

    /// Drops every entry with `index >= from`. Returns how many were removed.
    pub fn truncate_from(&mut self, from: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.index < from);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn last_index(&self) -> Option<u64> {
        self.entries.iter().map(|entry| entry.index).max()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
