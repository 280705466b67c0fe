// Per-cycle candidate pool: one question per sender, last write wins

use crate::codec::ChatEvent;
use crate::window::EventWindow;
use std::collections::BTreeMap;

/// Strip the command prefix and surrounding whitespace from a chat text.
///
/// Returns `None` when the text does not start with `prefix` or nothing is
/// left after stripping. An empty prefix accepts every text.
pub fn strip_command<'a>(prefix: &str, text: &'a str) -> Option<&'a str> {
    let question = text.strip_prefix(prefix)?.trim();
    (!question.is_empty()).then_some(question)
}

#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    prefix: String,
    candidates: BTreeMap<u64, String>,
}

impl CandidatePool {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            candidates: BTreeMap::new(),
        }
    }

    /// Offer a chat event; returns true if it was accepted into the pool
    pub fn offer(&mut self, event: &ChatEvent, window: &EventWindow) -> bool {
        if !window.contains(event.event_time) {
            return false;
        }

        match strip_command(&self.prefix, &event.text) {
            Some(question) => {
                self.candidates.insert(event.sender_id, question.to_string());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, sender_id: u64) -> Option<&str> {
        self.candidates.get(&sender_id).map(String::as_str)
    }

    /// Candidate texts, ordered by sender id
    pub fn questions(&self) -> Vec<&str> {
        self.candidates.values().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
