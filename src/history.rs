//! Record of every message that has been leased at least once.
//!
//! Entries are keyed by message id and outlive queue membership, so delivered
//! and failed messages stay reportable after they leave the dispatch queue.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::dispatch::{Message, MessageStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub id: String,
    pub recipient: String,
    pub body: String,
    pub status: MessageStatus,
    pub retry_count: u32,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl From<&Message> for HistoryRecord {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            recipient: message.recipient.clone(),
            body: message.body.clone(),
            status: message.status,
            retry_count: message.retry_count,
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

#[derive(Debug, Default)]
pub struct HistoryIndex {
    records: HashMap<String, HistoryRecord>,
}

impl HistoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert on first lease, overwrite in place on later ones.
    pub(crate) fn record(&mut self, message: &Message) {
        self.records
            .insert(message.id.clone(), HistoryRecord::from(message));
    }

    /// Mirror a state change onto an existing entry. Messages that were never
    /// leased are not added. Returns whether an entry was updated.
    pub(crate) fn refresh(&mut self, message: &Message) -> bool {
        match self.records.get_mut(&message.id) {
            Some(record) => {
                *record = HistoryRecord::from(message);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, message_id: &str) -> Option<&HistoryRecord> {
        self.records.get(message_id)
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.records.contains_key(message_id)
    }

    /// All records, oldest submission first (ties broken by id).
    pub fn list(&self) -> Vec<HistoryRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
