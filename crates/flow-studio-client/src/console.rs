//! Bounded execution log for one flow session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use flow_studio_core::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::wire::RunKey;

pub const DEFAULT_CONSOLE_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ConsoleEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            run: None,
            node_id: None,
            data: None,
        }
    }

    pub fn with_run(mut self, run: RunKey) -> Self {
        self.run = Some(run);
        self
    }

    pub fn with_node(mut self, node_id: Option<NodeId>) -> Self {
        self.node_id = node_id;
        self
    }

    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }
}

/// Keeps the most recent `capacity` entries and fans new ones out to subscribers.
///
/// Cloning shares the same log.
#[derive(Clone)]
pub struct ExecutionConsole {
    entries: Arc<Mutex<VecDeque<ConsoleEntry>>>,
    capacity: usize,
    tx: broadcast::Sender<ConsoleEntry>,
}

impl Default for ExecutionConsole {
    fn default() -> Self {
        Self::new(DEFAULT_CONSOLE_CAPACITY)
    }
}

impl ExecutionConsole {
    /// Console keeping at most `capacity` entries; the oldest are evicted first.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            tx,
        }
    }

    /// Append an entry and broadcast it to subscribers.
    pub fn push(&self, entry: ConsoleEntry) {
        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }
        // No subscribers is fine.
        let _ = self.tx.send(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(ConsoleEntry::new(LogLevel::Info, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(ConsoleEntry::new(LogLevel::Warn, message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(ConsoleEntry::new(LogLevel::Error, message));
    }

    /// Receive entries pushed after this call. Slow receivers may observe `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEntry> {
        self.tx.subscribe()
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> Vec<ConsoleEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
