//! Client side of the polling data-relay service.
//!
//! The relay keeps append-only, timestamped records per source stream and
//! addressed messages per target, both scoped by station and optional session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

mod http;
mod memory;

pub use http::HttpStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StoreScope {
    pub station_id: String,
    pub session_id: Option<String>,
}

impl StoreScope {
    pub fn new(station_id: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            station_id: station_id.into(),
            session_id,
        }
    }

    pub fn with_session(&self, session_id: impl Into<String>) -> Self {
        Self {
            station_id: self.station_id.clone(),
            session_id: Some(session_id.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub created_at_ms: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub source: String,
    pub timestamp_ms: u64,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRecord {
    pub data: Value,
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordQuery {
    #[serde(default)]
    pub range_start_ms: Option<u64>,
    #[serde(default)]
    pub range_end_ms: Option<u64>,
    /// Keep only the most recent `take` matches.
    #[serde(default)]
    pub take: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub target: String,
    pub received_at_ms: u64,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageReceipt {
    pub received_at_ms: u64,
}

/// Precondition for a compare-and-append on a message target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedPrevious {
    /// The target has no messages yet.
    Empty,
    /// The target's newest message was received at this timestamp.
    At(u64),
}

impl ExpectedPrevious {
    /// Expectation matching a log whose newest message was received at `last_ms`.
    pub fn from_last(last_ms: Option<u64>) -> Self {
        match last_ms {
            Some(timestamp) => ExpectedPrevious::At(timestamp),
            None => ExpectedPrevious::Empty,
        }
    }

    pub fn matches(self, actual_ms: Option<u64>) -> bool {
        match self {
            ExpectedPrevious::Empty => actual_ms.is_none(),
            ExpectedPrevious::At(timestamp) => actual_ms == Some(timestamp),
        }
    }

    /// Relay wire form, where 0 stands for an empty log.
    pub fn as_wire_ms(self) -> u64 {
        match self {
            ExpectedPrevious::Empty => 0,
            ExpectedPrevious::At(timestamp) => timestamp,
        }
    }

    pub fn from_wire_ms(wire_ms: u64) -> Self {
        if wire_ms == 0 {
            ExpectedPrevious::Empty
        } else {
            ExpectedPrevious::At(wire_ms)
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("append to {target} raced another writer (expected previous {expected:?}, found {actual:?})")]
    Conflict {
        target: String,
        expected: Option<ExpectedPrevious>,
        actual: Option<u64>,
    },
    #[error("relay returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("relay transport error: {0}")]
    Transport(String),
    #[error("failed to decode relay response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    fn scope(&self) -> &StoreScope;

    async fn create_session(&self, name: &str) -> Result<Session, StoreError>;

    async fn create_record(
        &self,
        source: &str,
        data: Value,
        timestamp_ms: Option<u64>,
    ) -> Result<(), StoreError>;

    async fn batch_create_records(
        &self,
        source: &str,
        records: Vec<NewRecord>,
    ) -> Result<(), StoreError>;

    /// Records in timestamp order.
    async fn list_records(
        &self,
        source: &str,
        query: RecordQuery,
    ) -> Result<Vec<Record>, StoreError>;

    /// Appends a message. With `expected_previous` the append only succeeds if
    /// the target's newest message still matches it.
    async fn create_message(
        &self,
        target: &str,
        data: Value,
        expected_previous: Option<ExpectedPrevious>,
    ) -> Result<MessageReceipt, StoreError>;

    /// Messages in append order.
    async fn list_messages(&self, target: &str) -> Result<Vec<Message>, StoreError>;

    /// Consumes the oldest unread message for `target`.
    async fn get_next_message(&self, target: &str) -> Result<Option<Message>, StoreError>;
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_expectation_only_matches_an_empty_log() {
        assert!(ExpectedPrevious::Empty.matches(None));
        assert!(!ExpectedPrevious::Empty.matches(Some(7)));
        assert!(ExpectedPrevious::At(7).matches(Some(7)));
        assert!(!ExpectedPrevious::At(7).matches(None));
        assert_eq!(ExpectedPrevious::from_last(None), ExpectedPrevious::Empty);
        assert_eq!(ExpectedPrevious::from_wire_ms(0), ExpectedPrevious::Empty);
        assert_eq!(ExpectedPrevious::At(42).as_wire_ms(), 42);
    }
}
