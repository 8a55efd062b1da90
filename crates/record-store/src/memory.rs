use crate::{
    now_ms, ExpectedPrevious, Message, MessageReceipt, NewRecord, Record, RecordQuery, RecordStore, Session,
    StoreError, StoreScope,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type StreamKey = (StoreScope, String);

#[derive(Default)]
struct MemoryState {
    last_timestamp_ms: u64,
    sessions: Vec<(String, Session)>,
    records: HashMap<StreamKey, Vec<Record>>,
    messages: HashMap<StreamKey, Vec<Message>>,
    cursors: HashMap<StreamKey, usize>,
}

impl MemoryState {
    fn next_timestamp(&mut self) -> u64 {
        let timestamp = now_ms().max(self.last_timestamp_ms + 1);
        self.last_timestamp_ms = timestamp;
        timestamp
    }

    fn insert_record(&mut self, key: StreamKey, data: Value, timestamp_ms: Option<u64>) {
        let timestamp_ms = match timestamp_ms {
            Some(timestamp) => timestamp,
            None => self.next_timestamp(),
        };
        let record = Record {
            source: key.1.clone(),
            timestamp_ms,
            data,
        };
        let stream = self.records.entry(key).or_default();
        let index = stream.partition_point(|existing| existing.timestamp_ms <= timestamp_ms);
        stream.insert(index, record);
    }
}

/// In-process relay with the same ordering and compare-and-append rules as the
/// real service. Clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    scope: StoreScope,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new(scope: StoreScope) -> Self {
        Self {
            scope,
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// A handle on the same data addressed to another session.
    pub fn with_session(&self, session_id: impl Into<String>) -> Self {
        Self {
            scope: self.scope.with_session(session_id),
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(&self, name: &str) -> StreamKey {
        (self.scope.clone(), name.to_string())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn scope(&self) -> &StoreScope {
        &self.scope
    }

    async fn create_session(&self, name: &str) -> Result<Session, StoreError> {
        let mut state = self.lock();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            created_at_ms: state.next_timestamp(),
            name: name.to_string(),
        };
        state
            .sessions
            .push((self.scope.station_id.clone(), session.clone()));
        Ok(session)
    }

    async fn create_record(
        &self,
        source: &str,
        data: Value,
        timestamp_ms: Option<u64>,
    ) -> Result<(), StoreError> {
        let key = self.key(source);
        self.lock().insert_record(key, data, timestamp_ms);
        Ok(())
    }

    async fn batch_create_records(
        &self,
        source: &str,
        records: Vec<NewRecord>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        for record in records {
            state.insert_record(self.key(source), record.data, record.timestamp_ms);
        }
        Ok(())
    }

    async fn list_records(
        &self,
        source: &str,
        query: RecordQuery,
    ) -> Result<Vec<Record>, StoreError> {
        let state = self.lock();
        let Some(stream) = state.records.get(&self.key(source)) else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<Record> = stream
            .iter()
            .filter(|record| {
                query
                    .range_start_ms
                    .map(|start| record.timestamp_ms >= start)
                    .unwrap_or(true)
                    && query
                        .range_end_ms
                        .map(|end| record.timestamp_ms <= end)
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        if let Some(take) = query.take {
            if matched.len() > take {
                matched.drain(..matched.len() - take);
            }
        }
        Ok(matched)
    }

    async fn create_message(
        &self,
        target: &str,
        data: Value,
        expected_previous: Option<ExpectedPrevious>,
    ) -> Result<MessageReceipt, StoreError> {
        let mut state = self.lock();
        let key = self.key(target);
        let actual = state
            .messages
            .get(&key)
            .and_then(|messages| messages.last())
            .map(|message| message.received_at_ms);
        if let Some(expected) = expected_previous {
            if !expected.matches(actual) {
                return Err(StoreError::Conflict {
                    target: target.to_string(),
                    expected: Some(expected),
                    actual,
                });
            }
        }
        let received_at_ms = state.next_timestamp();
        state.messages.entry(key).or_default().push(Message {
            target: target.to_string(),
            received_at_ms,
            data,
        });
        Ok(MessageReceipt { received_at_ms })
    }

    async fn list_messages(&self, target: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .lock()
            .messages
            .get(&self.key(target))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_next_message(&self, target: &str) -> Result<Option<Message>, StoreError> {
        let mut state = self.lock();
        let key = self.key(target);
        let cursor = state.cursors.get(&key).copied().unwrap_or(0);
        let next = state
            .messages
            .get(&key)
            .and_then(|messages| messages.get(cursor))
            .cloned();
        if next.is_some() {
            state.cursors.insert(key, cursor + 1);
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new(StoreScope::new("pad-a", Some("hotfire".to_string())))
    }

    #[tokio::test]
    async fn records_are_listed_in_timestamp_order() {
        let store = store();
        store
            .create_record("gps", json!({"n": 2}), Some(200))
            .await
            .expect("record");
        store
            .batch_create_records(
                "gps",
                vec![
                    NewRecord {
                        data: json!({"n": 3}),
                        timestamp_ms: Some(300),
                    },
                    NewRecord {
                        data: json!({"n": 1}),
                        timestamp_ms: Some(100),
                    },
                ],
            )
            .await
            .expect("batch");

        let all = store
            .list_records("gps", RecordQuery::default())
            .await
            .expect("list");
        let order: Vec<u64> = all.iter().map(|record| record.timestamp_ms).collect();
        assert_eq!(order, vec![100, 200, 300]);

        let recent = store
            .list_records(
                "gps",
                RecordQuery {
                    range_start_ms: Some(150),
                    take: Some(1),
                    ..RecordQuery::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].data, json!({"n": 3}));
    }

    #[tokio::test]
    async fn conditional_append_detects_race() {
        let store = store();
        let first = store
            .create_message("mission_commands", json!(1), None)
            .await
            .expect("first");
        let second = store
            .create_message(
                "mission_commands",
                json!(2),
                Some(ExpectedPrevious::At(first.received_at_ms)),
            )
            .await
            .expect("second");
        assert!(second.received_at_ms > first.received_at_ms);

        let err = store
            .create_message(
                "mission_commands",
                json!(3),
                Some(ExpectedPrevious::At(first.received_at_ms)),
            )
            .await
            .expect_err("stale marker");
        assert!(matches!(
            err,
            StoreError::Conflict { actual: Some(actual), .. } if actual == second.received_at_ms
        ));
        assert_eq!(
            store
                .list_messages("mission_commands")
                .await
                .expect("list")
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn empty_expectation_rejects_a_log_written_meanwhile() {
        let store = store();
        let other = store
            .create_message("mission_commands", json!("other console"), None)
            .await
            .expect("other");
        let err = store
            .create_message(
                "mission_commands",
                json!("ours"),
                Some(ExpectedPrevious::Empty),
            )
            .await
            .expect_err("log is no longer empty");
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: Some(ExpectedPrevious::Empty),
                actual: Some(actual),
                ..
            } if actual == other.received_at_ms
        ));

        let fresh = store
            .create_message("station_log", json!("first"), Some(ExpectedPrevious::Empty))
            .await;
        assert!(fresh.is_ok());
    }

    #[tokio::test]
    async fn next_message_is_consumed_once() {
        let store = store();
        store
            .create_message("firing_station", json!("a"), None)
            .await
            .expect("a");
        store
            .create_message("firing_station", json!("b"), None)
            .await
            .expect("b");
        let first = store
            .get_next_message("firing_station")
            .await
            .expect("next")
            .expect("message");
        assert_eq!(first.data, json!("a"));
        let second = store
            .get_next_message("firing_station")
            .await
            .expect("next")
            .expect("message");
        assert_eq!(second.data, json!("b"));
        assert!(store
            .get_next_message("firing_station")
            .await
            .expect("next")
            .is_none());
    }

    #[tokio::test]
    async fn sessions_do_not_share_streams() {
        let store = store();
        let session = store.create_session("second attempt").await.expect("session");
        let other = store.with_session(session.id);
        other
            .create_message("mission_commands", json!(1), None)
            .await
            .expect("append");
        assert!(store
            .list_messages("mission_commands")
            .await
            .expect("list")
            .is_empty());
    }
}
