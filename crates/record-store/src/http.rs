use crate::{
    ExpectedPrevious, Message, MessageReceipt, NewRecord, Record, RecordQuery, RecordStore,
    Session, StoreError, StoreScope,
};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const HTTP_IO_TIMEOUT: Duration = Duration::from_secs(10);
static HTTP_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Relay client speaking JSON over HTTP.
pub struct HttpStore {
    client: Client,
    base_url: Url,
    scope: StoreScope,
}

impl HttpStore {
    pub fn new(base_url: &str, scope: StoreScope) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| StoreError::Transport(format!("invalid relay url {base_url}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Transport(format!(
                "relay url {base_url} cannot carry a path"
            )));
        }
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_IO_TIMEOUT)
            .build()
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url,
            scope,
        })
    }

    /// `{base}/stations/{station}[/sessions/{session}]/{tail...}`
    fn url(&self, tail: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.push("stations").push(&self.scope.station_id);
            if let Some(session_id) = &self.scope.session_id {
                segments.push("sessions").push(session_id);
            }
            segments.extend(tail);
        }
        url
    }

    fn sessions_url(&self) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("stations")
                .push(&self.scope.station_id)
                .push("sessions");
        }
        url
    }

    async fn send<B, T>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T, StoreError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request_id = HTTP_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            event = "relay.request.start",
            request_id,
            method = %method,
            url = %url,
            "relay request"
        );
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|err| {
            tracing::warn!(
                event = "relay.request.failed",
                request_id,
                method = %method,
                timeout = err.is_timeout(),
                connect = err.is_connect(),
                error = %err,
                "relay request failed"
            );
            StoreError::Transport(err.to_string())
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        tracing::debug!(
            event = "relay.request.done",
            request_id,
            status = status.as_u16(),
            body_len = text.len(),
            "relay response"
        );
        if !status.is_success() {
            return Err(status_error(status, text, &url));
        }
        let text = if text.trim().is_empty() {
            "null"
        } else {
            text.as_str()
        };
        serde_json::from_str(text).map_err(|err| StoreError::Decode(err.to_string()))
    }
}

fn status_error(status: StatusCode, body: String, url: &Url) -> StoreError {
    if status == StatusCode::CONFLICT {
        let detail: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        let target = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string();
        return StoreError::Conflict {
            target,
            expected: detail
                .get("expected")
                .and_then(Value::as_u64)
                .map(ExpectedPrevious::from_wire_ms),
            actual: detail.get("actual").and_then(Value::as_u64),
        };
    }
    StoreError::Status {
        status: status.as_u16(),
        body,
    }
}

fn message_body(data: Value, expected_previous: Option<ExpectedPrevious>) -> Value {
    json!({
        "data": data,
        "expected_previous_ms": expected_previous.map(ExpectedPrevious::as_wire_ms),
    })
}

fn query_pairs(query: &RecordQuery) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if let Some(start) = query.range_start_ms {
        pairs.push(("range_start", start.to_string()));
    }
    if let Some(end) = query.range_end_ms {
        pairs.push(("range_end", end.to_string()));
    }
    if let Some(take) = query.take {
        pairs.push(("take", take.to_string()));
    }
    pairs
}

#[async_trait]
impl RecordStore for HttpStore {
    fn scope(&self) -> &StoreScope {
        &self.scope
    }

    async fn create_session(&self, name: &str) -> Result<Session, StoreError> {
        self.send(Method::POST, self.sessions_url(), Some(&json!({ "name": name })))
            .await
    }

    async fn create_record(
        &self,
        source: &str,
        data: Value,
        timestamp_ms: Option<u64>,
    ) -> Result<(), StoreError> {
        let body = NewRecord { data, timestamp_ms };
        let _: Value = self
            .send(Method::POST, self.url(&["records", source]), Some(&body))
            .await?;
        Ok(())
    }

    async fn batch_create_records(
        &self,
        source: &str,
        records: Vec<NewRecord>,
    ) -> Result<(), StoreError> {
        let _: Value = self
            .send(
                Method::POST,
                self.url(&["records", source, "batch"]),
                Some(&records),
            )
            .await?;
        Ok(())
    }

    async fn list_records(
        &self,
        source: &str,
        query: RecordQuery,
    ) -> Result<Vec<Record>, StoreError> {
        let mut url = self.url(&["records", source]);
        let pairs = query_pairs(&query);
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        self.send::<(), _>(Method::GET, url, None).await
    }

    async fn create_message(
        &self,
        target: &str,
        data: Value,
        expected_previous: Option<ExpectedPrevious>,
    ) -> Result<MessageReceipt, StoreError> {
        let body = message_body(data, expected_previous);
        self.send(Method::POST, self.url(&["messages", target]), Some(&body))
            .await
    }

    async fn list_messages(&self, target: &str) -> Result<Vec<Message>, StoreError> {
        self.send::<(), _>(Method::GET, self.url(&["messages", target]), None)
            .await
    }

    async fn get_next_message(&self, target: &str) -> Result<Option<Message>, StoreError> {
        self.send::<(), _>(
            Method::POST,
            self.url(&["messages", target, "next"]),
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_carry_station_and_session() {
        let store = HttpStore::new(
            "http://relay.local:8080/api/",
            StoreScope::new("pad a", Some("s-1".to_string())),
        )
        .expect("store");
        assert_eq!(
            store.url(&["messages", "mission_commands"]).as_str(),
            "http://relay.local:8080/api/stations/pad%20a/sessions/s-1/messages/mission_commands"
        );
        assert_eq!(
            store.sessions_url().as_str(),
            "http://relay.local:8080/api/stations/pad%20a/sessions"
        );
    }

    #[test]
    fn urls_without_session_skip_segment() {
        let store = HttpStore::new("http://relay.local", StoreScope::new("pad-a", None))
            .expect("store");
        assert_eq!(
            store.url(&["records", "gps", "batch"]).as_str(),
            "http://relay.local/stations/pad-a/records/gps/batch"
        );
    }

    #[test]
    fn conflict_status_maps_to_conflict() {
        let url = Url::parse("http://relay.local/stations/a/messages/mission_commands")
            .expect("url");
        let err = status_error(
            StatusCode::CONFLICT,
            r#"{"expected":10,"actual":12}"#.to_string(),
            &url,
        );
        assert!(matches!(
            err,
            StoreError::Conflict {
                ref target,
                expected: Some(ExpectedPrevious::At(10)),
                actual: Some(12),
            } if target == "mission_commands"
        ));
        let err = status_error(
            StatusCode::CONFLICT,
            r#"{"expected":0,"actual":12}"#.to_string(),
            &url,
        );
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: Some(ExpectedPrevious::Empty),
                ..
            }
        ));
        let err = status_error(StatusCode::BAD_GATEWAY, "down".to_string(), &url);
        assert!(matches!(err, StoreError::Status { status: 502, .. }));
    }

    #[test]
    fn message_body_sends_zero_for_an_empty_log() {
        let body = message_body(json!({"a": 1}), Some(ExpectedPrevious::Empty));
        assert_eq!(body["expected_previous_ms"], json!(0));
        let body = message_body(json!({"a": 1}), Some(ExpectedPrevious::At(55)));
        assert_eq!(body["expected_previous_ms"], json!(55));
        let body = message_body(json!({"a": 1}), None);
        assert!(body["expected_previous_ms"].is_null());
    }

    #[test]
    fn record_query_uses_relay_names() {
        let pairs = query_pairs(&RecordQuery {
            range_start_ms: Some(5),
            range_end_ms: None,
            take: Some(100),
        });
        assert_eq!(
            pairs,
            vec![("range_start", "5".to_string()), ("take", "100".to_string())]
        );
    }

    #[test]
    fn rejects_unparseable_base() {
        assert!(matches!(
            HttpStore::new("not a url", StoreScope::new("a", None)),
            Err(StoreError::Transport(_))
        ));
    }
}
