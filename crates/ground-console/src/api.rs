use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mission_protocol::control::{
    ActionResponse, CanApplyResponse, DispatchRequest, ManualMessageBatchRequest,
    ManualMessageRequest, SignalSample, SyncView,
};
use mission_protocol::station::StationRecord;
use mission_protocol::Command;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::events::ConsoleEvent;
use crate::mission::{DispatchError, MissionControl, MissionView};
use crate::sync::{SyncHandle, SyncRequest};
use crate::telemetry::Telemetry;

const DEFAULT_DELTA_TOLERANCE_MS: u64 = 2_000;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) mission: Arc<MissionControl>,
    pub(crate) sync: SyncHandle,
    pub(crate) telemetry: Telemetry,
    pub(crate) event_tx: broadcast::Sender<ConsoleEvent>,
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/mission", get(get_mission))
        .route("/mission/history", get(get_history))
        .route("/mission/can-apply", post(can_apply))
        .route("/mission/dispatch", post(dispatch))
        .route("/mission/manual-message", post(manual_message))
        .route("/mission/manual-message/batch", post(manual_message_batch))
        .route("/sync", get(get_sync))
        .route("/sync/resync", post(resync))
        .route("/sync/retry", post(retry))
        .route("/telemetry/latest", get(latest_telemetry))
        .route("/telemetry/station", get(station_mirror))
        .route("/telemetry/delta", get(pressure_delta))
        .route("/telemetry/signals/:signal", get(signal_range))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(middleware::from_fn(log_http_request))
}

async fn health() -> &'static str {
    "ok"
}

async fn log_http_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let response = next.run(req).await;
    tracing::info!(
        event = "http.request",
        method = %method,
        uri = %uri,
        status = %response.status(),
        "http request"
    );
    response
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn dispatch_error(err: DispatchError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        DispatchError::Illegal(_) => StatusCode::CONFLICT,
        DispatchError::NotSynced(_) => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::InvalidMessage(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

async fn get_mission(State(state): State<AppState>) -> Json<MissionView> {
    Json(state.mission.view())
}

async fn get_history(State(state): State<AppState>) -> Json<Vec<Command>> {
    Json(state.mission.history())
}

async fn can_apply(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Json<CanApplyResponse> {
    Json(CanApplyResponse {
        legal: state.mission.can_apply(&request.command),
    })
}

async fn dispatch(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<MissionView>, (StatusCode, Json<ErrorResponse>)> {
    let snapshot = state
        .mission
        .dispatch(request.command)
        .map_err(dispatch_error)?;
    Ok(Json(MissionView::from_snapshot(&snapshot)))
}

async fn manual_message(
    State(state): State<AppState>,
    Json(request): Json<ManualMessageRequest>,
) -> Result<Json<MissionView>, (StatusCode, Json<ErrorResponse>)> {
    let snapshot = state
        .mission
        .dispatch_manual_message(&request.target, &request.payload)
        .map_err(dispatch_error)?;
    Ok(Json(MissionView::from_snapshot(&snapshot)))
}

async fn manual_message_batch(
    State(state): State<AppState>,
    Json(request): Json<ManualMessageBatchRequest>,
) -> Result<Json<MissionView>, (StatusCode, Json<ErrorResponse>)> {
    let snapshot = state
        .mission
        .dispatch_manual_batch(&request.payload)
        .map_err(dispatch_error)?;
    Ok(Json(MissionView::from_snapshot(&snapshot)))
}

async fn get_sync(State(state): State<AppState>) -> Json<SyncView> {
    Json(state.sync.view())
}

async fn resync(State(state): State<AppState>) -> Result<Json<ActionResponse>, StatusCode> {
    queue_request(&state, SyncRequest::Resync, "resync queued")
}

async fn retry(State(state): State<AppState>) -> Result<Json<ActionResponse>, StatusCode> {
    queue_request(&state, SyncRequest::RetryBlockingSync, "retry queued")
}

fn queue_request(
    state: &AppState,
    request: SyncRequest,
    message: &str,
) -> Result<Json<ActionResponse>, StatusCode> {
    if !state.sync.request(request) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(ActionResponse {
        message: message.to_string(),
    }))
}

#[derive(Serialize)]
struct LatestTelemetry {
    signals: BTreeMap<String, SignalSample>,
    dropped_records: u64,
}

async fn latest_telemetry(State(state): State<AppState>) -> Json<LatestTelemetry> {
    Json(LatestTelemetry {
        signals: state.telemetry.latest().await,
        dropped_records: state.telemetry.dropped().await,
    })
}

async fn station_mirror(
    State(state): State<AppState>,
) -> Result<Json<StationRecord>, StatusCode> {
    state
        .telemetry
        .station()
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
struct RangeParams {
    start: Option<u64>,
    end: Option<u64>,
}

async fn signal_range(
    Path(signal): Path<String>,
    Query(params): Query<RangeParams>,
    State(state): State<AppState>,
) -> Json<Vec<SignalSample>> {
    Json(
        state
            .telemetry
            .range(&signal, params.start, params.end)
            .await,
    )
}

#[derive(Deserialize)]
struct DeltaParams {
    upstream: String,
    downstream: String,
    tolerance_ms: Option<u64>,
}

#[derive(Serialize)]
struct DeltaResponse {
    delta_psi: Option<f64>,
}

async fn pressure_delta(
    Query(params): Query<DeltaParams>,
    State(state): State<AppState>,
) -> Json<DeltaResponse> {
    let delta_psi = state
        .telemetry
        .pressure_delta(
            &params.upstream,
            &params.downstream,
            params.tolerance_ms.unwrap_or(DEFAULT_DELTA_TOLERANCE_MS),
        )
        .await;
    Json(DeltaResponse { delta_psi })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();
    let first = ConsoleEvent::MissionSnapshot {
        mission: state.mission.view(),
        sync: state.sync.view(),
    };
    if send_ws_event(&mut socket, first).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if send_ws_event(&mut socket, event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(event = "ws.lagged", skipped, "websocket subscriber lagged");
                        continue;
                    }
                    Err(_) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

async fn send_ws_event(socket: &mut WebSocket, event: ConsoleEvent) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(&event) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize websocket event");
            return Ok(());
        }
    };
    socket.send(Message::Text(payload)).await
}
