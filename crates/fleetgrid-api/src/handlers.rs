//! REST API handlers.
//!
//! Each handler calls one `FleetManager` operation and maps its
//! `FleetError` onto an HTTP status.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fleetgrid_manager::FleetError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    /// Status code the hosting panel answered with, when it caused the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    panel_status: Option<u16>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            panel_status: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            panel_status: None,
        }),
    )
        .into_response()
}

pub(crate) fn status_for(err: &FleetError) -> StatusCode {
    match err {
        FleetError::NotFound(_) => StatusCode::NOT_FOUND,
        FleetError::InvalidState(_) => StatusCode::CONFLICT,
        FleetError::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
        FleetError::Provisioning(_) | FleetError::Panel(_) => StatusCode::BAD_GATEWAY,
    }
}

fn fleet_error(err: FleetError) -> Response {
    let status = status_for(&err);
    debug!(error = %err, status = status.as_u16(), "request failed");
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(err.to_string()),
            panel_status: err.panel_status(),
        }),
    )
        .into_response()
}

// ── Players ────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct JoinRequest {
    pub preferred_instance_id: Option<String>,
}

/// POST /api/v1/players/{player_id}/join
pub async fn join(
    State(state): State<ApiState>,
    Path(player_id): Path<String>,
    body: Option<Json<JoinRequest>>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    if player_id.trim().is_empty() {
        return error_response("player id is empty", StatusCode::BAD_REQUEST);
    }
    match state
        .manager
        .join(&player_id, req.preferred_instance_id.as_deref())
        .await
    {
        Ok(ticket) => ApiResponse::ok(ticket).into_response(),
        Err(e) => fleet_error(e),
    }
}

/// DELETE /api/v1/players/{player_id}
pub async fn leave(State(state): State<ApiState>, Path(player_id): Path<String>) -> Response {
    state.manager.leave(&player_id).await;
    ApiResponse::ok("left").into_response()
}

/// GET /api/v1/queue
pub async fn list_queue(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.manager.admission().entries()).into_response()
}

// ── Instances ──────────────────────────────────────────────────

/// GET /api/v1/instances
pub async fn list_instances(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.manager.list_instances()).into_response()
}

/// GET /api/v1/instances/{id}
pub async fn get_instance(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.manager.get_instance(&id) {
        Ok(summary) => ApiResponse::ok(summary).into_response(),
        Err(e) => fleet_error(e),
    }
}

/// POST /api/v1/instances
pub async fn create_instance(State(state): State<ApiState>) -> Response {
    match state.manager.create_instance().await {
        Ok(summary) => (StatusCode::CREATED, ApiResponse::ok(summary)).into_response(),
        Err(e) => fleet_error(e),
    }
}

/// POST /api/v1/instances/{id}/start
pub async fn start_instance(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.manager.start_instance(&id).await {
        Ok(()) => instance_after_action(&state, &id),
        Err(e) => fleet_error(e),
    }
}

/// POST /api/v1/instances/{id}/stop
pub async fn stop_instance(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.manager.stop_instance(&id).await {
        Ok(()) => instance_after_action(&state, &id),
        Err(e) => fleet_error(e),
    }
}

fn instance_after_action(state: &ApiState, id: &str) -> Response {
    match state.manager.get_instance(id) {
        Ok(summary) => ApiResponse::ok(summary).into_response(),
        // Deleted concurrently.
        Err(_) => ApiResponse::ok("ok").into_response(),
    }
}

/// DELETE /api/v1/instances/{id}
pub async fn delete_instance(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.manager.delete_instance(&id).await {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => fleet_error(e),
    }
}

/// Occupancy report body.
#[derive(Debug, Deserialize)]
pub struct PlayersReport {
    pub players: u32,
}

/// POST /api/v1/instances/{id}/players
pub async fn report_players(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(report): Json<PlayersReport>,
) -> Response {
    match state.manager.report_players(&id, report.players) {
        Ok(summary) => ApiResponse::ok(summary).into_response(),
        Err(e) => fleet_error(e),
    }
}

// ── Fleet ──────────────────────────────────────────────────────

/// Scale request body.
#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub target: u32,
}

/// POST /api/v1/fleet/scale
pub async fn scale_fleet(
    State(state): State<ApiState>,
    Json(req): Json<ScaleRequest>,
) -> Response {
    match state.manager.scale_to(req.target).await {
        Ok(summary) => ApiResponse::ok(summary).into_response(),
        Err(e) => fleet_error(e),
    }
}

/// GET /api/v1/fleet/status
pub async fn fleet_status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.manager.status()).into_response()
}

/// POST /api/v1/fleet/reconcile
pub async fn reconcile(State(state): State<ApiState>) -> Response {
    match state.manager.reconcile().await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => fleet_error(e),
    }
}
