//! Presence API endpoints.
//!
//! Exposes what the unit reports to the bus and lets an operator pin the
//! reported availability with a manual override. The override sits on top of
//! the beacon detector; clearing it hands control back to the detector.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use deskunit_core::{Availability, PresenceSource, ScanMode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::QueuedResponse;
use crate::api::error::ApiResult;
use crate::gateway::Inbound;
use crate::state::SharedState;

/// Creates the presence router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/presence", get(get_presence))
        .route("/override", put(set_override))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Reported availability and detector state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "present": true,
    "status": "AVAILABLE",
    "source": "ble",
    "manual_override": null,
    "in_grace_period": false,
    "grace_remaining_ms": null,
    "consecutive_detections": 4,
    "consecutive_misses": 0,
    "scan_mode": "MONITORING"
}))]
pub struct PresenceResponse {
    /// Availability as published on the status topic.
    #[schema(example = true)]
    pub present: bool,

    /// Same as `present`, in bus vocabulary.
    pub status: Availability,

    /// Whether the value comes from the beacon or the override.
    pub source: PresenceSource,

    /// Active manual override, if any.
    #[schema(nullable, example = json!(null))]
    pub manual_override: Option<bool>,

    /// Whether the detector is holding presence through a grace period.
    #[schema(example = false)]
    pub in_grace_period: bool,

    /// Time left in the grace period.
    #[schema(nullable, example = json!(null))]
    pub grace_remaining_ms: Option<u64>,

    /// Consecutive qualifying beacon sightings.
    #[schema(example = 4)]
    pub consecutive_detections: u32,

    /// Consecutive scans without the beacon.
    #[schema(example = 0)]
    pub consecutive_misses: u32,

    /// Current scan cadence.
    pub scan_mode: ScanMode,
}

/// Request body for the manual override.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({ "present": false }))]
pub struct OverrideRequest {
    /// `true` or `false` pins availability. `null` clears the override.
    #[schema(nullable)]
    pub present: Option<bool>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get reported availability.
#[utoipa::path(
    get,
    path = "/api/presence",
    tag = "presence",
    operation_id = "getPresence",
    summary = "Get reported availability",
    description = "Returns the availability this unit publishes, where it comes from, \
        and the detector counters behind it. Values reflect the last pass of the \
        control loop.",
    responses(
        (status = 200, description = "Current availability", body = PresenceResponse)
    )
)]
pub async fn get_presence(State(state): State<SharedState>) -> Json<PresenceResponse> {
    let snapshot = state.snapshot();
    let presence = snapshot.presence;

    Json(PresenceResponse {
        present: snapshot.reported_present,
        status: Availability::from_present(snapshot.reported_present),
        source: snapshot.source,
        manual_override: snapshot.manual_override,
        in_grace_period: presence.in_grace_period,
        grace_remaining_ms: presence
            .grace_remaining
            .map(|remaining| remaining.as_millis().try_into().unwrap_or(u64::MAX)),
        consecutive_detections: presence.consecutive_detections,
        consecutive_misses: presence.consecutive_misses,
        scan_mode: snapshot.scan_mode,
    })
}

/// Set or clear the manual override.
#[utoipa::path(
    put,
    path = "/api/override",
    tag = "presence",
    operation_id = "setOverride",
    summary = "Set or clear the manual presence override",
    description = "Queues an override for the control loop. A status message is \
        published if the reported availability changes.",
    request_body = OverrideRequest,
    responses(
        (status = 202, description = "Override queued", body = QueuedResponse),
        (status = 503, description = "Control loop unavailable", body = super::ErrorResponse)
    )
)]
pub async fn set_override(
    State(state): State<SharedState>,
    Json(request): Json<OverrideRequest>,
) -> ApiResult<(StatusCode, Json<QueuedResponse>)> {
    state.submit(Inbound::Override(request.present))?;
    Ok(QueuedResponse::accepted("override"))
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use serde_json::json;

    use super::*;
    use crate::api::create_router;
    use crate::api::test_support::Harness;

    #[tokio::test]
    async fn test_presence_defaults_to_away() {
        let harness = Harness::new();
        let server = TestServer::new(create_router(harness.state.clone())).unwrap();

        let response = server.get("/api/presence").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["present"], false);
        assert_eq!(body["status"], "AWAY");
        assert_eq!(body["source"], "ble");
        assert_eq!(body["scan_mode"], "SEARCHING");
    }

    #[tokio::test]
    async fn test_presence_reflects_override() {
        let mut harness = Harness::new();
        harness.unit.set_manual_override(Some(true));
        harness.sync();
        let server = TestServer::new(create_router(harness.state.clone())).unwrap();

        let body: serde_json::Value = server.get("/api/presence").await.json();
        assert_eq!(body["present"], true);
        assert_eq!(body["status"], "AVAILABLE");
        assert_eq!(body["source"], "manual");
        assert_eq!(body["manual_override"], true);
    }

    #[tokio::test]
    async fn test_override_is_queued() {
        let mut harness = Harness::new();
        let server = TestServer::new(create_router(harness.state.clone())).unwrap();

        let response = server
            .put("/api/override")
            .json(&json!({ "present": false }))
            .await;
        response.assert_status(StatusCode::ACCEPTED);
        assert_eq!(harness.inbox.try_recv().unwrap(), Inbound::Override(Some(false)));

        server
            .put("/api/override")
            .json(&json!({ "present": null }))
            .await
            .assert_status(StatusCode::ACCEPTED);
        assert_eq!(harness.inbox.try_recv().unwrap(), Inbound::Override(None));
    }

    #[tokio::test]
    async fn test_override_rejected_when_inbox_full() {
        let harness = Harness::with_inbox(1);
        let server = TestServer::new(create_router(harness.state.clone())).unwrap();

        server
            .put("/api/override")
            .json(&json!({ "present": true }))
            .await
            .assert_status(StatusCode::ACCEPTED);

        let response = server
            .put("/api/override")
            .json(&json!({ "present": false }))
            .await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "inbox_full");
    }
}
