//! Bus gateway API endpoints.
//!
//! The bus bridge delivers subscribed messages here and can read back what
//! the unit published. Payloads are opaque to this layer; the control loop
//! validates them.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::QueuedResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::gateway::{Inbound, OutboundMessage};
use crate::state::SharedState;

/// Creates the bus router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/messages", post(deliver_message))
        .route("/outbox", get(get_outbox))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// An inbound bus message.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "topic": "consultease/faculty/7/request",
    "payload": {
        "id": 42,
        "studentLabel": "Maria Santos",
        "message": "Question about the midterm"
    }
}))]
pub struct DeliverMessageRequest {
    /// Topic the message arrived on.
    #[schema(example = "consultease/faculty/7/request", min_length = 1)]
    pub topic: String,

    /// Message body. A JSON string is taken as the raw payload text; any
    /// other JSON value is forwarded as serialized.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

/// Recently published messages, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "capacity": 64,
    "messages": [
        {
            "sequence": 1,
            "topic": "consultease/faculty/7/status",
            "payload": {"present": true, "status": "AVAILABLE"},
            "published_at_utc": "2025-03-02T09:15:00Z"
        }
    ]
}))]
pub struct OutboxResponse {
    /// Maximum number of messages kept.
    #[schema(example = 64)]
    pub capacity: usize,

    /// Published messages.
    pub messages: Vec<OutboundMessage>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Deliver an inbound bus message.
#[utoipa::path(
    post,
    path = "/api/bus/messages",
    tag = "bus",
    operation_id = "deliverMessage",
    summary = "Deliver a subscribed bus message",
    description = "Queues a message for the control loop. Messages on topics other \
        than this unit's request topic are ignored. Malformed requests are \
        reported on the display, not here.",
    request_body = DeliverMessageRequest,
    responses(
        (status = 202, description = "Message queued", body = QueuedResponse),
        (status = 400, description = "Empty topic", body = super::ErrorResponse),
        (status = 503, description = "Control loop unavailable", body = super::ErrorResponse)
    )
)]
pub async fn deliver_message(
    State(state): State<SharedState>,
    Json(request): Json<DeliverMessageRequest>,
) -> ApiResult<(StatusCode, Json<QueuedResponse>)> {
    let topic = request.topic.trim();
    if topic.is_empty() {
        return Err(ApiError::BadRequest {
            error_code: "invalid_topic".to_string(),
            message: "Topic must not be empty".to_string(),
        });
    }

    let payload = match request.payload {
        serde_json::Value::String(raw) => raw.into_bytes(),
        other => other.to_string().into_bytes(),
    };

    state.submit(Inbound::BusMessage {
        topic: topic.to_string(),
        payload,
    })?;
    Ok(QueuedResponse::accepted("bus_message"))
}

/// Get recently published messages.
#[utoipa::path(
    get,
    path = "/api/bus/outbox",
    tag = "bus",
    operation_id = "getOutbox",
    summary = "Get recently published messages",
    description = "Returns the status, response and heartbeat messages this unit \
        published, oldest first. Older messages are dropped once the history is full.",
    responses(
        (status = 200, description = "Outbound history", body = OutboxResponse)
    )
)]
pub async fn get_outbox(State(state): State<SharedState>) -> Json<OutboxResponse> {
    Json(OutboxResponse {
        capacity: state.outbox_capacity(),
        messages: state.outbox(),
    })
}
