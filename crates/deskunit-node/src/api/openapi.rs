//! OpenAPI specification generation for the desk unit gateway.
//!
//! The generated document is consumed by the bus bridge and by operator
//! tooling that drives units without physical buttons.

use axum::Json;
use deskunit_core::{Availability, ButtonCommand, ConsultationStatus, PresenceSource, ScanMode};
use utoipa::OpenApi;

use super::bus::{DeliverMessageRequest, OutboxResponse};
use super::consultation::{ConsultationResponse, ConsultationView};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::presence::{OverrideRequest, PresenceResponse};
use super::QueuedResponse;
use crate::gateway::{OutboundMessage, PanelText};

/// Serve the OpenAPI specification as JSON.
///
/// This endpoint is available at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty JSON.
/// Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for the desk unit.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "deskunit API",
        version = "0.1.0",
        description = r#"
# deskunit API

A desk unit sits on a faculty member's desk, watches for their BLE beacon and
publishes their availability. Students send consultation requests through a
central system; the unit shows them and the faculty member answers with two
buttons.

## Overview

1. **Presence**: Debounced beacon presence, with a grace period that rides out
   short signal drops, and an optional manual override
2. **Consultation**: One tracked request and its lifecycle
   (pending, accepted, started, completed)
3. **Bus gateway**: Inbound delivery of subscribed messages and a history of
   what the unit published

## Timing

Writes are queued for a single control loop and answered with `202 Accepted`.
Read the affected resource afterwards to observe the result.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local desk unit")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "presence", description = "Reported availability and the manual override"),
        (name = "consultation", description = "Tracked consultation request and desk buttons"),
        (name = "display", description = "Desk panel text"),
        (name = "bus", description = "Message bus gateway")
    ),
    paths(
        super::health::health_check,
        super::presence::get_presence,
        super::presence::set_override,
        super::consultation::get_consultation,
        super::consultation::reset_consultation,
        super::consultation::press_button,
        super::panel::get_display,
        super::bus::deliver_message,
        super::bus::get_outbox,
    ),
    components(
        schemas(
            ErrorResponse,
            QueuedResponse,
            HealthResponse,
            PresenceResponse,
            OverrideRequest,
            Availability,
            PresenceSource,
            ScanMode,
            ConsultationResponse,
            ConsultationView,
            ConsultationStatus,
            ButtonCommand,
            PanelText,
            DeliverMessageRequest,
            OutboxResponse,
            OutboundMessage,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "deskunit API");
        assert!(spec.paths.paths.contains_key("/api/commands/{button}"));
        assert!(spec.paths.paths.contains_key("/api/bus/messages"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"deskunit API\""));
    }
}
