//! Display panel API endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::gateway::PanelText;
use crate::state::SharedState;

/// Creates the panel router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/display", get(get_display))
}

/// Get the panel text.
#[utoipa::path(
    get,
    path = "/api/display",
    tag = "display",
    operation_id = "getDisplay",
    summary = "Get what the desk display shows",
    description = "Returns the status line and the message area as last written \
        by the control loop.",
    responses(
        (status = 200, description = "Panel text", body = PanelText)
    )
)]
pub async fn get_display(State(state): State<SharedState>) -> Json<PanelText> {
    Json(state.panel())
}
