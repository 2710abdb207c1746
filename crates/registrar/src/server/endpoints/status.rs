use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use crate::types::RegistrarState;

/// GET /health
pub async fn get_health(State(s): State<Arc<RegistrarState>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "tracked_students": s.engine.tracked_students(),
        })),
    )
        .into_response()
}
