//! Advisor endpoints: single and batch decisions, pending queue.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::db::{AdvisorId, SectionId, StudentId};
use crate::engine::{ApprovalError, Decision, DecisionRequest};
use crate::server::types::ApiErrorType;
use crate::types::RegistrarState;

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub decision: Decision,
}

#[derive(Debug, Deserialize)]
pub struct BatchDecisionBody {
    pub decision: Decision,
    pub requests: Vec<DecisionRequest>,
}

fn approval_error_to_response(error: ApprovalError) -> Response {
    let (status, message) = match &error {
        ApprovalError::RecordNotFound => (StatusCode::NOT_FOUND, "No such enrollment request"),
        ApprovalError::NotPending { .. } => (StatusCode::CONFLICT, "Request already decided"),
        ApprovalError::Unauthorized { .. } => {
            (StatusCode::FORBIDDEN, "Advisor does not teach this section")
        }
        ApprovalError::Ledger(_) | ApprovalError::Store(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to record decision")
        }
    };

    ApiErrorType::from((status, message, Some(error.to_string()))).into_response()
}

/// POST /advisors/:advisor/students/:student/sections/:section/decision
///
/// Body: `{ "decision": "approve" | "reject" }`.
pub async fn post_decision(
    Path((advisor, student, section)): Path<(i64, i64, i64)>,
    State(s): State<Arc<RegistrarState>>,
    Json(body): Json<DecisionBody>,
) -> Response {
    info!(
        "POST /advisors/{}/students/{}/sections/{}/decision ({:?})",
        advisor, student, section, body.decision
    );

    match s
        .engine
        .decide(
            StudentId(student),
            SectionId(section),
            body.decision,
            AdvisorId(advisor),
        )
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            if matches!(e, ApprovalError::Ledger(_) | ApprovalError::Store(_)) {
                error!("Decision by advisor {} failed: {}", advisor, e);
            }
            approval_error_to_response(e)
        }
    }
}

/// POST /advisors/:advisor/decisions
///
/// Applies one decision to many requests. Always answers 200 with a
/// per-request outcome; a failing request never blocks the others.
pub async fn post_batch_decision(
    Path(advisor): Path<i64>,
    State(s): State<Arc<RegistrarState>>,
    Json(body): Json<BatchDecisionBody>,
) -> Response {
    info!(
        "POST /advisors/{}/decisions ({:?}, {} requests)",
        advisor,
        body.decision,
        body.requests.len()
    );

    let report = s
        .engine
        .decide_batch(AdvisorId(advisor), body.decision, &body.requests)
        .await;

    (StatusCode::OK, Json(report)).into_response()
}

/// GET /advisors/:advisor/pending
pub async fn get_pending(
    Path(advisor): Path<i64>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("GET /advisors/{}/pending", advisor);

    match s.engine.list_pending_for_advisor(AdvisorId(advisor)) {
        Ok(groups) => (StatusCode::OK, Json(groups)).into_response(),
        Err(e) => ApiErrorType::from((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch pending requests",
            Some(e.to_string()),
        ))
        .into_response(),
    }
}
