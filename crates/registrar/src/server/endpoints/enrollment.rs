//! Student-facing endpoints: enroll, schedule, conflict check, reset.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::db::{SectionId, SemesterId, StudentId};
use crate::engine::{CheckError, EnrollError, ResetError};
use crate::server::types::ApiErrorType;
use crate::types::RegistrarState;

#[derive(Debug, Deserialize)]
pub struct EnrollBody {
    pub section_ids: Vec<SectionId>,
    /// Overrides the configured time budget for this request
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn enroll_error_to_response(error: EnrollError) -> Response {
    let (status, message) = match &error {
        EnrollError::EmptyRequest | EnrollError::RepeatedSection { .. } => {
            (StatusCode::BAD_REQUEST, "Malformed enrollment request")
        }
        EnrollError::SectionNotFound { .. } => (StatusCode::NOT_FOUND, "Section not offered"),
        EnrollError::DuplicateEnrollment { .. } => {
            (StatusCode::CONFLICT, "Already enrolled in section")
        }
        EnrollError::CreditCapExceeded { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "Credit limit exceeded")
        }
        EnrollError::ScheduleConflict { .. } => (StatusCode::CONFLICT, "Schedule conflict"),
        EnrollError::CapacityExceeded { .. } => (StatusCode::CONFLICT, "Section is full"),
        EnrollError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "Enrollment timed out"),
        EnrollError::Ledger(_) | EnrollError::Store(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to enroll")
        }
    };

    ApiErrorType::from((status, message, Some(error.to_string()))).into_response()
}

/// POST /semesters/:semester/students/:student/enrollments
///
/// Body: `{ "section_ids": [..], "timeout_ms": n }`. All sections are
/// accepted as pending, or none are.
pub async fn post_enroll(
    Path((semester, student)): Path<(String, i64)>,
    State(s): State<Arc<RegistrarState>>,
    Json(body): Json<EnrollBody>,
) -> Response {
    info!(
        "POST /semesters/{}/students/{}/enrollments ({} sections)",
        semester,
        student,
        body.section_ids.len()
    );

    let semester = SemesterId::new(semester);
    let timeout = body
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(s.engine.settings().enroll_timeout);

    match s
        .engine
        .enroll_with_timeout(StudentId(student), &semester, &body.section_ids, timeout)
        .await
    {
        Ok(records) => (StatusCode::CREATED, Json(json!({ "records": records }))).into_response(),
        Err(e) => {
            if !e.is_domain_rejection() {
                error!("Enrollment for student {} failed: {}", student, e);
            }
            enroll_error_to_response(e)
        }
    }
}

/// GET /semesters/:semester/students/:student/schedule
pub async fn get_schedule(
    Path((semester, student)): Path<(String, i64)>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("GET /semesters/{}/students/{}/schedule", semester, student);

    match s
        .engine
        .student_schedule(StudentId(student), &SemesterId::new(semester))
    {
        Ok(schedule) => (StatusCode::OK, Json(schedule)).into_response(),
        Err(e) => ApiErrorType::from((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch schedule",
            Some(e.to_string()),
        ))
        .into_response(),
    }
}

/// GET /semesters/:semester/students/:student/conflicts/:section
pub async fn get_conflict_check(
    Path((semester, student, section)): Path<(String, i64, i64)>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!(
        "GET /semesters/{}/students/{}/conflicts/{}",
        semester, student, section
    );

    match s.engine.check_conflict(
        StudentId(student),
        &SemesterId::new(semester),
        SectionId(section),
    ) {
        Ok(check) => (StatusCode::OK, Json(check)).into_response(),
        Err(e @ CheckError::SectionNotFound { .. }) => ApiErrorType::from((
            StatusCode::NOT_FOUND,
            "Section not offered",
            Some(e.to_string()),
        ))
        .into_response(),
        Err(e) => ApiErrorType::from((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to check conflicts",
            Some(e.to_string()),
        ))
        .into_response(),
    }
}

/// DELETE /students/:student/enrollments/pending
///
/// Withdraws every pending request of the student. Repeating the call
/// withdraws nothing.
pub async fn delete_pending(
    Path(student): Path<i64>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("DELETE /students/{}/enrollments/pending", student);

    match s.engine.reset_pending(StudentId(student)).await {
        Ok(withdrawn) => (StatusCode::OK, Json(json!({ "withdrawn": withdrawn }))).into_response(),
        Err(e) => {
            let message = match &e {
                ResetError::Ledger(l) if l.is_fatal() => "Seat accounting is inconsistent",
                _ => "Failed to reset pending requests",
            };
            error!("Reset for student {} failed: {}", student, e);
            ApiErrorType::from((StatusCode::INTERNAL_SERVER_ERROR, message, Some(e.to_string())))
                .into_response()
        }
    }
}
