use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::server::endpoints::{advisor, enrollment, status};
use crate::types::RegistrarState;

mod endpoints;
mod types;

/// Creates a router that can be used by `axum`.
///
/// # Parameters
/// - `app_state`: The app server state.
///
/// # Returns
/// The router.
pub fn create_router(app_state: Arc<RegistrarState>) -> Router {
    // Student-facing routes, scoped to a semester
    let semester_router = Router::new()
        .route(
            "/students/:student/enrollments",
            post(enrollment::post_enroll),
        )
        .route(
            "/students/:student/schedule",
            get(enrollment::get_schedule),
        )
        .route(
            "/students/:student/conflicts/:section",
            get(enrollment::get_conflict_check),
        );

    let advisor_router = Router::new()
        .route("/decisions", post(advisor::post_batch_decision))
        .route(
            "/students/:student/sections/:section/decision",
            post(advisor::post_decision),
        )
        .route("/pending", get(advisor::get_pending));

    Router::new()
        .route("/health", get(status::get_health))
        .nest("/semesters/:semester", semester_router)
        .route(
            "/students/:student/enrollments/pending",
            delete(enrollment::delete_pending),
        )
        .nest("/advisors/:advisor", advisor_router)
        .with_state(app_state)
}
