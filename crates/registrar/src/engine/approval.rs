//! Advisor decisions on pending enrollment requests.
//!
//! `Pending -> Approved | Rejected`, both terminal. A rejection gives the
//! seat back in the same transaction that writes the status.

use super::error::ApprovalError;
use super::{generate_correlation_id, RegistrarEngine};
use crate::db::{
    self, AdvisorId, EnrollmentStatus, SectionId, StoreError, StudentId, StudentPendingGroup,
};
use crate::ledger::release_on;
use crate::notify::{dispatch, Notification};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// What the advisor decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn target_status(self) -> EnrollmentStatus {
        match self {
            Decision::Approve => EnrollmentStatus::Approved,
            Decision::Reject => EnrollmentStatus::Rejected,
        }
    }
}

/// One (student, section) pair in a batch decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub student_id: StudentId,
    pub section_id: SectionId,
}

/// Per-record result of a batch decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Success,
    RecordNotFound,
    NotPending { status: EnrollmentStatus },
    Unauthorized,
    /// Infrastructure failure (store or ledger) for this record only
    Failed { reason: String },
}

impl From<Result<(), ApprovalError>> for DecisionOutcome {
    fn from(result: Result<(), ApprovalError>) -> Self {
        match result {
            Ok(()) => DecisionOutcome::Success,
            Err(ApprovalError::RecordNotFound) => DecisionOutcome::RecordNotFound,
            Err(ApprovalError::NotPending { status }) => DecisionOutcome::NotPending { status },
            Err(ApprovalError::Unauthorized { .. }) => DecisionOutcome::Unauthorized,
            Err(e) => DecisionOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub student_id: StudentId,
    pub section_id: SectionId,
    #[serde(flatten)]
    pub outcome: DecisionOutcome,
}

/// Outcome of a batch decision: one entry per request, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDecisionReport {
    pub results: Vec<DecisionResult>,
    pub succeeded: usize,
}

impl RegistrarEngine {
    /// Applies an advisor's decision to one pending record.
    pub async fn decide(
        &self,
        student: StudentId,
        section: SectionId,
        decision: Decision,
        advisor: AdvisorId,
    ) -> Result<(), ApprovalError> {
        let result = {
            let _guard = self.locks.acquire(student).await;
            self.decide_locked(student, section, decision, advisor)
        };

        match &result {
            Ok(()) => {
                info!(
                    student = %student,
                    section = %section,
                    advisor = %advisor,
                    decision = ?decision,
                    "Enrollment decided"
                );
                dispatch(
                    &self.notifier,
                    Notification::DecisionsMade {
                        advisor,
                        decision,
                        decided: vec![(student, section)],
                    },
                );
            }
            Err(e) => warn!(
                student = %student,
                section = %section,
                advisor = %advisor,
                reason = %e,
                "Decision refused"
            ),
        }

        result
    }

    /// Applies the same decision to many records independently.
    ///
    /// A failure on one record never stops the others.
    pub async fn decide_batch(
        &self,
        advisor: AdvisorId,
        decision: Decision,
        requests: &[DecisionRequest],
    ) -> BatchDecisionReport {
        let correlation_id = generate_correlation_id();
        let mut results = Vec::with_capacity(requests.len());
        let mut decided = Vec::new();

        for request in requests {
            let result = {
                let _guard = self.locks.acquire(request.student_id).await;
                self.decide_locked(request.student_id, request.section_id, decision, advisor)
            };

            if let Err(e) = &result {
                warn!(
                    correlation_id = %correlation_id,
                    student = %request.student_id,
                    section = %request.section_id,
                    reason = %e,
                    "Batch decision skipped record"
                );
            } else {
                decided.push((request.student_id, request.section_id));
            }

            results.push(DecisionResult {
                student_id: request.student_id,
                section_id: request.section_id,
                outcome: result.into(),
            });
        }

        let succeeded = decided.len();
        info!(
            correlation_id = %correlation_id,
            advisor = %advisor,
            decision = ?decision,
            requested = requests.len(),
            succeeded,
            "Batch decision finished"
        );

        if !decided.is_empty() {
            dispatch(
                &self.notifier,
                Notification::DecisionsMade {
                    advisor,
                    decision,
                    decided,
                },
            );
        }

        BatchDecisionReport { results, succeeded }
    }

    /// Pending requests for the sections an advisor teaches, grouped by student.
    pub fn list_pending_for_advisor(
        &self,
        advisor: AdvisorId,
    ) -> Result<Vec<StudentPendingGroup>, StoreError> {
        self.db.pending_for_advisor(advisor)
    }

    /// Status write and (on rejection) seat release, as one transaction.
    /// Caller holds the student's lock.
    fn decide_locked(
        &self,
        student: StudentId,
        section: SectionId,
        decision: Decision,
        advisor: AdvisorId,
    ) -> Result<(), ApprovalError> {
        self.db.with_transaction(|tx| {
            let record = db::latest_record_on(tx, student, section)?
                .ok_or(ApprovalError::RecordNotFound)?;

            if teacher_of(tx, section)? != Some(advisor) {
                return Err(ApprovalError::Unauthorized { advisor, section });
            }

            if record.status.is_terminal() {
                return Err(ApprovalError::NotPending {
                    status: record.status,
                });
            }

            let changed = db::transition_pending_on(tx, student, section, decision.target_status())?;
            if changed != 1 {
                return Err(ApprovalError::RecordNotFound);
            }

            if decision == Decision::Reject {
                release_on(tx, section)?;
            }

            Ok(())
        })
    }
}

/// Teacher assigned to a section, including retired sections.
fn teacher_of(conn: &Connection, section: SectionId) -> Result<Option<AdvisorId>, StoreError> {
    let teacher = conn
        .query_row(
            "SELECT teacher_id FROM sections WHERE section_id = ?1",
            [section.0],
            |row| row.get(0).map(AdvisorId),
        )
        .optional()?;
    Ok(teacher)
}
