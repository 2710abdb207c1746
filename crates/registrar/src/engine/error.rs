//! Error types for the enrollment engine.

use crate::db::{AdvisorId, EnrollmentStatus, SectionId, StoreError};
use crate::ledger::LedgerError;
use thiserror::Error;

/// Errors returned by [`super::RegistrarEngine::enroll`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnrollError {
    /// No sections were requested
    #[error("Enrollment request contains no sections")]
    EmptyRequest,

    /// The same section appears more than once in one request
    #[error("Section {section} is listed more than once")]
    RepeatedSection { section: SectionId },

    /// Section is missing, inactive, deleted, or not offered this semester
    #[error("Section {section} is not offered")]
    SectionNotFound { section: SectionId },

    /// The student already holds a pending or approved record for the section
    #[error("Already enrolled or awaiting approval for {label}")]
    DuplicateEnrollment { section: SectionId, label: String },

    /// Adding `section` would push the student's credits past the cap
    #[error("Adding {label} brings the credit total to {attempted}, over the cap of {cap}")]
    CreditCapExceeded {
        section: SectionId,
        label: String,
        attempted: u32,
        cap: u32,
    },

    /// Two slots in the resulting schedule overlap
    #[error("Schedule conflict between {first} and {second}")]
    ScheduleConflict { first: String, second: String },

    /// The section filled up before a seat could be reserved
    #[error("No seats left in {label}")]
    CapacityExceeded { section: SectionId, label: String },

    /// The request did not finish in time; nothing was kept
    #[error("Enrollment timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EnrollError {
    /// Returns true for rejections caused by the request or the student's
    /// current state, as opposed to infrastructure failures.
    pub fn is_domain_rejection(&self) -> bool {
        !matches!(
            self,
            EnrollError::Ledger(_) | EnrollError::Store(_) | EnrollError::Timeout { .. }
        )
    }
}

/// Errors returned by [`super::RegistrarEngine::check_conflict`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("Section {section} is not offered")]
    SectionNotFound { section: SectionId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors returned by [`super::RegistrarEngine::decide`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    /// No enrollment record exists for the pair
    #[error("No enrollment record for this student and section")]
    RecordNotFound,

    /// The record was already decided
    #[error("Enrollment request already {status}")]
    NotPending { status: EnrollmentStatus },

    /// The acting advisor does not teach the section
    #[error("Advisor {advisor} is not assigned to section {section}")]
    Unauthorized {
        advisor: AdvisorId,
        section: SectionId,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors returned by [`super::RegistrarEngine::reset_pending`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResetError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LedgerError> for EnrollError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Store(e) => EnrollError::Store(e),
            LedgerError::SectionMissing { section } => EnrollError::SectionNotFound { section },
            other => EnrollError::Ledger(other),
        }
    }
}
