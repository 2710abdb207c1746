/// Database types for sections and enrollment records
use crate::schedule::TimeSlot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Identifies a student.
    StudentId
);
id_type!(
    /// Identifies a section offering.
    SectionId
);
id_type!(
    /// Identifies an advisor; advisors decide requests for sections they teach.
    AdvisorId
);

/// Semester code, e.g. `"FA24"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SemesterId(pub String);

impl SemesterId {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SemesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One scheduled instance of a course in a semester.
///
/// `reserved` is read-only from the engine's point of view; only the
/// capacity ledger changes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionOffering {
    pub id: SectionId,
    pub course_id: String,
    pub semester: SemesterId,
    pub teacher: AdvisorId,
    pub credits: u32,
    pub quota: u32,
    #[serde(default)]
    pub reserved: u32,
    pub slot: TimeSlot,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl SectionOffering {
    /// Label used in conflict reports and error messages, e.g. `"CSE 110 (section 42)"`.
    pub fn label(&self) -> String {
        format!("{} (section {})", self.course_id, self.id)
    }

    pub fn seats_left(&self) -> u32 {
        self.quota.saturating_sub(self.reserved)
    }
}

/// Status of an enrollment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Pending,
    Approved,
    Rejected,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Approved => "approved",
            EnrollmentStatus::Rejected => "rejected",
        }
    }

    /// Approved and rejected records accept no further decisions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnrollmentStatus::Approved | EnrollmentStatus::Rejected)
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EnrollmentStatus::Pending),
            "approved" => Ok(EnrollmentStatus::Approved),
            "rejected" => Ok(EnrollmentStatus::Rejected),
            other => Err(format!("unknown enrollment status {other:?}")),
        }
    }
}

/// A student's request for one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub student: StudentId,
    pub section: SectionId,
    pub status: EnrollmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A live record joined with its section, used to build a student's schedule.
#[derive(Debug, Clone)]
pub struct HeldSection {
    pub record: EnrollmentRecord,
    pub section: SectionOffering,
}

/// A pending request as seen by the advisor who must decide it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub section: SectionId,
    pub course_id: String,
    pub semester: SemesterId,
    pub credits: u32,
    pub slot: TimeSlot,
    pub requested_at: DateTime<Utc>,
}

/// Pending requests for one student, grouped for advisor review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentPendingGroup {
    pub student: StudentId,
    pub requests: Vec<PendingRequest>,
}
