//! The enrollment & approval engine.
//!
//! [`RegistrarEngine`] ties the store, the capacity ledger, the per-student
//! locks and the notifier together. Its operations are split by concern:
//! - `enroll`: the all-or-nothing "enroll in N sections" coordinator and
//!   the read-only conflict check
//! - `approval`: the advisor decision state machine
//! - `reset`: withdrawal of every pending request of a student

mod approval;
mod enroll;
mod error;
mod locks;
mod reset;

pub use approval::{BatchDecisionReport, Decision, DecisionOutcome, DecisionRequest, DecisionResult};
pub use enroll::ConflictCheck;
pub use error::{ApprovalError, CheckError, EnrollError, ResetError};
pub use locks::StudentLocks;

use crate::db::{EnrollmentDb, EnrollmentStatus, SectionId, SemesterId, StoreError, StudentId};
use crate::ledger::CapacityLedger;
use crate::notify::Notifier;
use crate::schedule::conflict::LabeledSlot;
use crate::schedule::TimeSlot;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default per-semester credit ceiling.
pub const DEFAULT_CREDIT_CAP: u32 = 30;

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Maximum pending + approved credits per student per semester
    pub credit_cap: u32,
    /// Time budget for an enrollment request when the caller gives none
    pub enroll_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            credit_cap: DEFAULT_CREDIT_CAP,
            enroll_timeout: Duration::from_secs(5),
        }
    }
}

/// One held section in a student's schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub section: SectionId,
    pub course_id: String,
    pub label: String,
    pub credits: u32,
    pub status: EnrollmentStatus,
    pub slot: TimeSlot,
}

/// A student's pending + approved sections for one semester.
///
/// Always built from the store at call time; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentSchedule {
    pub student: StudentId,
    pub semester: SemesterId,
    pub entries: Vec<ScheduleEntry>,
    pub total_credits: u32,
}

impl StudentSchedule {
    pub(crate) fn labeled_slots(&self) -> Vec<LabeledSlot> {
        self.entries
            .iter()
            .map(|e| LabeledSlot::new(e.label.clone(), e.slot))
            .collect()
    }
}

pub struct RegistrarEngine {
    db: Arc<EnrollmentDb>,
    ledger: CapacityLedger,
    locks: StudentLocks,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
}

impl RegistrarEngine {
    pub fn new(db: Arc<EnrollmentDb>, notifier: Arc<dyn Notifier>, settings: EngineSettings) -> Self {
        Self {
            ledger: CapacityLedger::new(db.clone()),
            db,
            locks: StudentLocks::new(),
            notifier,
            settings,
        }
    }

    pub fn db(&self) -> &Arc<EnrollmentDb> {
        &self.db
    }

    pub fn ledger(&self) -> &CapacityLedger {
        &self.ledger
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Number of students with a lock entry; see [`StudentLocks::prune`].
    pub fn tracked_students(&self) -> usize {
        self.locks.len()
    }

    /// Drops idle per-student lock entries.
    pub fn prune_locks(&self) {
        self.locks.prune();
    }

    /// Builds the student's current schedule for a semester.
    pub fn student_schedule(
        &self,
        student: StudentId,
        semester: &SemesterId,
    ) -> Result<StudentSchedule, StoreError> {
        let held = self.db.live_sections_for_student(student, semester)?;

        let entries: Vec<ScheduleEntry> = held
            .into_iter()
            .map(|h| ScheduleEntry {
                label: h.section.label(),
                section: h.section.id,
                course_id: h.section.course_id,
                credits: h.section.credits,
                status: h.record.status,
                slot: h.section.slot,
            })
            .collect();
        let total_credits = entries
            .iter()
            .fold(0u32, |total, e| total.saturating_add(e.credits));

        Ok(StudentSchedule {
            student,
            semester: semester.clone(),
            entries,
            total_credits,
        })
    }
}

/// Generates a short id used to correlate the log lines of one request.
fn generate_correlation_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    let random: u32 = rand::thread_rng().gen();
    format!("{:x}-{:08x}", timestamp & 0xFFFFFFFF, random)
}
