//! Enrollment coordinator and conflict check.

use super::error::{CheckError, EnrollError};
use super::{generate_correlation_id, RegistrarEngine};
use crate::db::{
    insert_pending_on, EnrollmentRecord, SectionId, SectionOffering, SemesterId, StudentId,
};
use crate::ledger::{reserve_on, LedgerError};
use crate::notify::{dispatch, Notification};
use crate::schedule::conflict::{find_conflict, LabeledSlot};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Result of checking one section against a student's schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictCheck {
    pub section: SectionId,
    pub conflict: bool,
    pub conflicting_with: Option<String>,
    pub seats_left: u32,
}

impl RegistrarEngine {
    /// Enrolls a student in every requested section, or in none of them.
    ///
    /// Uses the configured default timeout; see [`Self::enroll_with_timeout`].
    pub async fn enroll(
        &self,
        student: StudentId,
        semester: &SemesterId,
        sections: &[SectionId],
    ) -> Result<Vec<EnrollmentRecord>, EnrollError> {
        self.enroll_with_timeout(student, semester, sections, self.settings.enroll_timeout)
            .await
    }

    /// Enrolls a student in every requested section, or in none of them.
    ///
    /// Checks run in a fixed order: request shape, section availability,
    /// duplicates, credit cap, schedule conflicts, then seat reservation
    /// (ascending section id) and persistence of one pending record per
    /// section. Reservations and records are written in one store
    /// transaction, so any failure, including running out of `timeout`,
    /// leaves no seat taken.
    pub async fn enroll_with_timeout(
        &self,
        student: StudentId,
        semester: &SemesterId,
        sections: &[SectionId],
        timeout: Duration,
    ) -> Result<Vec<EnrollmentRecord>, EnrollError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let correlation_id = generate_correlation_id();

        info!(
            correlation_id = %correlation_id,
            student = %student,
            semester = %semester,
            sections = ?sections,
            "Enrollment requested"
        );

        validate_request(sections)?;

        let result = match tokio::time::timeout_at(deadline, self.locks.acquire(student)).await {
            Ok(_guard) => self.enroll_locked(student, semester, sections, started, deadline),
            Err(_) => Err(timed_out(started)),
        };

        match &result {
            Ok(records) => {
                info!(
                    correlation_id = %correlation_id,
                    student = %student,
                    count = records.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Enrollment accepted, awaiting approval"
                );
                dispatch(
                    &self.notifier,
                    Notification::EnrollmentSubmitted {
                        student,
                        semester: semester.clone(),
                        records: records.clone(),
                    },
                );
            }
            Err(e) if e.is_domain_rejection() => {
                info!(
                    correlation_id = %correlation_id,
                    student = %student,
                    reason = %e,
                    "Enrollment rejected"
                );
            }
            Err(e) => {
                error!(
                    correlation_id = %correlation_id,
                    student = %student,
                    error = %e,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Enrollment failed"
                );
            }
        }

        result
    }

    /// Runs the coordinator steps. Caller holds the student's lock.
    fn enroll_locked(
        &self,
        student: StudentId,
        semester: &SemesterId,
        requested: &[SectionId],
        started: Instant,
        deadline: Instant,
    ) -> Result<Vec<EnrollmentRecord>, EnrollError> {
        let offerings = requested
            .iter()
            .map(|&id| self.load_offering(id, semester))
            .collect::<Result<Vec<_>, _>>()?;

        let schedule = self.student_schedule(student, semester)?;

        if let Some(held) = offerings
            .iter()
            .find(|o| schedule.entries.iter().any(|e| e.section == o.id))
        {
            return Err(EnrollError::DuplicateEnrollment {
                section: held.id,
                label: held.label(),
            });
        }

        let cap = self.settings.credit_cap;
        let mut running = schedule.total_credits;
        for offering in &offerings {
            running = running.saturating_add(offering.credits);
            if running > cap {
                return Err(EnrollError::CreditCapExceeded {
                    section: offering.id,
                    label: offering.label(),
                    attempted: running,
                    cap,
                });
            }
        }

        let candidates: Vec<LabeledSlot> = offerings
            .iter()
            .map(|o| LabeledSlot::new(o.label(), o.slot))
            .collect();
        if let Some(conflict) = find_conflict(&candidates, &schedule.labeled_slots()) {
            return Err(EnrollError::ScheduleConflict {
                first: conflict.first,
                second: conflict.second,
            });
        }

        self.reserve_and_record(student, &offerings, requested, || {
            if Instant::now() >= deadline {
                Err(timed_out(started))
            } else {
                Ok(())
            }
        })
    }

    /// Reserves one seat per offering, in ascending section id, and writes
    /// the pending records, all in one store transaction.
    ///
    /// `in_time` runs before each reservation and before the insert. Any
    /// error, from it or from the store, rolls back every seat taken here.
    fn reserve_and_record(
        &self,
        student: StudentId,
        offerings: &[SectionOffering],
        requested: &[SectionId],
        mut in_time: impl FnMut() -> Result<(), EnrollError>,
    ) -> Result<Vec<EnrollmentRecord>, EnrollError> {
        // Fixed global order so overlapping multi-section requests cannot
        // wait on each other in a cycle.
        let mut order: Vec<&SectionOffering> = offerings.iter().collect();
        order.sort_by_key(|o| o.id);

        self.db.with_transaction(|tx| {
            for (held, offering) in order.iter().enumerate() {
                if let Err(e) = in_time() {
                    warn!(
                        student = %student,
                        held,
                        "Deadline passed during reservation, rolling back"
                    );
                    return Err(e);
                }

                reserve_on(tx, offering.id).map_err(|e| match e {
                    LedgerError::CapacityExceeded { section, .. } => {
                        EnrollError::CapacityExceeded {
                            section,
                            label: offering.label(),
                        }
                    }
                    other => other.into(),
                })?;
            }

            in_time()?;
            Ok(insert_pending_on(tx, student, requested)?)
        })
    }

    /// Gets a section that is open for enrollment in `semester`.
    fn load_offering(
        &self,
        section: SectionId,
        semester: &SemesterId,
    ) -> Result<SectionOffering, EnrollError> {
        self.db
            .find_offered_section(section)?
            .filter(|o| &o.semester == semester)
            .ok_or(EnrollError::SectionNotFound { section })
    }

    /// Reports whether `section` would conflict with the student's current
    /// schedule. Read-only; if the student already holds the section it is
    /// not compared with itself.
    pub fn check_conflict(
        &self,
        student: StudentId,
        semester: &SemesterId,
        section: SectionId,
    ) -> Result<ConflictCheck, CheckError> {
        let offering = self
            .db
            .find_offered_section(section)?
            .filter(|o| &o.semester == semester)
            .ok_or(CheckError::SectionNotFound { section })?;

        let schedule = self.student_schedule(student, semester)?;
        let existing: Vec<LabeledSlot> = schedule
            .entries
            .iter()
            .filter(|e| e.section != section)
            .map(|e| LabeledSlot::new(e.label.clone(), e.slot))
            .collect();

        let candidate = [LabeledSlot::new(offering.label(), offering.slot)];
        let conflict = find_conflict(&candidate, &existing);

        Ok(ConflictCheck {
            section,
            conflict: conflict.is_some(),
            conflicting_with: conflict.map(|c| c.second),
            seats_left: offering.seats_left(),
        })
    }
}

/// Rejects malformed requests before anything is read or locked.
fn validate_request(sections: &[SectionId]) -> Result<(), EnrollError> {
    if sections.is_empty() {
        return Err(EnrollError::EmptyRequest);
    }

    let mut seen = HashSet::with_capacity(sections.len());
    if let Some(&section) = sections.iter().find(|s| !seen.insert(**s)) {
        return Err(EnrollError::RepeatedSection { section });
    }

    Ok(())
}

fn timed_out(started: Instant) -> EnrollError {
    EnrollError::Timeout {
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{engine_with, fa24, offering, reserved};
    use super::*;
    use crate::db::{AdvisorId, EnrollmentStatus, StoreError};
    use crate::notify::Notification;

    #[tokio::test]
    async fn test_enroll_creates_pending_records_and_reserves() {
        let (engine, notifier) = engine_with(&[
            offering(1, "Mon 09:00-10:00", 4, 2),
            offering(2, "Mon 10:00-11:00", 4, 2),
        ]);

        let records = engine
            .enroll(StudentId(7), &fa24(), &[SectionId(2), SectionId(1)])
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].section, SectionId(2));
        assert!(records.iter().all(|r| r.status == EnrollmentStatus::Pending));
        assert_eq!(reserved(&engine, 1), 1);
        assert_eq!(reserved(&engine, 2), 1);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            &sent[0],
            Notification::EnrollmentSubmitted { student, records, .. }
                if *student == StudentId(7) && records.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_rejects_malformed_requests() {
        let (engine, notifier) = engine_with(&[offering(1, "Mon 09:00-10:00", 4, 2)]);

        assert_eq!(
            engine.enroll(StudentId(7), &fa24(), &[]).await,
            Err(EnrollError::EmptyRequest)
        );
        assert_eq!(
            engine
                .enroll(StudentId(7), &fa24(), &[SectionId(1), SectionId(1)])
                .await,
            Err(EnrollError::RepeatedSection { section: SectionId(1) })
        );
        assert_eq!(reserved(&engine, 1), 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_inactive_deleted_or_other_semester_sections() {
        let mut other_term = offering(4, "Fri 09:00-10:00", 4, 2);
        other_term.semester = SemesterId::new("SP25");
        let (engine, _) = engine_with(&[
            offering(1, "Mon 09:00-10:00", 4, 2),
            offering(2, "Tue 09:00-10:00", 4, 2),
            offering(3, "Wed 09:00-10:00", 4, 2),
            other_term,
        ]);
        engine.db().set_active(SectionId(2), false).unwrap();
        engine.db().retire_section(SectionId(3)).unwrap();

        for missing in [99, 2, 3, 4] {
            assert_eq!(
                engine
                    .enroll(StudentId(7), &fa24(), &[SectionId(1), SectionId(missing)])
                    .await,
                Err(EnrollError::SectionNotFound {
                    section: SectionId(missing)
                })
            );
        }
        assert_eq!(reserved(&engine, 1), 0);
    }

    #[tokio::test]
    async fn test_duplicate_enrollment() {
        let (engine, _) = engine_with(&[
            offering(1, "Mon 09:00-10:00", 4, 5),
            offering(2, "Tue 09:00-10:00", 4, 5),
        ]);
        engine
            .enroll(StudentId(7), &fa24(), &[SectionId(1)])
            .await
            .unwrap();

        let err = engine
            .enroll(StudentId(7), &fa24(), &[SectionId(2), SectionId(1)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnrollError::DuplicateEnrollment { section: SectionId(1), .. }
        ));
        assert_eq!(reserved(&engine, 1), 1);
        assert_eq!(reserved(&engine, 2), 0);
    }

    #[tokio::test]
    async fn test_reenroll_allowed_after_rejection() {
        let (engine, _) = engine_with(&[offering(1, "Mon 09:00-10:00", 4, 1)]);
        engine
            .enroll(StudentId(7), &fa24(), &[SectionId(1)])
            .await
            .unwrap();
        engine
            .decide(StudentId(7), SectionId(1), crate::engine::Decision::Reject, AdvisorId(500))
            .await
            .unwrap();

        let records = engine
            .enroll(StudentId(7), &fa24(), &[SectionId(1)])
            .await
            .unwrap();
        assert_eq!(records[0].status, EnrollmentStatus::Pending);
        assert_eq!(reserved(&engine, 1), 1);
    }

    #[tokio::test]
    async fn test_credit_cap_reports_first_offending_section() {
        let (engine, _) = engine_with(&[
            offering(1, "Mon 08:00-09:00", 26, 5),
            offering(2, "Tue 08:00-09:00", 3, 5),
            offering(3, "Wed 08:00-09:00", 1, 5),
            offering(4, "Thu 08:00-09:00", 2, 5),
        ]);
        engine
            .enroll(StudentId(7), &fa24(), &[SectionId(1)])
            .await
            .unwrap();

        // 26 + 1 = 27, + 3 = 30 (at the cap, fine), + 2 = 32 -> section 4
        let err = engine
            .enroll(
                StudentId(7),
                &fa24(),
                &[SectionId(3), SectionId(2), SectionId(4)],
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EnrollError::CreditCapExceeded {
                section: SectionId(4),
                label: "COURSE 4 (section 4)".to_string(),
                attempted: 32,
                cap: 30,
            }
        );
        for id in 2..=4 {
            assert_eq!(reserved(&engine, id), 0);
        }

        // Exactly at the cap is allowed.
        engine
            .enroll(StudentId(7), &fa24(), &[SectionId(3), SectionId(2)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_conflict_within_request() {
        let (engine, _) = engine_with(&[
            offering(1, "Tue 14:00-15:20", 4, 5),
            offering(2, "Tue 15:00-16:20", 4, 5),
        ]);

        let err = engine
            .enroll(StudentId(7), &fa24(), &[SectionId(1), SectionId(2)])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EnrollError::ScheduleConflict {
                first: "COURSE 1 (section 1)".to_string(),
                second: "COURSE 2 (section 2)".to_string(),
            }
        );
        assert_eq!(reserved(&engine, 1), 0);
    }

    #[tokio::test]
    async fn test_capacity_failure_releases_earlier_reservations() {
        let (engine, _) = engine_with(&[
            offering(1, "Mon 09:00-10:00", 4, 5),
            offering(2, "Tue 09:00-10:00", 4, 5),
            offering(3, "Wed 09:00-10:00", 4, 1),
        ]);
        engine
            .enroll(StudentId(1), &fa24(), &[SectionId(3)])
            .await
            .unwrap();

        let err = engine
            .enroll(
                StudentId(2),
                &fa24(),
                &[SectionId(3), SectionId(1), SectionId(2)],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnrollError::CapacityExceeded { section: SectionId(3), .. }
        ));
        assert_eq!(reserved(&engine, 1), 0);
        assert_eq!(reserved(&engine, 2), 0);
        assert_eq!(reserved(&engine, 3), 1);
        assert!(engine
            .student_schedule(StudentId(2), &fa24())
            .unwrap()
            .entries
            .is_empty());
    }

    #[tokio::test]
    async fn test_quota_cut_below_reserved_rejects_new_requests() {
        let (engine, _) = engine_with(&[offering(1, "Mon 09:00-10:00", 4, 3)]);
        for student in 1..=3 {
            engine
                .enroll(StudentId(student), &fa24(), &[SectionId(1)])
                .await
                .unwrap();
        }
        engine.db().set_quota(SectionId(1), 1).unwrap();

        assert!(matches!(
            engine.enroll(StudentId(4), &fa24(), &[SectionId(1)]).await,
            Err(EnrollError::CapacityExceeded { .. })
        ));
        assert_eq!(reserved(&engine, 1), 3);
    }

    #[tokio::test]
    async fn test_timeout_while_waiting_reserves_nothing() {
        let (engine, notifier) = engine_with(&[offering(1, "Mon 09:00-10:00", 4, 3)]);

        // Another request of the same student is in flight.
        let held = engine.locks.acquire(StudentId(7)).await;
        let err = engine
            .enroll_with_timeout(
                StudentId(7),
                &fa24(),
                &[SectionId(1)],
                Duration::from_millis(30),
            )
            .await
            .unwrap_err();
        drop(held);

        assert!(matches!(err, EnrollError::Timeout { .. }));
        assert!(!err.is_domain_rejection());
        assert_eq!(reserved(&engine, 1), 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_reserves_nothing() {
        let (engine, _) = engine_with(&[
            offering(1, "Mon 09:00-10:00", 4, 3),
            offering(2, "Tue 09:00-10:00", 4, 3),
        ]);
        let started = Instant::now();

        let err = engine
            .enroll_locked(StudentId(7), &fa24(), &[SectionId(1), SectionId(2)], started, started)
            .unwrap_err();
        assert!(matches!(err, EnrollError::Timeout { .. }));
        assert_eq!(reserved(&engine, 1), 0);
        assert_eq!(reserved(&engine, 2), 0);
        assert!(engine.db().pending_records_for_student(StudentId(7)).unwrap().is_empty());
    }

    fn loaded(engine: &RegistrarEngine, ids: &[SectionId]) -> Vec<SectionOffering> {
        ids.iter()
            .map(|&id| engine.db().get_section(id).unwrap().unwrap())
            .collect()
    }

    /// Deadline check that passes `checks` times, then reports a timeout.
    fn expires_after(checks: usize) -> impl FnMut() -> Result<(), EnrollError> {
        let mut seen = 0;
        move || {
            seen += 1;
            if seen > checks {
                Err(EnrollError::Timeout { elapsed_ms: 0 })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_deadline_after_some_reservations_rolls_back() {
        let (engine, _) = engine_with(&[
            offering(1, "Mon 09:00-10:00", 4, 3),
            offering(2, "Tue 09:00-10:00", 4, 3),
            offering(3, "Wed 09:00-10:00", 4, 3),
        ]);
        let ids = [SectionId(3), SectionId(1), SectionId(2)];
        let offerings = loaded(&engine, &ids);

        // Sections 1 and 2 are reserved before the deadline passes.
        let err = engine
            .reserve_and_record(StudentId(7), &offerings, &ids, expires_after(2))
            .unwrap_err();

        assert!(matches!(err, EnrollError::Timeout { .. }));
        for id in 1..=3 {
            assert_eq!(reserved(&engine, id), 0);
        }
        assert!(engine.db().pending_records_for_student(StudentId(7)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_before_insert_rolls_back() {
        let (engine, _) = engine_with(&[
            offering(1, "Mon 09:00-10:00", 4, 3),
            offering(2, "Tue 09:00-10:00", 4, 3),
        ]);
        let ids = [SectionId(1), SectionId(2)];
        let offerings = loaded(&engine, &ids);

        // Every seat is held when the deadline passes.
        let err = engine
            .reserve_and_record(StudentId(7), &offerings, &ids, expires_after(2))
            .unwrap_err();

        assert!(matches!(err, EnrollError::Timeout { .. }));
        assert_eq!(reserved(&engine, 1), 0);
        assert_eq!(reserved(&engine, 2), 0);
        assert!(engine.db().pending_records_for_student(StudentId(7)).unwrap().is_empty());

        let records = engine
            .reserve_and_record(StudentId(7), &offerings, &ids, expires_after(3))
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(reserved(&engine, 1), 1);
    }

    #[tokio::test]
    async fn test_failed_insert_returns_reserved_seats() {
        let (engine, _) = engine_with(&[
            offering(1, "Mon 09:00-10:00", 4, 3),
            offering(2, "Tue 09:00-10:00", 4, 3),
        ]);
        engine
            .enroll(StudentId(7), &fa24(), &[SectionId(2)])
            .await
            .unwrap();

        // Skips the duplicate check, so the record insert for section 2 hits
        // the live-pair index after both seats were taken.
        let ids = [SectionId(1), SectionId(2)];
        let offerings = loaded(&engine, &ids);
        let err = engine
            .reserve_and_record(StudentId(7), &offerings, &ids, || Ok(()))
            .unwrap_err();

        assert!(matches!(
            err,
            EnrollError::Store(StoreError::UniqueViolation { .. })
        ));
        assert_eq!(reserved(&engine, 1), 0);
        assert_eq!(reserved(&engine, 2), 1);
        assert_eq!(engine.db().pending_records_for_student(StudentId(7)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_huge_credit_values_do_not_overflow() {
        let (engine, _) = engine_with(&[
            offering(1, "Mon 09:00-10:00", u32::MAX, 3),
            offering(2, "Tue 09:00-10:00", 4, 3),
        ]);

        let err = engine
            .enroll(StudentId(7), &fa24(), &[SectionId(2), SectionId(1)])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EnrollError::CreditCapExceeded {
                section: SectionId(1),
                label: "COURSE 1 (section 1)".to_string(),
                attempted: u32::MAX,
                cap: 30,
            }
        );
        assert_eq!(reserved(&engine, 1), 0);
    }

    #[tokio::test]
    async fn test_check_conflict() {
        let (engine, _) = engine_with(&[
            offering(1, "Mon 09:00-10:00", 4, 3),
            offering(2, "Mon 09:30-10:30", 4, 3),
            offering(3, "Mon 10:00-11:00", 4, 3),
        ]);
        engine
            .enroll(StudentId(7), &fa24(), &[SectionId(1)])
            .await
            .unwrap();

        let check = engine
            .check_conflict(StudentId(7), &fa24(), SectionId(2))
            .unwrap();
        assert!(check.conflict);
        assert_eq!(check.conflicting_with.as_deref(), Some("COURSE 1 (section 1)"));

        let check = engine
            .check_conflict(StudentId(7), &fa24(), SectionId(3))
            .unwrap();
        assert!(!check.conflict);
        assert_eq!(check.conflicting_with, None);

        // A held section does not conflict with itself.
        assert!(!engine
            .check_conflict(StudentId(7), &fa24(), SectionId(1))
            .unwrap()
            .conflict);

        assert_eq!(
            engine.check_conflict(StudentId(7), &fa24(), SectionId(9)),
            Err(CheckError::SectionNotFound { section: SectionId(9) })
        );
    }
}
