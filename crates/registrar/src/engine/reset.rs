//! Bulk withdrawal of a student's pending requests.

use super::error::ResetError;
use super::{generate_correlation_id, RegistrarEngine};
use crate::db::{self, StudentId};
use crate::ledger::release_on;
use tracing::{info, warn};

impl RegistrarEngine {
    /// Withdraws every pending request of `student` and gives the seats back.
    ///
    /// Each record is withdrawn and released in its own transaction, so a
    /// failure part way leaves the already-processed records consistent and
    /// a retry picks up the rest. Returns the number of records withdrawn;
    /// a second call returns 0.
    pub async fn reset_pending(&self, student: StudentId) -> Result<usize, ResetError> {
        let correlation_id = generate_correlation_id();
        let _guard = self.locks.acquire(student).await;

        let pending = self.db.pending_records_for_student(student)?;
        let mut withdrawn = 0;

        for record in &pending {
            let released = self.db.with_transaction(|tx| {
                if db::withdraw_pending_on(tx, student, record.section)? == 0 {
                    return Ok::<_, ResetError>(false);
                }
                release_on(tx, record.section)?;
                Ok(true)
            });

            match released {
                Ok(true) => withdrawn += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        correlation_id = %correlation_id,
                        student = %student,
                        section = %record.section,
                        withdrawn,
                        error = %e,
                        "Reset stopped part way"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            correlation_id = %correlation_id,
            student = %student,
            withdrawn,
            "Pending requests reset"
        );

        Ok(withdrawn)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{engine_with, fa24, offering, reserved};
    use super::super::Decision;
    use super::*;
    use crate::db::{AdvisorId, EnrollmentStatus, SectionId, SemesterId};

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let (engine, _) = engine_with(&[
            offering(1, "Mon 09:00-10:00", 4, 5),
            offering(2, "Tue 09:00-10:00", 4, 5),
        ]);
        engine
            .enroll(StudentId(1), &fa24(), &[SectionId(1), SectionId(2)])
            .await
            .unwrap();

        assert_eq!(engine.reset_pending(StudentId(1)).await, Ok(2));
        assert_eq!(engine.reset_pending(StudentId(1)).await, Ok(0));
        assert_eq!(reserved(&engine, 1), 0);
        assert_eq!(reserved(&engine, 2), 0);
        assert!(engine.db().latest_record(StudentId(1), SectionId(1)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_keeps_decided_records() {
        let (engine, _) = engine_with(&[
            offering(1, "Mon 09:00-10:00", 4, 5),
            offering(2, "Tue 09:00-10:00", 4, 5),
        ]);
        engine
            .enroll(StudentId(1), &fa24(), &[SectionId(1), SectionId(2)])
            .await
            .unwrap();
        engine
            .decide(StudentId(1), SectionId(1), Decision::Approve, AdvisorId(500))
            .await
            .unwrap();

        assert_eq!(engine.reset_pending(StudentId(1)).await, Ok(1));

        let kept = engine.db().latest_record(StudentId(1), SectionId(1)).unwrap().unwrap();
        assert_eq!(kept.status, EnrollmentStatus::Approved);
        assert_eq!(reserved(&engine, 1), 1);
        assert_eq!(reserved(&engine, 2), 0);
    }

    #[tokio::test]
    async fn test_reset_spans_semesters_and_touches_one_student() {
        let mut spring = offering(2, "Mon 09:00-10:00", 4, 5);
        spring.semester = SemesterId::new("SP25");
        let (engine, _) = engine_with(&[offering(1, "Mon 09:00-10:00", 4, 5), spring]);

        engine.enroll(StudentId(1), &fa24(), &[SectionId(1)]).await.unwrap();
        engine
            .enroll(StudentId(1), &SemesterId::new("SP25"), &[SectionId(2)])
            .await
            .unwrap();
        engine.enroll(StudentId(2), &fa24(), &[SectionId(1)]).await.unwrap();

        assert_eq!(engine.reset_pending(StudentId(1)).await, Ok(2));
        assert_eq!(reserved(&engine, 1), 1);
        assert_eq!(reserved(&engine, 2), 0);

        let other = engine.db().latest_record(StudentId(2), SectionId(1)).unwrap().unwrap();
        assert_eq!(other.status, EnrollmentStatus::Pending);
    }

    #[tokio::test]
    async fn test_reset_frees_pair_for_reenrollment() {
        let (engine, _) = engine_with(&[offering(1, "Mon 09:00-10:00", 4, 1)]);
        engine.enroll(StudentId(1), &fa24(), &[SectionId(1)]).await.unwrap();
        engine.reset_pending(StudentId(1)).await.unwrap();

        engine.enroll(StudentId(1), &fa24(), &[SectionId(1)]).await.unwrap();
        assert_eq!(reserved(&engine, 1), 1);
    }
}
