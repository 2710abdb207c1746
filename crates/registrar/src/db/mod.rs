/// Database module for sections and enrollment records

mod error;
mod types;

pub use error::StoreError;
pub use types::{
    AdvisorId, EnrollmentRecord, EnrollmentStatus, HeldSection, PendingRequest, SectionId,
    SectionOffering, SemesterId, StudentId, StudentPendingGroup,
};

use crate::schedule::{weekday_from_number, TimeSlot};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

const SCHEMA_SQL: &str = include_str!("../../../../sql/init_registrar.sql");

/// How long a connection waits for another connection's write lock.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const SECTION_COLUMNS: &str = "s.section_id, s.course_id, s.semester_id, s.teacher_id, s.credits,
     s.quota, s.reserved, s.day, s.start_min, s.end_min, s.active";

const RECORD_COLUMNS: &str = "e.student_id, e.section_id, e.status, e.created_at, e.updated_at";

/// SQLite-backed store for section offerings and enrollment records.
///
/// Each operation checks a connection out of a small pool and returns it
/// afterwards. The pool mutex is held only for the pop or push, so work on
/// one section never waits behind work on another in Rust. SQLite's write
/// lock, with a busy timeout, is the only point where writers queue.
///
/// Section counters are deliberately not writable from here; see
/// [`crate::ledger`].
pub struct EnrollmentDb {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    /// Scratch databases are deleted when the store is dropped.
    scratch: bool,
}

/// Applies the per-connection settings.
fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path).map_err(|e| StoreError::Open {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    configure_connection(&conn)?;
    Ok(conn)
}

impl EnrollmentDb {
    /// Opens (or creates) the database at `db_path` and initializes the schema.
    ///
    /// `":memory:"` opens a scratch database that lives only as long as the
    /// returned store.
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        if db_path == ":memory:" {
            return Self::open_scratch();
        }
        Self::open_at(PathBuf::from(db_path), false)
    }

    /// Opens a fresh scratch database in the temp directory.
    pub fn open_scratch() -> Result<Self, StoreError> {
        let path = std::env::temp_dir().join(format!(
            "registrar-{}-{:016x}.db",
            std::process::id(),
            rand::random::<u64>()
        ));
        Self::open_at(path, true)
    }

    fn open_at(path: PathBuf, scratch: bool) -> Result<Self, StoreError> {
        let conn = open_connection(&path)?;

        let init = || -> rusqlite::Result<()> {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(path = %path.display(), journal_mode = %mode, "Opened database");
            conn.execute_batch(SCHEMA_SQL)
        };
        init().map_err(|e| StoreError::Open {
            path: path.display().to_string(),
            message: format!("schema initialization failed: {e}"),
        })?;

        Ok(Self {
            path,
            idle: Mutex::new(vec![conn]),
            scratch,
        })
    }

    /// Takes an idle connection, opening a new one if none is free.
    fn checkout(&self) -> Result<Connection, StoreError> {
        let idle = self.idle.lock().map_err(|_| StoreError::LockPoisoned)?.pop();
        match idle {
            Some(conn) => Ok(conn),
            None => open_connection(&self.path),
        }
    }

    /// Returns a connection to the pool.
    fn checkin(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(conn);
        }
    }

    /// Runs `f` against a pooled connection (autocommit mode).
    pub(crate) fn with_conn<T, E>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.checkout()?;
        let out = f(&conn);
        self.checkin(conn);
        out
    }

    /// Runs `f` inside an immediate transaction; commits on `Ok`, rolls back
    /// on `Err`.
    ///
    /// The write lock is taken at `BEGIN`, so a transaction never has to
    /// upgrade from a stale read snapshot.
    pub(crate) fn with_transaction<T, E>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.checkout()?;
        let out = run_in_transaction(&mut conn, f);
        self.checkin(conn);
        out
    }

    /// Inserts a section, or updates its catalog fields if it already exists.
    ///
    /// The reserved count is never touched here: new sections start at zero
    /// and existing sections keep their current occupancy.
    pub fn upsert_section(&self, section: &SectionOffering) -> Result<(), StoreError> {
        let (start_min, end_min) = section.slot.minute_range();
        self.with_conn(|db| {
            db.execute(
                "INSERT INTO sections (
                    section_id, course_id, semester_id, teacher_id, credits, quota,
                    day, start_min, end_min, active, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT (section_id) DO UPDATE SET
                    course_id = excluded.course_id,
                    semester_id = excluded.semester_id,
                    teacher_id = excluded.teacher_id,
                    credits = excluded.credits,
                    quota = excluded.quota,
                    day = excluded.day,
                    start_min = excluded.start_min,
                    end_min = excluded.end_min,
                    active = excluded.active",
                params![
                    section.id.0,
                    section.course_id,
                    section.semester.as_str(),
                    section.teacher.0,
                    section.credits,
                    section.quota,
                    section.slot.day_number(),
                    start_min,
                    end_min,
                    section.active,
                    Utc::now(),
                ],
            )?;
            Ok(())
        })
    }

    /// Changes a section's quota. The quota may drop below the current
    /// reserved count; new reservations then fail until seats are released.
    pub fn set_quota(&self, section: SectionId, quota: u32) -> Result<(), StoreError> {
        self.update_section_field(
            section,
            "UPDATE sections SET quota = ?2 WHERE section_id = ?1 AND deleted_at IS NULL",
            quota,
        )
    }

    /// Opens or closes a section for new enrollments.
    pub fn set_active(&self, section: SectionId, active: bool) -> Result<(), StoreError> {
        self.update_section_field(
            section,
            "UPDATE sections SET active = ?2 WHERE section_id = ?1 AND deleted_at IS NULL",
            active,
        )
    }

    /// Soft-deletes a section. Existing records are kept.
    pub fn retire_section(&self, section: SectionId) -> Result<(), StoreError> {
        self.update_section_field(
            section,
            "UPDATE sections SET deleted_at = ?2 WHERE section_id = ?1 AND deleted_at IS NULL",
            Utc::now(),
        )
    }

    fn update_section_field<V: rusqlite::ToSql>(
        &self,
        section: SectionId,
        sql: &str,
        value: V,
    ) -> Result<(), StoreError> {
        let changed = self.with_conn(|db| {
            db.execute(sql, params![section.0, value])
                .map_err(StoreError::from)
        })?;
        if changed == 0 {
            return Err(StoreError::UnknownSection { section });
        }
        Ok(())
    }

    /// Gets a section unless it has been deleted. Inactive sections are returned.
    pub fn get_section(&self, section: SectionId) -> Result<Option<SectionOffering>, StoreError> {
        self.with_conn(|db| get_section_on(db, section))
    }

    /// Gets a section only if it is currently open for enrollment.
    pub fn find_offered_section(
        &self,
        section: SectionId,
    ) -> Result<Option<SectionOffering>, StoreError> {
        Ok(self.get_section(section)?.filter(|s| s.active))
    }

    /// Gets the live (pending or approved) records of a student for one
    /// semester, joined with their sections, in the order they were created.
    pub fn live_sections_for_student(
        &self,
        student: StudentId,
        semester: &SemesterId,
    ) -> Result<Vec<HeldSection>, StoreError> {
        self.with_conn(|db| {
            let mut stmt = db.prepare(&format!(
                "SELECT {RECORD_COLUMNS}, {SECTION_COLUMNS}
                 FROM enrollments e
                 JOIN sections s ON s.section_id = e.section_id
                 WHERE e.student_id = ?1
                   AND s.semester_id = ?2
                   AND e.status IN ('pending', 'approved')
                   AND e.deleted_at IS NULL
                 ORDER BY e.enrollment_id"
            ))?;

            let held = stmt
                .query_map(params![student.0, semester.as_str()], |row| {
                    Ok(HeldSection {
                        record: record_from_row(row, 0)?,
                        section: section_from_row(row, 5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(held)
        })
    }

    /// Gets the most recent non-deleted record for a (student, section) pair.
    pub fn latest_record(
        &self,
        student: StudentId,
        section: SectionId,
    ) -> Result<Option<EnrollmentRecord>, StoreError> {
        self.with_conn(|db| latest_record_on(db, student, section))
    }

    /// Gets every pending record of a student, across semesters.
    pub fn pending_records_for_student(
        &self,
        student: StudentId,
    ) -> Result<Vec<EnrollmentRecord>, StoreError> {
        self.with_conn(|db| {
            let mut stmt = db.prepare(&format!(
                "SELECT {RECORD_COLUMNS}
                 FROM enrollments e
                 WHERE e.student_id = ?1 AND e.status = 'pending' AND e.deleted_at IS NULL
                 ORDER BY e.enrollment_id"
            ))?;

            let records = stmt
                .query_map([student.0], |row| record_from_row(row, 0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(records)
        })
    }

    /// Gets pending requests for every section taught by `advisor`, grouped
    /// by student (ascending id), oldest request first within a group.
    ///
    /// Retired sections are included: their pending requests still hold a
    /// seat and can still be decided.
    pub fn pending_for_advisor(
        &self,
        advisor: AdvisorId,
    ) -> Result<Vec<StudentPendingGroup>, StoreError> {
        let rows = self.with_conn(|db| {
            let mut stmt = db.prepare(&format!(
                "SELECT e.student_id, e.created_at, {SECTION_COLUMNS}
                 FROM enrollments e
                 JOIN sections s ON s.section_id = e.section_id
                 WHERE s.teacher_id = ?1
                   AND e.status = 'pending'
                   AND e.deleted_at IS NULL
                 ORDER BY e.student_id, e.enrollment_id"
            ))?;

            let rows = stmt
                .query_map([advisor.0], |row| {
                    let student = StudentId(row.get(0)?);
                    let requested_at: DateTime<Utc> = row.get(1)?;
                    let section = section_from_row(row, 2)?;
                    Ok((
                        student,
                        PendingRequest {
                            section: section.id,
                            course_id: section.course_id,
                            semester: section.semester,
                            credits: section.credits,
                            slot: section.slot,
                            requested_at,
                        },
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok::<_, StoreError>(rows)
        })?;

        let mut groups: Vec<StudentPendingGroup> = Vec::new();
        for (student, request) in rows {
            match groups.last_mut() {
                Some(group) if group.student == student => group.requests.push(request),
                _ => groups.push(StudentPendingGroup {
                    student,
                    requests: vec![request],
                }),
            }
        }

        Ok(groups)
    }

    /// Inserts one pending record per section in a single transaction.
    pub fn insert_pending_records(
        &self,
        student: StudentId,
        sections: &[SectionId],
    ) -> Result<Vec<EnrollmentRecord>, StoreError> {
        self.with_transaction(|tx| insert_pending_on(tx, student, sections))
    }
}

fn run_in_transaction<T, E>(
    conn: &mut Connection,
    f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<StoreError>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(StoreError::from)?;
    let out = f(&tx)?;
    tx.commit().map_err(StoreError::from)?;
    Ok(out)
}

impl Drop for EnrollmentDb {
    fn drop(&mut self) {
        if !self.scratch {
            return;
        }

        if let Ok(idle) = self.idle.get_mut() {
            idle.clear();
        }
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            if let Err(e) = std::fs::remove_file(&file) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = ?file, error = %e, "Failed to remove scratch database");
                }
            }
        }
    }
}

/// Moves the live pending record of a pair to `to`. Returns the number of
/// rows changed (0 if there was no pending record).
pub(crate) fn transition_pending_on(
    db: &Connection,
    student: StudentId,
    section: SectionId,
    to: EnrollmentStatus,
) -> Result<usize, StoreError> {
    let changed = db.execute(
        "UPDATE enrollments SET status = ?3, updated_at = ?4
         WHERE student_id = ?1 AND section_id = ?2
           AND status = 'pending' AND deleted_at IS NULL",
        params![student.0, section.0, to.as_str(), Utc::now()],
    )?;
    Ok(changed)
}

/// Soft-deletes the pending record of a pair. Returns the number of rows changed.
pub(crate) fn withdraw_pending_on(
    db: &Connection,
    student: StudentId,
    section: SectionId,
) -> Result<usize, StoreError> {
    let now = Utc::now();
    let changed = db.execute(
        "UPDATE enrollments SET deleted_at = ?3, updated_at = ?3
         WHERE student_id = ?1 AND section_id = ?2
           AND status = 'pending' AND deleted_at IS NULL",
        params![student.0, section.0, now],
    )?;
    Ok(changed)
}

pub(crate) fn get_section_on(
    db: &Connection,
    section: SectionId,
) -> Result<Option<SectionOffering>, StoreError> {
    let section = db
        .query_row(
            &format!(
                "SELECT {SECTION_COLUMNS} FROM sections s
                 WHERE s.section_id = ?1 AND s.deleted_at IS NULL"
            ),
            [section.0],
            |row| section_from_row(row, 0),
        )
        .optional()?;
    Ok(section)
}

pub(crate) fn latest_record_on(
    db: &Connection,
    student: StudentId,
    section: SectionId,
) -> Result<Option<EnrollmentRecord>, StoreError> {
    let record = db
        .query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM enrollments e
                 WHERE e.student_id = ?1 AND e.section_id = ?2 AND e.deleted_at IS NULL
                 ORDER BY e.enrollment_id DESC
                 LIMIT 1"
            ),
            params![student.0, section.0],
            |row| record_from_row(row, 0),
        )
        .optional()?;
    Ok(record)
}

/// Inserts one pending record per section on an existing connection. Run it
/// inside a transaction to make the batch all-or-nothing.
pub(crate) fn insert_pending_on(
    conn: &Connection,
    student: StudentId,
    sections: &[SectionId],
) -> Result<Vec<EnrollmentRecord>, StoreError> {
    let now = Utc::now();
    let mut stmt = conn.prepare(
        "INSERT INTO enrollments (student_id, section_id, status, created_at, updated_at)
         VALUES (?1, ?2, 'pending', ?3, ?3)",
    )?;

    let mut records = Vec::with_capacity(sections.len());
    for section in sections {
        stmt.execute(params![student.0, section.0, now])?;
        records.push(EnrollmentRecord {
            student,
            section: *section,
            status: EnrollmentStatus::Pending,
            created_at: now,
            updated_at: now,
        });
    }

    Ok(records)
}

fn record_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<EnrollmentRecord> {
    let status: String = row.get(offset + 2)?;
    let status = status
        .parse::<EnrollmentStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(offset + 2, Type::Text, e.into()))?;

    Ok(EnrollmentRecord {
        student: StudentId(row.get(offset)?),
        section: SectionId(row.get(offset + 1)?),
        status,
        created_at: row.get(offset + 3)?,
        updated_at: row.get(offset + 4)?,
    })
}

fn section_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<SectionOffering> {
    let day_idx = offset + 7;
    let day_number: u32 = row.get(day_idx)?;
    let start_min: u32 = row.get(offset + 8)?;
    let end_min: u32 = row.get(offset + 9)?;

    let day = weekday_from_number(day_number).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            day_idx,
            Type::Integer,
            format!("day {day_number} out of range").into(),
        )
    })?;
    let slot = TimeSlot::from_hm(day, (start_min / 60, start_min % 60), (end_min / 60, end_min % 60))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(day_idx, Type::Integer, Box::new(e)))?;

    Ok(SectionOffering {
        id: SectionId(row.get(offset)?),
        course_id: row.get(offset + 1)?,
        semester: SemesterId(row.get(offset + 2)?),
        teacher: AdvisorId(row.get(offset + 3)?),
        credits: row.get(offset + 4)?,
        quota: row.get(offset + 5)?,
        reserved: row.get(offset + 6)?,
        slot,
        active: row.get(offset + 10)?,
    })
}
