//! Seat accounting for sections.
//!
//! The `reserved` column of a section is written by exactly two statements,
//! both in this module. Each is a single conditional `UPDATE`, so SQLite
//! applies the compare and the increment (or decrement) as one step: two
//! concurrent reservations against the last seat produce one success and one
//! [`LedgerError::CapacityExceeded`], whatever order they arrive in.

use crate::db::{EnrollmentDb, SectionId, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Errors raised by the capacity ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No seat left at the moment of the increment
    #[error("Section {section} is full ({reserved}/{quota} seats reserved)")]
    CapacityExceeded {
        section: SectionId,
        quota: u32,
        reserved: u32,
    },

    /// The section does not exist (or was deleted before a reservation)
    #[error("Section {section} does not exist")]
    SectionMissing { section: SectionId },

    /// A release without a matching reservation. Indicates a bug.
    #[error("Ledger invariant violated for section {section}: {detail}")]
    InvariantViolation { section: SectionId, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Returns true if this error indicates corrupted accounting rather than
    /// an ordinary rejection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::InvariantViolation { .. })
    }
}

/// Current seat usage of one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pub reserved: u32,
    pub quota: u32,
}

/// Atomic reserve/release over section seat counters.
pub struct CapacityLedger {
    db: Arc<EnrollmentDb>,
}

impl CapacityLedger {
    pub fn new(db: Arc<EnrollmentDb>) -> Self {
        Self { db }
    }

    /// Takes one seat in `section`, failing if none is free.
    pub fn reserve(&self, section: SectionId) -> Result<(), LedgerError> {
        self.db.with_conn(|conn| reserve_on(conn, section))
    }

    /// Gives back one seat in `section`.
    pub fn release(&self, section: SectionId) -> Result<(), LedgerError> {
        self.db.with_conn(|conn| release_on(conn, section))
    }

    /// Reads the current counters of a section.
    pub fn occupancy(&self, section: SectionId) -> Result<Option<Occupancy>, LedgerError> {
        self.db.with_conn(|conn| occupancy_on(conn, section))
    }
}

/// Conditional increment. Deleted sections accept no new reservations.
pub(crate) fn reserve_on(conn: &Connection, section: SectionId) -> Result<(), LedgerError> {
    let changed = conn
        .execute(
            "UPDATE sections SET reserved = reserved + 1
             WHERE section_id = ?1 AND deleted_at IS NULL AND reserved < quota",
            params![section.0],
        )
        .map_err(StoreError::from)?;

    if changed == 1 {
        debug!(section = %section, "Reserved seat");
        return Ok(());
    }

    match occupancy_on(conn, section)? {
        Some(Occupancy { reserved, quota }) => Err(LedgerError::CapacityExceeded {
            section,
            quota,
            reserved,
        }),
        None => Err(LedgerError::SectionMissing { section }),
    }
}

/// Conditional decrement. Works on deleted sections so their seats can
/// still be given back.
pub(crate) fn release_on(conn: &Connection, section: SectionId) -> Result<(), LedgerError> {
    let changed = conn
        .execute(
            "UPDATE sections SET reserved = reserved - 1
             WHERE section_id = ?1 AND reserved > 0",
            params![section.0],
        )
        .map_err(StoreError::from)?;

    if changed == 1 {
        debug!(section = %section, "Released seat");
        return Ok(());
    }

    let exists: Option<i64> = conn
        .query_row(
            "SELECT section_id FROM sections WHERE section_id = ?1",
            [section.0],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::from)?;

    if exists.is_none() {
        warn!(section = %section, "Release against unknown section");
        return Err(LedgerError::SectionMissing { section });
    }

    error!(section = %section, "Release would drive reserved count below zero");
    Err(LedgerError::InvariantViolation {
        section,
        detail: "release without a matching reservation".to_string(),
    })
}

fn occupancy_on(conn: &Connection, section: SectionId) -> Result<Option<Occupancy>, LedgerError> {
    let occupancy = conn
        .query_row(
            "SELECT reserved, quota FROM sections WHERE section_id = ?1",
            [section.0],
            |row| {
                Ok(Occupancy {
                    reserved: row.get(0)?,
                    quota: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)?;
    Ok(occupancy)
}
