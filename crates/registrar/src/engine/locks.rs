//! Per-student serialisation of engine operations.

use crate::db::StudentId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock table keyed by student.
///
/// Conflict and credit checks read the student's schedule and then act on
/// it; holding the student's lock across read and write keeps two requests
/// from the same student from both passing the checks. Requests from
/// different students never wait on each other here.
#[derive(Default)]
pub struct StudentLocks {
    locks: DashMap<StudentId, Arc<Mutex<()>>>,
}

impl StudentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets or creates the lock for the given student.
    pub fn get(&self, student: StudentId) -> Arc<Mutex<()>> {
        self.locks
            .entry(student)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Waits for the student's lock.
    pub async fn acquire(&self, student: StudentId) -> OwnedMutexGuard<()> {
        self.get(student).lock_owned().await
    }

    /// Drops lock entries nobody is holding or waiting on.
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Returns the number of tracked students.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
