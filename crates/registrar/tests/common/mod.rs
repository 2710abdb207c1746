//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use futures::future::{self, BoxFuture, FutureExt};
use registrar::db::{AdvisorId, EnrollmentDb, SectionId, SectionOffering, SemesterId};
use registrar::engine::{EngineSettings, RegistrarEngine};
use registrar::notify::{Notification, Notifier, NotifyError};
use std::sync::{Arc, Mutex};

pub const TEACHER: AdvisorId = AdvisorId(42);

/// Keeps every delivered notification.
#[derive(Default)]
pub struct CapturingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl Notifier for CapturingNotifier {
    fn deliver(&self, notification: Notification) -> BoxFuture<'static, Result<(), NotifyError>> {
        self.sent.lock().unwrap().push(notification);
        future::ready(Ok(())).boxed()
    }
}

pub fn fa24() -> SemesterId {
    SemesterId::new("FA24")
}

/// Builds a FA24 section taught by [`TEACHER`].
pub fn section(id: i64, slot: &str, credits: u32, quota: u32) -> SectionOffering {
    SectionOffering {
        id: SectionId(id),
        course_id: format!("CSE {}", 100 + id),
        semester: fa24(),
        teacher: TEACHER,
        credits,
        quota,
        reserved: 0,
        slot: slot.parse().unwrap(),
        active: true,
    }
}

pub fn engine(catalog: &[SectionOffering]) -> (Arc<RegistrarEngine>, Arc<CapturingNotifier>) {
    engine_with_settings(catalog, EngineSettings::default())
}

pub fn engine_with_settings(
    catalog: &[SectionOffering],
    settings: EngineSettings,
) -> (Arc<RegistrarEngine>, Arc<CapturingNotifier>) {
    let (engine, notifier) = build_engine(catalog, settings);
    (Arc::new(engine), notifier)
}

/// Engine over a fresh scratch store seeded with `catalog`.
pub fn build_engine(
    catalog: &[SectionOffering],
    settings: EngineSettings,
) -> (RegistrarEngine, Arc<CapturingNotifier>) {
    registrar::logging::init_test();

    let db = Arc::new(EnrollmentDb::open_scratch().unwrap());
    for s in catalog {
        db.upsert_section(s).unwrap();
    }
    let notifier = Arc::new(CapturingNotifier::default());
    let engine = RegistrarEngine::new(db, notifier.clone(), settings);
    (engine, notifier)
}

pub fn reserved(engine: &RegistrarEngine, section: i64) -> u32 {
    engine
        .ledger()
        .occupancy(SectionId(section))
        .unwrap()
        .unwrap()
        .reserved
}
