//! Course-registration enrollment and approval engine.
//!
//! Students submit all-or-nothing requests for a set of sections; each
//! accepted section holds a seat while it waits for the advisor who teaches
//! it to approve or reject it.

pub mod config;
pub mod db;
pub mod engine;
pub mod ledger;
pub mod logging;
pub mod notify;
pub mod schedule;
pub mod server;
pub mod types;
