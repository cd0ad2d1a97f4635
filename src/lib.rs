//! Agrisync - offline-first sync core for farm records.
//!
//! Cached records live in a local `SQLite` store and in memory; changes made
//! while offline are queued durably and replayed in order once the server is
//! reachable.

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
