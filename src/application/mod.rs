//! Application layer - the offline-first sync core.
//!
//! Owns the pending operation queue, connectivity tracking, the in-memory
//! domain cache and the sync coordinator, plus CLI output formatting.

pub mod connectivity;
pub mod domain_cache;
pub mod formatter;
pub mod pending_queue;
pub mod sync_coordinator;

#[cfg(test)]
pub(crate) mod testing;

pub use connectivity::ConnectivityMonitor;
pub use domain_cache::{CacheSummary, DomainCache, MutationOutcome};
pub use formatter::OutputFormat;
pub use pending_queue::PendingQueue;
pub use sync_coordinator::SyncCoordinator;
