//! Online/offline tracking.
//!
//! The monitor is edge-triggered: repeated identical platform events are
//! dropped, so listeners see exactly one notification per real transition.

use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;

use crate::domain::Connectivity;
use crate::infrastructure::Reachability;

type Listener = Box<dyn Fn(Connectivity) + Send + Sync>;

/// Tracks connectivity and fans transitions out to listeners.
pub struct ConnectivityMonitor {
    tx: watch::Sender<Connectivity>,
    listeners: Mutex<Vec<Listener>>,
}

impl ConnectivityMonitor {
    /// Create a monitor starting at `initial`.
    #[must_use]
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Create a monitor whose initial status is sampled from the platform signal.
    pub async fn sample(reachability: &dyn Reachability) -> Self {
        let initial = reachability.probe().await;
        tracing::debug!(status = %initial, "Initial connectivity");
        Self::new(initial)
    }

    #[must_use]
    pub fn current_status(&self) -> Connectivity {
        *self.tx.borrow()
    }

    /// Feed a platform connectivity event. Returns whether it was a transition.
    ///
    /// Listeners run synchronously on the reporting task and must not call
    /// `report` or `on_change` themselves.
    pub fn report(&self, status: Connectivity) -> bool {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if changed {
            tracing::info!(status = %status, "Connectivity changed");
            for listener in listeners.iter() {
                listener(status);
            }
        } else {
            tracing::trace!(status = %status, "Duplicate connectivity event ignored");
        }

        changed
    }

    /// Register a callback invoked once per transition.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(Connectivity) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Async view of the status; the receiver wakes on transitions only.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}
