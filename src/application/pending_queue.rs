//! Durable FIFO of mutations awaiting server confirmation.
//!
//! Every path (enqueue, snapshot, acknowledge, clear) runs under one async
//! mutex, so an enqueue racing a sync lands strictly after the snapshot the
//! sync is replaying and is never lost or submitted twice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Mutation, PendingOperation, Result};
use crate::infrastructure::DurableStore;

struct QueueState {
    operations: Vec<PendingOperation>,
    next_seq: u64,
    last_created: Option<DateTime<Utc>>,
}

/// Ordered, durable log of pending operations.
pub struct PendingQueue {
    store: Arc<dyn DurableStore>,
    state: Mutex<QueueState>,
}

impl PendingQueue {
    /// Restore the queue persisted in `store`.
    ///
    /// # Errors
    /// Returns error if the stored operations cannot be read.
    pub async fn load(store: Arc<dyn DurableStore>) -> Result<Self> {
        let operations = store.load_operations().await?;
        let next_seq = operations.last().map_or(1, |op| op.seq + 1);
        let last_created = operations.last().map(|op| op.created_at);

        if !operations.is_empty() {
            tracing::info!(pending = operations.len(), "Restored pending operations");
        }

        Ok(Self {
            store,
            state: Mutex::new(QueueState {
                operations,
                next_seq,
                last_created,
            }),
        })
    }

    /// Append `mutation`, returning once it is durably stored.
    ///
    /// # Errors
    /// Returns a validation error if the payload could not be restored from
    /// the store, or a storage error if the write fails; the queue is
    /// unchanged in both cases.
    pub async fn enqueue(&self, mutation: Mutation) -> Result<PendingOperation> {
        mutation.validate()?;
        let mut state = self.state.lock().await;

        // Creation time never goes backwards, even if the wall clock does.
        let now = Utc::now();
        let created_at = state.last_created.map_or(now, |last| last.max(now));

        let op = PendingOperation {
            id: Uuid::new_v4(),
            seq: state.next_seq,
            created_at,
            mutation,
        };

        self.store.append_operation(&op).await?;

        state.next_seq += 1;
        state.last_created = Some(created_at);
        state.operations.push(op.clone());

        tracing::debug!(
            seq = op.seq,
            kind = op.mutation.label(),
            pending = state.operations.len(),
            "Operation queued"
        );

        Ok(op)
    }

    /// Snapshot of all pending operations, oldest first. Nothing is removed.
    pub async fn drain(&self) -> Vec<PendingOperation> {
        self.state.lock().await.operations.clone()
    }

    /// Remove the operations up to and including `through_seq` after the
    /// server confirmed them. Later operations stay queued.
    ///
    /// # Errors
    /// Returns a storage error if the delete fails; nothing is removed then.
    pub async fn acknowledge(&self, through_seq: u64) -> Result<usize> {
        let mut state = self.state.lock().await;

        self.store.remove_operations_through(through_seq).await?;

        let before = state.operations.len();
        state.operations.retain(|op| op.seq > through_seq);
        Ok(before - state.operations.len())
    }

    /// Remove every pending operation, all or nothing.
    ///
    /// # Errors
    /// Returns a storage error if the delete fails; nothing is removed then.
    pub async fn clear(&self) -> Result<usize> {
        let mut state = self.state.lock().await;

        self.store.clear_operations().await?;

        let removed = state.operations.len();
        state.operations.clear();
        tracing::info!(removed, "Pending operations cleared");
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.operations.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::FlakyStore;
    use crate::infrastructure::LocalStorage;

    fn remove_farm(id: &str) -> Mutation {
        Mutation::RemoveFarm {
            farm_id: id.to_string(),
        }
    }

    async fn queue() -> (Arc<FlakyStore>, PendingQueue) {
        let store = Arc::new(FlakyStore::new());
        let queue = PendingQueue::load(store.clone()).await.unwrap();
        (store, queue)
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let (_, queue) = queue().await;
        for id in ["a", "b", "c"] {
            queue.enqueue(remove_farm(id)).await.unwrap();
        }

        let ops = queue.drain().await;
        let seqs: Vec<u64> = ops.iter().map(|op| op.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(ops[0].mutation, remove_farm("a"));
        assert_eq!(ops[2].mutation, remove_farm("c"));
        assert!(ops.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        // drain does not remove
        assert_eq!(queue.len().await, 3);
    }

    #[tokio::test]
    async fn test_drain_clear_drain_is_empty() {
        let (_, queue) = queue().await;
        queue.enqueue(remove_farm("a")).await.unwrap();
        queue.enqueue(remove_farm("b")).await.unwrap();

        assert_eq!(queue.drain().await.len(), 2);
        assert_eq!(queue.clear().await.unwrap(), 2);
        assert!(queue.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_keeps_later_operations() {
        let (_, queue) = queue().await;
        queue.enqueue(remove_farm("a")).await.unwrap();
        queue.enqueue(remove_farm("b")).await.unwrap();
        let snapshot = queue.drain().await;
        queue.enqueue(remove_farm("late")).await.unwrap();

        let removed = queue.acknowledge(snapshot.last().unwrap().seq).await.unwrap();
        assert_eq!(removed, 2);

        let remaining = queue.drain().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].mutation, remove_farm("late"));
    }

    #[tokio::test]
    async fn test_failed_enqueue_leaves_queue_unchanged() {
        let (store, queue) = queue().await;
        queue.enqueue(remove_farm("a")).await.unwrap();

        store.set_failing(true);
        assert!(queue.enqueue(remove_farm("b")).await.unwrap_err().is_storage());
        store.set_failing(false);

        let op = queue.enqueue(remove_farm("c")).await.unwrap();
        assert_eq!(op.seq, 2);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_clear_is_all_or_nothing() {
        let (store, queue) = queue().await;
        queue.enqueue(remove_farm("a")).await.unwrap();
        queue.enqueue(remove_farm("b")).await.unwrap();

        store.set_failing(true);
        assert!(queue.clear().await.is_err());
        store.set_failing(false);

        assert_eq!(queue.len().await, 2);
        assert_eq!(store.load_operations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unstorable_mutation_is_rejected() {
        let (store, queue) = queue().await;
        queue.enqueue(remove_farm("a")).await.unwrap();

        let user = crate::domain::User {
            id: "u1".into(),
            name: "Amina".into(),
            email: String::new(),
            phone: String::new(),
            farmer_type: crate::domain::FarmerType::Smallholder,
            location: crate::domain::Location {
                latitude: f64::NAN,
                longitude: 0.0,
                address: String::new(),
            },
            profile_complete: false,
        };
        let err = queue
            .enqueue(Mutation::UpdateProfile { user })
            .await
            .unwrap_err();
        assert!(matches!(err, crate::domain::AppError::Validation { .. }));

        // Nothing reached the store, so a restart still loads cleanly.
        let reloaded = PendingQueue::load(store).await.unwrap();
        assert_eq!(reloaded.len().await, 1);
        assert_eq!(reloaded.enqueue(remove_farm("b")).await.unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_reload_continues_sequence() {
        let storage: Arc<dyn DurableStore> = Arc::new(LocalStorage::open_in_memory().unwrap());
        {
            let queue = PendingQueue::load(Arc::clone(&storage)).await.unwrap();
            queue.enqueue(remove_farm("a")).await.unwrap();
            queue.enqueue(remove_farm("b")).await.unwrap();
        }

        let queue = PendingQueue::load(storage).await.unwrap();
        assert_eq!(queue.len().await, 2);
        let op = queue.enqueue(remove_farm("c")).await.unwrap();
        assert_eq!(op.seq, 3);
    }
}
