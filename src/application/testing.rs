//! In-process collaborators for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::domain::{
    AppError, Connectivity, EntityKind, EntitySnapshot, PendingOperation, Result, SyncMeta,
};
use crate::infrastructure::{DurableStore, LocalStorage, Reachability, RemoteBackend};

/// In-memory SQLite store whose operations can be made to fail.
pub struct FlakyStore {
    inner: LocalStorage,
    failing: AtomicBool,
    /// Only entity slot writes fail; the operation log keeps working.
    failing_entity_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: LocalStorage::open_in_memory().unwrap(),
            failing: AtomicBool::new(false),
            failing_entity_writes: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_entity_writes(&self, failing: bool) {
        self.failing_entity_writes.store(failing, Ordering::SeqCst);
    }

    fn check_entity_write(&self) -> Result<()> {
        if self.failing_entity_writes.load(Ordering::SeqCst) {
            return Err(AppError::storage_msg("injected entity write failure"));
        }
        self.check()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(AppError::storage_msg("injected storage failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn get(&self, kind: EntityKind) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(kind).await
    }

    async fn put(&self, kind: EntityKind, payload: String) -> Result<()> {
        self.check_entity_write()?;
        self.inner.put(kind, payload).await
    }

    async fn remove(&self, kind: EntityKind) -> Result<()> {
        self.check_entity_write()?;
        self.inner.remove(kind).await
    }

    async fn append_operation(&self, op: &PendingOperation) -> Result<()> {
        self.check()?;
        self.inner.append_operation(op).await
    }

    async fn load_operations(&self) -> Result<Vec<PendingOperation>> {
        self.check()?;
        self.inner.load_operations().await
    }

    async fn remove_operations_through(&self, through: u64) -> Result<usize> {
        self.check()?;
        self.inner.remove_operations_through(through).await
    }

    async fn clear_operations(&self) -> Result<usize> {
        self.check()?;
        self.inner.clear_operations().await
    }

    async fn load_sync_meta(&self) -> Result<SyncMeta> {
        self.check()?;
        self.inner.load_sync_meta().await
    }

    async fn save_sync_meta(&self, meta: &SyncMeta) -> Result<()> {
        self.check()?;
        self.inner.save_sync_meta(meta).await
    }
}

/// Scriptable remote backend that records what it was sent.
#[derive(Default)]
pub struct FakeRemote {
    /// Sequence numbers of every submit attempt, in call order.
    pub attempts: Mutex<Vec<u64>>,
    /// Submits of this seq fail.
    pub fail_on_seq: Mutex<Option<u64>>,
    /// Every pull fails while set.
    pub fail_pulls: AtomicBool,
    /// Submits never complete while set.
    pub hang: AtomicBool,
    pub snapshots: Mutex<HashMap<EntityKind, EntitySnapshot>>,
    gate: Option<Gate>,
}

/// Holds submits until released, signalling when one is waiting.
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let remote = Self {
            gate: Some(Gate {
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            }),
            ..Self::default()
        };
        (remote, entered, release)
    }

    pub fn fail_on(&self, seq: Option<u64>) {
        *self.fail_on_seq.lock().unwrap() = seq;
    }

    pub fn serve(&self, snapshot: EntitySnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.kind(), snapshot);
    }

    pub fn attempts(&self) -> Vec<u64> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteBackend for FakeRemote {
    async fn submit(&self, op: &PendingOperation) -> Result<()> {
        self.attempts.lock().unwrap().push(op.seq);

        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if *self.fail_on_seq.lock().unwrap() == Some(op.seq) {
            return Err(AppError::sync_msg(format!("rejected #{}", op.seq)));
        }
        Ok(())
    }

    async fn pull(&self, kind: EntityKind) -> Result<EntitySnapshot> {
        if self.fail_pulls.load(Ordering::SeqCst) {
            return Err(AppError::sync_msg(format!("pull {kind} failed")));
        }
        if let Some(snapshot) = self.snapshots.lock().unwrap().get(&kind) {
            return Ok(snapshot.clone());
        }
        EntitySnapshot::from_json(kind, serde_json::Value::Null)
    }
}

/// Reachability answer that tests can flip.
pub struct SwitchReachability(AtomicBool);

impl SwitchReachability {
    pub fn new(status: Connectivity) -> Self {
        Self(AtomicBool::new(status.is_online()))
    }

    pub fn set(&self, status: Connectivity) {
        self.0.store(status.is_online(), Ordering::SeqCst);
    }
}

#[async_trait]
impl Reachability for SwitchReachability {
    async fn probe(&self) -> Connectivity {
        if self.0.load(Ordering::SeqCst) {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }
}
