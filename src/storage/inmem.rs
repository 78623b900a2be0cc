// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::storage::{Path, PatchOp, Store, StorageError, Transaction, TxnParams};
use crate::value::Value;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

/// Write leases currently held, keyed by transaction id.
#[derive(Default)]
struct LeaseTable {
    held: Mutex<BTreeMap<u64, Path>>,
    released: Notify,
}

struct LeaseGuard {
    table: Arc<LeaseTable>,
    id: u64,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.table.held.lock().remove(&self.id);
        self.table.released.notify_waiters();
    }
}

impl LeaseTable {
    async fn acquire(self: &Arc<Self>, id: u64, path: &Path) -> LeaseGuard {
        loop {
            // Register interest before checking so that a release between
            // the check and the await is not missed.
            let released = self.released.notified();
            {
                let mut held = self.held.lock();
                if !held.values().any(|p| p.overlaps(path)) {
                    held.insert(id, path.clone());
                    return LeaseGuard {
                        table: self.clone(),
                        id,
                    };
                }
            }
            tracing::trace!(txn = id, path = %path, "waiting for overlapping writer");
            released.await;
        }
    }
}

/// A store that keeps the whole data tree in memory.
///
/// Reads operate on a snapshot taken when the transaction begins. Commits
/// replay the transaction's write log onto the latest tree, so writers on
/// disjoint subtrees never lose each other's updates.
pub struct InMemoryStore {
    root: RwLock<Value>,
    leases: Arc<LeaseTable>,
    next_txn: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> InMemoryStore {
        Self::from_value(Value::new_object())
    }

    /// Create a store seeded with `data`, which must be an object.
    pub fn from_value(data: Value) -> InMemoryStore {
        let root = if data.is_object() {
            data
        } else {
            Value::new_object()
        };
        InMemoryStore {
            root: RwLock::new(root),
            leases: Arc::new(LeaseTable::default()),
            next_txn: AtomicU64::new(1),
        }
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<InMemoryStore> {
        let data = Value::from_json_str(json)?;
        if !data.is_object() {
            anyhow::bail!("initial data must be a JSON object");
        }
        Ok(Self::from_value(data))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self, params: TxnParams) -> Result<Transaction, StorageError> {
        let id = self.next_txn.fetch_add(1, Ordering::Relaxed);
        let lease: Option<Box<dyn Send + Sync>> = if params.write {
            Some(Box::new(self.leases.acquire(id, &params.path).await))
        } else {
            None
        };
        // Snapshot only after the lease is held so that the previous
        // overlapping writer's commit is visible.
        let snapshot = self.root.read().clone();
        tracing::debug!(txn = id, write = params.write, path = %params.path, "begin");
        Ok(Transaction::new(id, params, snapshot, lease))
    }

    fn read(&self, txn: &Transaction, path: &Path) -> Result<Value, StorageError> {
        txn.read(path)
    }

    fn write(
        &self,
        txn: &mut Transaction,
        op: PatchOp,
        path: &Path,
        value: Value,
    ) -> Result<(), StorageError> {
        tracing::trace!(txn = txn.id(), %op, path = %path, "write");
        txn.patch(op, path, value)
    }

    fn make_dir(&self, txn: &mut Transaction, path: &Path) -> Result<(), StorageError> {
        txn.make_dir(path)
    }

    fn commit(&self, mut txn: Transaction) -> Result<(), StorageError> {
        if txn.is_dirty() {
            let mut root = self.root.write();
            let mut next = root.clone();
            txn.replay(&mut next)?;
            *root = next;
        }
        tracing::debug!(txn = txn.id(), "commit");
        txn.release();
        Ok(())
    }

    fn abort(&self, mut txn: Transaction) {
        tracing::debug!(txn = txn.id(), "abort");
        txn.release();
    }
}
