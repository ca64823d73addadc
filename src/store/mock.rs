//! # Fault injection
//!
//! [`FaultyStore`] wraps any [`DocumentStore`], records every call that reaches it and replays
//! scripted failures. It is what the service and transaction tests use to force an insert to
//! fail mid-transaction, simulate write conflicts, or prove a request never touched the store.
//!
//! ```ignore
//! let store = FaultyStore::wrap(MemoryStore::spawn());
//! store.fail_next(StoreOp::Insert, StoreError::TransientConflict("busy".into()));
//!
//! // ... exercise code holding `store.handle()` ...
//!
//! assert_eq!(store.calls_of(StoreOp::Insert), 2);
//! store.verify(); // every scripted failure was consumed
//! ```

use super::{
    Document, DocumentStore, Filter, ObjectId, Patch, StoreError, StoreHandle, TxnId, UpdateResult,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Store operations that can be observed and scripted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Ping,
    Insert,
    FindById,
    UpdateById,
    DeleteById,
    UpdateMany,
    Begin,
    Commit,
    Abort,
}

#[derive(Default)]
struct Script {
    calls: Vec<StoreOp>,
    failures: HashMap<StoreOp, VecDeque<StoreError>>,
}

/// Recording wrapper with scripted failures. Clones share the same script.
#[derive(Clone)]
pub struct FaultyStore {
    inner: StoreHandle,
    script: Arc<Mutex<Script>>,
}

impl FaultyStore {
    pub fn wrap(inner: impl DocumentStore) -> Self {
        Self::over(Arc::new(inner))
    }

    pub fn over(inner: StoreHandle) -> Self {
        Self {
            inner,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// The wrapper as a shared handle, ready to inject into services.
    pub fn handle(&self) -> StoreHandle {
        Arc::new(self.clone())
    }

    /// The next call of `op` fails with `error` without reaching the wrapped store.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.fail_times(op, 1, error);
    }

    /// The next `times` calls of `op` fail with `error`.
    pub fn fail_times(&self, op: StoreOp, times: usize, error: StoreError) {
        let mut script = self.script.lock().unwrap();
        let queue = script.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<StoreOp> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn calls_of(&self, op: StoreOp) -> usize {
        self.calls().into_iter().filter(|c| *c == op).count()
    }

    /// Panics if a scripted failure was never consumed.
    pub fn verify(&self) {
        let script = self.script.lock().unwrap();
        let remaining: usize = script.failures.values().map(VecDeque::len).sum();
        if remaining > 0 {
            panic!("Not all scripted failures were triggered. {} remaining", remaining);
        }
    }

    fn record(&self, op: StoreOp) -> Result<(), StoreError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(op);
        match script.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.record(StoreOp::Ping)?;
        self.inner.ping().await
    }

    async fn insert(
        &self,
        namespace: &str,
        doc: Document,
        txn: Option<TxnId>,
    ) -> Result<ObjectId, StoreError> {
        self.record(StoreOp::Insert)?;
        self.inner.insert(namespace, doc, txn).await
    }

    async fn find_by_id(
        &self,
        namespace: &str,
        id: ObjectId,
    ) -> Result<Option<Document>, StoreError> {
        self.record(StoreOp::FindById)?;
        self.inner.find_by_id(namespace, id).await
    }

    async fn update_by_id(
        &self,
        namespace: &str,
        id: ObjectId,
        patch: Patch,
        txn: Option<TxnId>,
    ) -> Result<UpdateResult, StoreError> {
        self.record(StoreOp::UpdateById)?;
        self.inner.update_by_id(namespace, id, patch, txn).await
    }

    async fn delete_by_id(
        &self,
        namespace: &str,
        id: ObjectId,
        txn: Option<TxnId>,
    ) -> Result<u64, StoreError> {
        self.record(StoreOp::DeleteById)?;
        self.inner.delete_by_id(namespace, id, txn).await
    }

    async fn update_many(
        &self,
        namespace: &str,
        filter: Filter,
        patch: Patch,
    ) -> Result<UpdateResult, StoreError> {
        self.record(StoreOp::UpdateMany)?;
        self.inner.update_many(namespace, filter, patch).await
    }

    async fn begin_transaction(&self) -> Result<TxnId, StoreError> {
        self.record(StoreOp::Begin)?;
        self.inner.begin_transaction().await
    }

    async fn commit_transaction(&self, txn: TxnId) -> Result<(), StoreError> {
        self.record(StoreOp::Commit)?;
        self.inner.commit_transaction(txn).await
    }

    async fn abort_transaction(&self, txn: TxnId) -> Result<(), StoreError> {
        self.record(StoreOp::Abort)?;
        self.inner.abort_transaction(txn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_records_calls_and_replays_failures_once() {
        let store = FaultyStore::wrap(MemoryStore::spawn());
        store.fail_next(StoreOp::Ping, StoreError::Unavailable("down".into()));

        assert!(store.ping().await.is_err());
        assert!(store.ping().await.is_ok());
        assert_eq!(store.calls(), vec![StoreOp::Ping, StoreOp::Ping]);
        store.verify();
    }

    #[tokio::test]
    #[should_panic(expected = "Not all scripted failures were triggered")]
    async fn test_verify_catches_unused_script() {
        let store = FaultyStore::wrap(MemoryStore::spawn());
        store.fail_next(StoreOp::Insert, StoreError::WriteRejected("no".into()));
        store.verify();
    }
}
