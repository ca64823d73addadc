//! # In-process document engine
//!
//! [`MemoryStore`] is the client half, [`StoreActor`] the server half. The actor owns every
//! collection and every open transaction and processes requests one at a time, so no `Mutex`
//! guards the data: each request, and in particular each commit, is applied atomically with
//! respect to every other caller.
//!
//! ## Transactions
//!
//! Writes bound to a transaction are staged and applied in order on commit. The first
//! transaction to write a document holds its write lock until it finishes; a second transaction
//! writing the same document gets [`StoreError::TransientConflict`] and is expected to retry.
//! Writes outside any transaction never conflict: they are last-write-wins.

use super::{
    parse_object_id, Document, DocumentStore, Filter, ObjectId, Patch, StoreError, TxnId,
    UpdateResult, ID_FIELD,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type Response<T> = oneshot::Sender<Result<T, StoreError>>;

type Collection = BTreeMap<ObjectId, Document>;

/// Requests understood by the [`StoreActor`].
#[derive(Debug)]
enum StoreRequest {
    Ping {
        respond_to: Response<()>,
    },
    Insert {
        namespace: String,
        doc: Document,
        txn: Option<TxnId>,
        respond_to: Response<ObjectId>,
    },
    FindById {
        namespace: String,
        id: ObjectId,
        respond_to: Response<Option<Document>>,
    },
    UpdateById {
        namespace: String,
        id: ObjectId,
        patch: Patch,
        txn: Option<TxnId>,
        respond_to: Response<UpdateResult>,
    },
    DeleteById {
        namespace: String,
        id: ObjectId,
        txn: Option<TxnId>,
        respond_to: Response<u64>,
    },
    UpdateMany {
        namespace: String,
        filter: Filter,
        patch: Patch,
        respond_to: Response<UpdateResult>,
    },
    Begin {
        respond_to: Response<TxnId>,
    },
    Commit {
        txn: TxnId,
        respond_to: Response<()>,
    },
    Abort {
        txn: TxnId,
        respond_to: Response<()>,
    },
    OpenTransactions {
        respond_to: Response<usize>,
    },
}

#[derive(Debug)]
enum StagedWrite {
    Insert { namespace: String, id: ObjectId, doc: Document },
    Update { namespace: String, id: ObjectId, patch: Patch },
    Delete { namespace: String, id: ObjectId },
}

#[derive(Debug, Default)]
struct OpenTxn {
    writes: Vec<StagedWrite>,
    locked: HashSet<(String, ObjectId)>,
}

impl OpenTxn {
    /// Whether `id` exists as seen from inside this transaction.
    fn sees(&self, committed: bool, namespace: &str, id: ObjectId) -> bool {
        self.writes.iter().fold(committed, |exists, write| match write {
            StagedWrite::Insert { namespace: ns, id: wid, .. } if ns == namespace && *wid == id => {
                true
            }
            StagedWrite::Delete { namespace: ns, id: wid } if ns == namespace && *wid == id => false,
            _ => exists,
        })
    }
}

/// Server half of the engine: owns the data and the receiver end of the channel.
pub struct StoreActor {
    receiver: mpsc::Receiver<StoreRequest>,
    collections: HashMap<String, Collection>,
    transactions: HashMap<TxnId, OpenTxn>,
    next_txn: u64,
}

impl StoreActor {
    /// Runs the request loop until every [`MemoryStore`] clone has been dropped.
    pub async fn run(mut self) {
        info!("Store started");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                StoreRequest::Ping { respond_to } => {
                    let _ = respond_to.send(Ok(()));
                }
                StoreRequest::Insert {
                    namespace,
                    doc,
                    txn,
                    respond_to,
                } => {
                    let result = self.insert(namespace, doc, txn);
                    let _ = respond_to.send(result);
                }
                StoreRequest::FindById {
                    namespace,
                    id,
                    respond_to,
                } => {
                    let doc = self
                        .collections
                        .get(&namespace)
                        .and_then(|c| c.get(&id))
                        .cloned();
                    debug!(%namespace, %id, found = doc.is_some(), "FindById");
                    let _ = respond_to.send(Ok(doc));
                }
                StoreRequest::UpdateById {
                    namespace,
                    id,
                    patch,
                    txn,
                    respond_to,
                } => {
                    let result = self.update_by_id(namespace, id, patch, txn);
                    let _ = respond_to.send(result);
                }
                StoreRequest::DeleteById {
                    namespace,
                    id,
                    txn,
                    respond_to,
                } => {
                    let result = self.delete_by_id(namespace, id, txn);
                    let _ = respond_to.send(result);
                }
                StoreRequest::UpdateMany {
                    namespace,
                    filter,
                    patch,
                    respond_to,
                } => {
                    let mut result = UpdateResult::default();
                    if let Some(collection) = self.collections.get_mut(&namespace) {
                        for doc in collection.values_mut().filter(|d| filter.matches(d)) {
                            result.matched_count += 1;
                            if patch.apply(doc) {
                                result.modified_count += 1;
                            }
                        }
                    }
                    info!(%namespace, matched = result.matched_count, "UpdateMany");
                    let _ = respond_to.send(Ok(result));
                }
                StoreRequest::Begin { respond_to } => {
                    let txn = TxnId(self.next_txn);
                    self.next_txn += 1;
                    self.transactions.insert(txn, OpenTxn::default());
                    debug!(%txn, open = self.transactions.len(), "Begin");
                    let _ = respond_to.send(Ok(txn));
                }
                StoreRequest::Commit { txn, respond_to } => {
                    let result = self.commit(txn);
                    let _ = respond_to.send(result);
                }
                StoreRequest::Abort { txn, respond_to } => {
                    if self.transactions.remove(&txn).is_some() {
                        debug!(%txn, open = self.transactions.len(), "Aborted");
                    }
                    let _ = respond_to.send(Ok(()));
                }
                StoreRequest::OpenTransactions { respond_to } => {
                    let _ = respond_to.send(Ok(self.transactions.len()));
                }
            }
        }

        if !self.transactions.is_empty() {
            warn!(open = self.transactions.len(), "Discarding open transactions");
        }
        info!(collections = self.collections.len(), "Store shutdown");
    }

    fn committed_exists(&self, namespace: &str, id: ObjectId) -> bool {
        self.collections
            .get(namespace)
            .is_some_and(|c| c.contains_key(&id))
    }

    /// Takes the write lock on `(namespace, id)` for `txn`, failing if another transaction holds it.
    fn lock(&mut self, txn: TxnId, namespace: &str, id: ObjectId) -> Result<(), StoreError> {
        let key = (namespace.to_string(), id);
        if let Some((holder, _)) = self
            .transactions
            .iter()
            .find(|(other, open)| **other != txn && open.locked.contains(&key))
        {
            warn!(%txn, %holder, %namespace, %id, "Write conflict");
            return Err(StoreError::TransientConflict(format!(
                "{namespace}/{id} is being written by {holder}"
            )));
        }
        let open = self
            .transactions
            .get_mut(&txn)
            .ok_or(StoreError::UnknownTransaction(txn))?;
        open.locked.insert(key);
        Ok(())
    }

    fn insert(
        &mut self,
        namespace: String,
        mut doc: Document,
        txn: Option<TxnId>,
    ) -> Result<ObjectId, StoreError> {
        let id = match doc.get(ID_FIELD) {
            Some(Value::String(s)) => parse_object_id(s)?,
            Some(other) => {
                return Err(StoreError::WriteRejected(format!(
                    "{ID_FIELD} must be a string, got {other}"
                )))
            }
            None => {
                let id = ObjectId::new();
                doc.insert(ID_FIELD.to_string(), Value::String(id.to_hex()));
                id
            }
        };

        let committed = self.committed_exists(&namespace, id);
        match txn {
            Some(txn) => {
                let open = self
                    .transactions
                    .get(&txn)
                    .ok_or(StoreError::UnknownTransaction(txn))?;
                if open.sees(committed, &namespace, id) {
                    return Err(duplicate_key(&namespace, id));
                }
                self.lock(txn, &namespace, id)?;
                if let Some(open) = self.transactions.get_mut(&txn) {
                    open.writes.push(StagedWrite::Insert { namespace: namespace.clone(), id, doc });
                }
                debug!(%txn, %namespace, %id, "Insert staged");
            }
            None => {
                if committed {
                    return Err(duplicate_key(&namespace, id));
                }
                let collection = self.collections.entry(namespace.clone()).or_default();
                collection.insert(id, doc);
                info!(%namespace, %id, size = collection.len(), "Inserted");
            }
        }
        Ok(id)
    }

    fn update_by_id(
        &mut self,
        namespace: String,
        id: ObjectId,
        patch: Patch,
        txn: Option<TxnId>,
    ) -> Result<UpdateResult, StoreError> {
        let committed = self.committed_exists(&namespace, id);
        match txn {
            Some(txn) => {
                let open = self
                    .transactions
                    .get(&txn)
                    .ok_or(StoreError::UnknownTransaction(txn))?;
                if !open.sees(committed, &namespace, id) {
                    debug!(%txn, %namespace, %id, "Update matched nothing");
                    return Ok(UpdateResult::default());
                }
                self.lock(txn, &namespace, id)?;
                if let Some(open) = self.transactions.get_mut(&txn) {
                    open.writes.push(StagedWrite::Update { namespace: namespace.clone(), id, patch });
                }
                debug!(%txn, %namespace, %id, "Update staged");
                Ok(UpdateResult {
                    matched_count: 1,
                    modified_count: 1,
                })
            }
            None => {
                let Some(doc) = self.collections.get_mut(&namespace).and_then(|c| c.get_mut(&id))
                else {
                    debug!(%namespace, %id, "Update matched nothing");
                    return Ok(UpdateResult::default());
                };
                let modified = patch.apply(doc);
                info!(%namespace, %id, modified, "Updated");
                Ok(UpdateResult {
                    matched_count: 1,
                    modified_count: u64::from(modified),
                })
            }
        }
    }

    fn delete_by_id(
        &mut self,
        namespace: String,
        id: ObjectId,
        txn: Option<TxnId>,
    ) -> Result<u64, StoreError> {
        let committed = self.committed_exists(&namespace, id);
        match txn {
            Some(txn) => {
                let open = self
                    .transactions
                    .get(&txn)
                    .ok_or(StoreError::UnknownTransaction(txn))?;
                if !open.sees(committed, &namespace, id) {
                    return Ok(0);
                }
                self.lock(txn, &namespace, id)?;
                if let Some(open) = self.transactions.get_mut(&txn) {
                    open.writes.push(StagedWrite::Delete { namespace: namespace.clone(), id });
                }
                debug!(%txn, %namespace, %id, "Delete staged");
                Ok(1)
            }
            None => {
                let removed = self
                    .collections
                    .get_mut(&namespace)
                    .and_then(|c| c.remove(&id))
                    .is_some();
                info!(%namespace, %id, removed, "Deleted");
                Ok(u64::from(removed))
            }
        }
    }

    fn commit(&mut self, txn: TxnId) -> Result<(), StoreError> {
        let open = self
            .transactions
            .remove(&txn)
            .ok_or(StoreError::UnknownTransaction(txn))?;
        let writes = open.writes.len();
        for write in open.writes {
            match write {
                StagedWrite::Insert { namespace, id, doc } => {
                    self.collections.entry(namespace).or_default().insert(id, doc);
                }
                StagedWrite::Update { namespace, id, patch } => {
                    // A plain write may have removed the document since it was staged.
                    if let Some(doc) = self.collections.get_mut(&namespace).and_then(|c| c.get_mut(&id)) {
                        patch.apply(doc);
                    }
                }
                StagedWrite::Delete { namespace, id } => {
                    if let Some(collection) = self.collections.get_mut(&namespace) {
                        collection.remove(&id);
                    }
                }
            }
        }
        info!(%txn, writes, open = self.transactions.len(), "Committed");
        Ok(())
    }
}

fn duplicate_key(namespace: &str, id: ObjectId) -> StoreError {
    StoreError::WriteRejected(format!("duplicate key {ID_FIELD}={id} in {namespace}"))
}

/// Client half of the engine. Cheap to clone; every clone talks to the same [`StoreActor`].
#[derive(Clone)]
pub struct MemoryStore {
    sender: mpsc::Sender<StoreRequest>,
}

impl MemoryStore {
    /// Creates the engine. The caller spawns [`StoreActor::run`] on the runtime.
    pub fn new(buffer_size: usize) -> (StoreActor, MemoryStore) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = StoreActor {
            receiver,
            collections: HashMap::new(),
            transactions: HashMap::new(),
            next_txn: 1,
        };
        (actor, MemoryStore { sender })
    }

    /// Creates the engine and spawns its actor on the current runtime.
    pub fn spawn() -> MemoryStore {
        let (actor, store) = Self::new(256);
        tokio::spawn(actor.run());
        store
    }

    /// Number of transactions neither committed nor aborted.
    pub async fn open_transactions(&self) -> Result<usize, StoreError> {
        self.request(|respond_to| StoreRequest::OpenTransactions { respond_to })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Response<T>) -> StoreRequest,
    ) -> Result<T, StoreError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| StoreError::Unavailable("store closed".into()))?;
        response
            .await
            .map_err(|_| StoreError::Unavailable("store dropped the request".into()))?
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.request(|respond_to| StoreRequest::Ping { respond_to }).await
    }

    async fn insert(
        &self,
        namespace: &str,
        doc: Document,
        txn: Option<TxnId>,
    ) -> Result<ObjectId, StoreError> {
        let namespace = namespace.to_string();
        self.request(|respond_to| StoreRequest::Insert {
            namespace,
            doc,
            txn,
            respond_to,
        })
        .await
    }

    async fn find_by_id(
        &self,
        namespace: &str,
        id: ObjectId,
    ) -> Result<Option<Document>, StoreError> {
        let namespace = namespace.to_string();
        self.request(|respond_to| StoreRequest::FindById {
            namespace,
            id,
            respond_to,
        })
        .await
    }

    async fn update_by_id(
        &self,
        namespace: &str,
        id: ObjectId,
        patch: Patch,
        txn: Option<TxnId>,
    ) -> Result<UpdateResult, StoreError> {
        let namespace = namespace.to_string();
        self.request(|respond_to| StoreRequest::UpdateById {
            namespace,
            id,
            patch,
            txn,
            respond_to,
        })
        .await
    }

    async fn delete_by_id(
        &self,
        namespace: &str,
        id: ObjectId,
        txn: Option<TxnId>,
    ) -> Result<u64, StoreError> {
        let namespace = namespace.to_string();
        self.request(|respond_to| StoreRequest::DeleteById {
            namespace,
            id,
            txn,
            respond_to,
        })
        .await
    }

    async fn update_many(
        &self,
        namespace: &str,
        filter: Filter,
        patch: Patch,
    ) -> Result<UpdateResult, StoreError> {
        let namespace = namespace.to_string();
        self.request(|respond_to| StoreRequest::UpdateMany {
            namespace,
            filter,
            patch,
            respond_to,
        })
        .await
    }

    async fn begin_transaction(&self) -> Result<TxnId, StoreError> {
        self.request(|respond_to| StoreRequest::Begin { respond_to }).await
    }

    async fn commit_transaction(&self, txn: TxnId) -> Result<(), StoreError> {
        self.request(|respond_to| StoreRequest::Commit { txn, respond_to })
            .await
    }

    async fn abort_transaction(&self, txn: TxnId) -> Result<(), StoreError> {
        self.request(|respond_to| StoreRequest::Abort { txn, respond_to })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NS: &str = "test.things";

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_find_returns_it() {
        let store = MemoryStore::spawn();
        let id = store.insert(NS, doc(json!({"name": "a"})), None).await.unwrap();

        let found = store.find_by_id(NS, id).await.unwrap().unwrap();
        assert_eq!(found["name"], "a");
        assert_eq!(found[ID_FIELD], id.to_hex());

        let missing = store.find_by_id(NS, ObjectId::new()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_insert_keeps_caller_id_and_rejects_duplicates() {
        let store = MemoryStore::spawn();
        let id = ObjectId::new();
        let d = doc(json!({"_id": id.to_hex(), "name": "a"}));

        assert_eq!(store.insert(NS, d.clone(), None).await.unwrap(), id);
        let err = store.insert(NS, d, None).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteRejected(_)));
    }

    #[tokio::test]
    async fn test_update_and_delete_report_zero_matches() {
        let store = MemoryStore::spawn();
        let ghost = ObjectId::new();

        let result = store
            .update_by_id(NS, ghost, Patch::new().set("name", "b"), None)
            .await
            .unwrap();
        assert_eq!(result.matched_count, 0);
        assert_eq!(store.delete_by_id(NS, ghost, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_many_matches_filter_only() {
        let store = MemoryStore::spawn();
        for status in ["Pending", "Pending", "Completed"] {
            store.insert(NS, doc(json!({"status": status})), None).await.unwrap();
        }

        let filter = Filter::new().eq("status", "Pending");
        let patch = Patch::new().set("status", "Completed");
        let first = store.update_many(NS, filter.clone(), patch.clone()).await.unwrap();
        assert_eq!(first.matched_count, 2);

        let second = store.update_many(NS, filter, patch).await.unwrap();
        assert_eq!(second.matched_count, 0);
    }

    #[tokio::test]
    async fn test_staged_writes_invisible_until_commit() {
        let store = MemoryStore::spawn();
        let txn = store.begin_transaction().await.unwrap();
        let id = store.insert(NS, doc(json!({"name": "a"})), Some(txn)).await.unwrap();

        assert!(store.find_by_id(NS, id).await.unwrap().is_none());
        assert_eq!(store.open_transactions().await.unwrap(), 1);

        store.commit_transaction(txn).await.unwrap();
        assert!(store.find_by_id(NS, id).await.unwrap().is_some());
        assert_eq!(store.open_transactions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_abort_discards_staged_writes() {
        let store = MemoryStore::spawn();
        let txn = store.begin_transaction().await.unwrap();
        let id = store.insert(NS, doc(json!({"name": "a"})), Some(txn)).await.unwrap();
        store.abort_transaction(txn).await.unwrap();

        assert!(store.find_by_id(NS, id).await.unwrap().is_none());
        assert_eq!(store.open_transactions().await.unwrap(), 0);
        // Aborting twice is harmless; committing afterwards is not.
        store.abort_transaction(txn).await.unwrap();
        assert_eq!(
            store.commit_transaction(txn).await.unwrap_err(),
            StoreError::UnknownTransaction(txn)
        );
    }

    #[tokio::test]
    async fn test_concurrent_transactions_conflict_on_same_document() {
        let store = MemoryStore::spawn();
        let id = store.insert(NS, doc(json!({"stock": 1})), None).await.unwrap();

        let first = store.begin_transaction().await.unwrap();
        let second = store.begin_transaction().await.unwrap();
        store
            .update_by_id(NS, id, Patch::new().set("stock", 2), Some(first))
            .await
            .unwrap();

        let err = store
            .update_by_id(NS, id, Patch::new().set("stock", 3), Some(second))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        store.commit_transaction(first).await.unwrap();
        store.abort_transaction(second).await.unwrap();
        let stored = store.find_by_id(NS, id).await.unwrap().unwrap();
        assert_eq!(stored["stock"], 2);
    }

    #[tokio::test]
    async fn test_transactional_delete_of_missing_document_matches_nothing() {
        let store = MemoryStore::spawn();
        let txn = store.begin_transaction().await.unwrap();
        assert_eq!(store.delete_by_id(NS, ObjectId::new(), Some(txn)).await.unwrap(), 0);
        store.commit_transaction(txn).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let (actor, store) = MemoryStore::new(1);
        drop(actor);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
    }
}
