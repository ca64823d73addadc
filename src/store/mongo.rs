//! MongoDB engine.
//!
//! [`MongoStore`] speaks to a MongoDB deployment through the official driver. Namespaces are
//! `"<database>.<collection>"`; identifiers are stored as native object ids while every other
//! field travels as its BSON counterpart.
//!
//! Transactions map one-to-one onto driver sessions: [`DocumentStore::begin_transaction`] starts a
//! session and a transaction on it, and the returned [`TxnId`] names that session until commit or
//! abort releases it. Multi-document transactions need a replica set or sharded cluster; a
//! standalone server rejects `begin_transaction`.
//!
//! Errors labelled `TransientTransactionError` by the server become
//! [`StoreError::TransientConflict`], so the transaction runner retries them.

use super::{
    parse_object_id, Document, DocumentStore, Filter, ObjectId, Patch, StoreError, TxnId,
    UpdateResult, ID_FIELD,
};
use async_trait::async_trait;
use mongodb::bson::{self, doc, Bson};
use mongodb::error::{ErrorKind, TRANSIENT_TRANSACTION_ERROR};
use mongodb::options::ClientOptions;
use mongodb::{Client, ClientSession, Collection};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Applied when the connection string does not set `serverSelectionTimeoutMS`.
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

const APP_NAME: &str = "storefront";

type SharedSession = Arc<AsyncMutex<ClientSession>>;

pub struct MongoStore {
    client: Client,
    sessions: Mutex<HashMap<TxnId, SharedSession>>,
    next_txn: AtomicU64,
}

impl MongoStore {
    /// Builds a client for `uri`. No connection is made until the first operation.
    pub async fn connect(uri: &str) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(uri).await.map_err(map_error)?;
        options
            .server_selection_timeout
            .get_or_insert(SERVER_SELECTION_TIMEOUT);
        options.app_name.get_or_insert_with(|| APP_NAME.to_string());
        let client = Client::with_options(options).map_err(map_error)?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            sessions: Mutex::new(HashMap::new()),
            next_txn: AtomicU64::new(1),
        }
    }

    fn collection(&self, namespace: &str) -> Result<Collection<bson::Document>, StoreError> {
        let (database, collection) = split_namespace(namespace)?;
        Ok(self.client.database(database).collection(collection))
    }

    fn session(&self, txn: TxnId) -> Result<SharedSession, StoreError> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&txn)
            .cloned()
            .ok_or(StoreError::UnknownTransaction(txn))
    }

    fn release(&self, txn: TxnId) -> Option<SharedSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&txn)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn insert(
        &self,
        namespace: &str,
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
        let record = to_bson_document(doc)?;
        let collection = self.collection(namespace)?;

        let result = match txn {
            Some(txn) => {
                let session = self.session(txn)?;
                let mut session = session.lock().await;
                collection.insert_one(record).session(&mut *session).await
            }
            None => collection.insert_one(record).await,
        };
        result.map_err(map_error)?;
        Ok(id)
    }

    async fn find_by_id(
        &self,
        namespace: &str,
        id: ObjectId,
    ) -> Result<Option<Document>, StoreError> {
        let found = self
            .collection(namespace)?
            .find_one(doc! { ID_FIELD: id })
            .await
            .map_err(map_error)?;
        found.map(from_bson_document).transpose()
    }

    async fn update_by_id(
        &self,
        namespace: &str,
        id: ObjectId,
        patch: Patch,
        txn: Option<TxnId>,
    ) -> Result<UpdateResult, StoreError> {
        let collection = self.collection(namespace)?;
        let filter = doc! { ID_FIELD: id };
        if patch.is_empty() {
            return count_only(&collection, filter).await;
        }
        let update = set_document(&patch)?;

        let result = match txn {
            Some(txn) => {
                let session = self.session(txn)?;
                let mut session = session.lock().await;
                collection
                    .update_one(filter, update)
                    .session(&mut *session)
                    .await
            }
            None => collection.update_one(filter, update).await,
        };
        let result = result.map_err(map_error)?;
        Ok(UpdateResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn delete_by_id(
        &self,
        namespace: &str,
        id: ObjectId,
        txn: Option<TxnId>,
    ) -> Result<u64, StoreError> {
        let collection = self.collection(namespace)?;
        let filter = doc! { ID_FIELD: id };

        let result = match txn {
            Some(txn) => {
                let session = self.session(txn)?;
                let mut session = session.lock().await;
                collection.delete_one(filter).session(&mut *session).await
            }
            None => collection.delete_one(filter).await,
        };
        Ok(result.map_err(map_error)?.deleted_count)
    }

    async fn update_many(
        &self,
        namespace: &str,
        filter: Filter,
        patch: Patch,
    ) -> Result<UpdateResult, StoreError> {
        let collection = self.collection(namespace)?;
        let query = filter_document(&filter)?;
        if patch.is_empty() {
            return count_only(&collection, query).await;
        }
        let result = collection
            .update_many(query, set_document(&patch)?)
            .await
            .map_err(map_error)?;
        Ok(UpdateResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn begin_transaction(&self) -> Result<TxnId, StoreError> {
        let mut session = self.client.start_session().await.map_err(map_error)?;
        session.start_transaction().await.map_err(map_error)?;

        let txn = TxnId(self.next_txn.fetch_add(1, Ordering::Relaxed));
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(txn, Arc::new(AsyncMutex::new(session)));
        debug!(%txn, "Transaction started");
        Ok(txn)
    }

    async fn commit_transaction(&self, txn: TxnId) -> Result<(), StoreError> {
        let session = self.release(txn).ok_or(StoreError::UnknownTransaction(txn))?;
        let mut session = session.lock().await;
        // A session dropped with its transaction still open is aborted by the driver.
        session.commit_transaction().await.map_err(map_error)
    }

    async fn abort_transaction(&self, txn: TxnId) -> Result<(), StoreError> {
        match self.release(txn) {
            Some(session) => session
                .lock()
                .await
                .abort_transaction()
                .await
                .map_err(map_error),
            None => Ok(()),
        }
    }
}

async fn count_only(
    collection: &Collection<bson::Document>,
    filter: bson::Document,
) -> Result<UpdateResult, StoreError> {
    let matched = collection
        .count_documents(filter)
        .await
        .map_err(map_error)?;
    Ok(UpdateResult {
        matched_count: matched,
        modified_count: 0,
    })
}

fn split_namespace(namespace: &str) -> Result<(&str, &str), StoreError> {
    match namespace.split_once('.') {
        Some((database, collection)) if !database.is_empty() && !collection.is_empty() => {
            Ok((database, collection))
        }
        _ => Err(StoreError::WriteRejected(format!(
            "namespace must be <database>.<collection>, got {namespace:?}"
        ))),
    }
}

fn map_error(err: mongodb::error::Error) -> StoreError {
    if err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        return StoreError::TransientConflict(err.to_string());
    }
    match err.kind.as_ref() {
        ErrorKind::Write(_) => StoreError::WriteRejected(err.to_string()),
        _ => StoreError::Unavailable(err.to_string()),
    }
}

fn to_bson(value: &Value) -> Result<Bson, StoreError> {
    bson::to_bson(value).map_err(|e| StoreError::WriteRejected(e.to_string()))
}

/// `_id` arrives as hex and is matched as a native object id.
fn field_value(field: &str, value: &Value) -> Result<Bson, StoreError> {
    match (field, value) {
        (ID_FIELD, Value::String(s)) => Ok(Bson::ObjectId(parse_object_id(s)?)),
        _ => to_bson(value),
    }
}

fn to_bson_document(doc: Document) -> Result<bson::Document, StoreError> {
    let mut record = bson::Document::new();
    for (field, value) in &doc {
        record.insert(field.clone(), field_value(field, value)?);
    }
    Ok(record)
}

fn from_bson_document(mut record: bson::Document) -> Result<Document, StoreError> {
    let id = match record.remove(ID_FIELD) {
        Some(Bson::ObjectId(id)) => Some(id),
        Some(other) => {
            return Err(StoreError::Decode(format!(
                "{ID_FIELD} is not an object id: {other}"
            )))
        }
        None => None,
    };
    let mut doc = match Bson::Document(record).into_relaxed_extjson() {
        Value::Object(doc) => doc,
        other => return Err(StoreError::Decode(format!("expected an object, got {other}"))),
    };
    if let Some(id) = id {
        doc.insert(ID_FIELD.to_string(), Value::String(id.to_hex()));
    }
    Ok(doc)
}

fn filter_document(filter: &Filter) -> Result<bson::Document, StoreError> {
    let mut query = bson::Document::new();
    for (field, value) in filter.predicates() {
        query.insert(field, field_value(field, value)?);
    }
    Ok(query)
}

fn set_document(patch: &Patch) -> Result<bson::Document, StoreError> {
    let mut fields = bson::Document::new();
    for (field, value) in patch.assignments() {
        fields.insert(field, to_bson(value)?);
    }
    Ok(doc! { "$set": fields })
}
