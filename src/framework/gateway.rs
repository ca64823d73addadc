//! # Store gateway
//!
//! A typed view of one collection. The gateway owns no state beyond the shared store handle and
//! never retries: one method call is one store call. Retrying is the
//! [`TransactionRunner`](super::TransactionRunner)'s job.
//!
//! Resources carry their identifier as `id` on the wire and as `_id` in the store; the gateway
//! renames the field in both directions.

use super::Resource;
use crate::store::{
    Document, Filter, ObjectId, Patch, StoreError, StoreHandle, TxnId, UpdateResult, ID_FIELD,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

const WIRE_ID_FIELD: &str = "id";

pub struct StoreGateway<R> {
    store: StoreHandle,
    namespace: Arc<str>,
    txn: Option<TxnId>,
    _resource: PhantomData<fn() -> R>,
}

impl<R> Clone for StoreGateway<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            namespace: self.namespace.clone(),
            txn: self.txn,
            _resource: PhantomData,
        }
    }
}

impl<R: Resource> StoreGateway<R> {
    /// Gateway for `R::COLLECTION` inside `database`.
    pub fn new(store: StoreHandle, database: &str) -> Self {
        Self {
            store,
            namespace: format!("{database}.{}", R::COLLECTION).into(),
            txn: None,
            _resource: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Same collection, with every write bound to `txn`.
    pub fn in_transaction(&self, txn: TxnId) -> Self {
        Self {
            txn: Some(txn),
            ..self.clone()
        }
    }

    pub fn transaction(&self) -> Option<TxnId> {
        self.txn
    }

    pub async fn insert(&self, resource: &R) -> Result<ObjectId, StoreError> {
        let doc = encode(resource)?;
        self.store.insert(&self.namespace, doc, self.txn).await
    }

    pub async fn find_by_id(&self, id: ObjectId) -> Result<Option<R>, StoreError> {
        match self.store.find_by_id(&self.namespace, id).await? {
            Some(doc) => decode(doc).map(Some),
            None => Ok(None),
        }
    }

    /// Applies `patch` to the document; `matched_count == 0` means there was no such document.
    pub async fn update_by_id(
        &self,
        id: ObjectId,
        patch: Patch,
    ) -> Result<UpdateResult, StoreError> {
        self.store
            .update_by_id(&self.namespace, id, patch, self.txn)
            .await
    }

    /// Sets every field of `replacement` on the document.
    pub async fn replace_by_id(
        &self,
        id: ObjectId,
        replacement: &R::Replace,
    ) -> Result<UpdateResult, StoreError> {
        let patch = Patch::from_document(encode(replacement)?);
        self.update_by_id(id, patch).await
    }

    /// Returns the number of documents removed (0 or 1).
    pub async fn delete_by_id(&self, id: ObjectId) -> Result<u64, StoreError> {
        self.store.delete_by_id(&self.namespace, id, self.txn).await
    }

    /// Applies `patch` to every matching document. Matching nothing is not an error.
    pub async fn update_many(
        &self,
        filter: Filter,
        patch: Patch,
    ) -> Result<UpdateResult, StoreError> {
        self.store.update_many(&self.namespace, filter, patch).await
    }
}

/// Serializes a value into a store document, moving `id` to `_id`.
pub fn encode<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value).map_err(|e| StoreError::WriteRejected(e.to_string()))? {
        Value::Object(mut doc) => {
            if let Some(id) = doc.remove(WIRE_ID_FIELD) {
                doc.insert(ID_FIELD.to_string(), id);
            }
            Ok(doc)
        }
        other => Err(StoreError::WriteRejected(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// Deserializes a store document, moving `_id` back to `id`.
pub fn decode<T: DeserializeOwned>(mut doc: Document) -> Result<T, StoreError> {
    if let Some(id) = doc.remove(ID_FIELD) {
        doc.insert(WIRE_ID_FIELD.to_string(), id);
    }
    serde_json::from_value(Value::Object(doc)).map_err(|e| StoreError::Decode(e.to_string()))
}
