//! # Resource service
//!
//! [`ResourceService<R>`] is the one CRUD component behind all three HTTP services. It validates
//! and enriches input, then sends writes either straight through the [`StoreGateway`] or through
//! the [`TransactionRunner`], as `R::POLICY` dictates. Reads always go straight to the gateway.
//!
//! Every store failure is converted to a [`ServiceError`] here; nothing unmapped escapes.

use super::{MutationPolicy, Resource, ServiceError, StoreGateway, TransactionRunner};
use crate::store::object_id::hex_string;
use crate::store::{parse_object_id, ObjectId, StoreError, StoreHandle};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use tracing::{debug, info, instrument};

/// A replacement body echoed back with the identifier it was applied to.
///
/// The store is not re-read after the write, so this reflects exactly what was submitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Replaced<P> {
    #[serde(with = "hex_string")]
    pub id: ObjectId,
    #[serde(flatten)]
    pub fields: P,
}

pub struct ResourceService<R> {
    gateway: StoreGateway<R>,
    transactions: TransactionRunner,
}

impl<R> Clone for ResourceService<R> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            transactions: self.transactions.clone(),
        }
    }
}

impl<R: Resource> ResourceService<R> {
    pub fn new(store: StoreHandle, database: &str) -> Self {
        let transactions = TransactionRunner::new(store.clone());
        Self::with_runner(store, database, transactions)
    }

    pub fn with_runner(store: StoreHandle, database: &str, transactions: TransactionRunner) -> Self {
        Self {
            gateway: StoreGateway::new(store, database),
            transactions,
        }
    }

    pub fn gateway(&self) -> &StoreGateway<R> {
        &self.gateway
    }

    /// Validates `params`, assigns identity and creation time, stores the result and returns it.
    #[instrument(skip_all, fields(collection = R::COLLECTION))]
    pub async fn create(&self, params: R::Create) -> Result<R, ServiceError> {
        debug!(?params, "create called");
        let resource = R::from_create(ObjectId::new(), Utc::now(), params)?;

        let stored = resource.clone();
        self.mutate(move |gateway| {
            let stored = stored.clone();
            async move { gateway.insert(&stored).await }
        })
        .await?;

        info!(id = %resource.id(), "Created");
        Ok(resource)
    }

    #[instrument(skip(self), fields(collection = R::COLLECTION))]
    pub async fn get(&self, id: &str) -> Result<R, ServiceError> {
        let id = parse_id(id)?;
        self.gateway
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found::<R>(id))
    }

    /// Replaces every mutable field of the document. Returns the submitted body, not a re-read.
    #[instrument(skip(self, replacement), fields(collection = R::COLLECTION))]
    pub async fn update(
        &self,
        id: &str,
        replacement: R::Replace,
    ) -> Result<Replaced<R::Replace>, ServiceError> {
        let id = parse_id(id)?;
        R::validate_replace(&replacement)?;
        debug!(?replacement, "update called");

        let submitted = replacement.clone();
        let result = self
            .mutate(move |gateway| {
                let submitted = submitted.clone();
                async move { gateway.replace_by_id(id, &submitted).await }
            })
            .await?;

        if result.matched_count == 0 {
            return Err(not_found::<R>(id));
        }
        info!(%id, modified = result.modified_count, "Updated");
        Ok(Replaced {
            id,
            fields: replacement,
        })
    }

    /// Removes the document. Zero documents removed is reported as `NotFound` whatever the policy.
    #[instrument(skip(self), fields(collection = R::COLLECTION))]
    pub async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        let id = parse_id(id)?;
        let deleted = self
            .mutate(move |gateway| async move { gateway.delete_by_id(id).await })
            .await?;

        if deleted == 0 {
            return Err(not_found::<R>(id));
        }
        info!(%id, "Deleted");
        Ok(())
    }

    /// Runs a single-gateway write according to `R::POLICY`.
    async fn mutate<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Fn(StoreGateway<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        match R::POLICY {
            MutationPolicy::Direct => op(self.gateway.clone()).await,
            MutationPolicy::Transactional => {
                let gateway = self.gateway.clone();
                self.transactions
                    .run_atomic(move |txn| op(gateway.in_transaction(txn)))
                    .await
            }
        }
    }
}

fn parse_id(id: &str) -> Result<ObjectId, ServiceError> {
    parse_object_id(id).map_err(ServiceError::from)
}

fn not_found<R: Resource>(id: ObjectId) -> ServiceError {
    ServiceError::NotFound {
        kind: R::KIND,
        id: id.to_hex(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Order, OrderCreate, OrderReplace, OrderStatus, Product, ProductCreate, User, UserCreate,
    };
    use crate::store::mock::{FaultyStore, StoreOp};
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;

    const DB: &str = "test";

    fn order_params() -> OrderCreate {
        OrderCreate {
            user_id: "u1".into(),
            product_id: "p1".into(),
            quantity: 2,
            total: 19.98,
            status: None,
        }
    }

    fn product_params() -> ProductCreate {
        ProductCreate { name: "Widget".into(), price: 9.99, stock: 10 }
    }

    #[tokio::test]
    async fn test_create_assigns_identity_and_timestamp() {
        let service = ResourceService::<Product>::new(std::sync::Arc::new(MemoryStore::spawn()), DB);
        // created_at carries sub-second precision; the id timestamp only whole seconds.
        let started = Utc::now();

        let product = service.create(product_params()).await.unwrap();

        assert!(!product.id.to_hex().is_empty());
        assert!(product.created_at >= started);
        let minted = product.id.timestamp().timestamp_millis() / 1000;
        assert!(minted >= (started - ChronoDuration::seconds(1)).timestamp());
    }

    #[tokio::test]
    async fn test_create_then_get_round_trips() {
        let service = ResourceService::<User>::new(std::sync::Arc::new(MemoryStore::spawn()), DB);
        let params = UserCreate {
            name: "Alice".into(),
            email: "alice@example.com".into(),
            password: "s3cret".into(),
        };

        let created = service.create(params).await.unwrap();
        let fetched = service.get(&created.id.to_hex()).await.unwrap();

        assert_eq!(fetched, created);
        assert_eq!(fetched.name, "Alice");
        assert_eq!(fetched.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_order_creation_forces_pending() {
        let service = ResourceService::<Order>::new(std::sync::Arc::new(MemoryStore::spawn()), DB);
        let params = OrderCreate {
            status: Some(OrderStatus::Completed),
            ..order_params()
        };

        let order = service.create(params).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(service.get(&order.id.to_hex()).await.unwrap().status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_invalid_payload_never_reaches_store() {
        let faulty = FaultyStore::wrap(MemoryStore::spawn());
        let service = ResourceService::<Order>::new(faulty.handle(), DB);
        let params = OrderCreate { quantity: 0, ..order_params() };

        let err = service.create(params).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(faulty.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_ids_never_reach_store() {
        let faulty = FaultyStore::wrap(MemoryStore::spawn());
        let service = ResourceService::<Product>::new(faulty.handle(), DB);

        for bad in ["abc", "", "507f1f77bcf86cd79943901z"] {
            assert!(matches!(service.get(bad).await, Err(ServiceError::InvalidIdentifier(_))));
            assert!(matches!(
                service.update(bad, product_params_replace()).await,
                Err(ServiceError::InvalidIdentifier(_))
            ));
            assert!(matches!(service.delete(bad).await, Err(ServiceError::InvalidIdentifier(_))));
        }
        assert!(faulty.calls().is_empty());
    }

    fn product_params_replace() -> crate::model::ProductReplace {
        crate::model::ProductReplace { name: "Gadget".into(), price: 1.0, stock: 1 }
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let service = ResourceService::<Order>::new(std::sync::Arc::new(MemoryStore::spawn()), DB);
        let err = service.get(&ObjectId::new().to_hex()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { kind: "Order", .. }));
    }

    #[tokio::test]
    async fn test_update_replaces_fields_and_keeps_creation_time() {
        let service = ResourceService::<Order>::new(std::sync::Arc::new(MemoryStore::spawn()), DB);
        let order = service.create(order_params()).await.unwrap();
        let id = order.id.to_hex();

        let replacement = OrderReplace {
            user_id: "u2".into(),
            product_id: "p2".into(),
            quantity: 3,
            total: 29.97,
            status: OrderStatus::Completed,
        };
        let echoed = service.update(&id, replacement.clone()).await.unwrap();
        assert_eq!(echoed.id, order.id);
        assert_eq!(echoed.fields, replacement);

        let stored = service.get(&id).await.unwrap();
        assert_eq!(stored.user_id, "u2");
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(stored.created_at, order.created_at);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let service = ResourceService::<Product>::new(std::sync::Arc::new(MemoryStore::spawn()), DB);
        let err = service
            .update(&ObjectId::new().to_hex(), product_params_replace())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_to_one_document_all_land() {
        let service = ResourceService::<Product>::new(std::sync::Arc::new(MemoryStore::spawn()), DB);
        let id = service.create(product_params()).await.unwrap().id.to_hex();

        let writers: Vec<_> = (0..32u32)
            .map(|i| {
                let service = service.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    let replacement = crate::model::ProductReplace {
                        name: format!("Widget {i}"),
                        price: f64::from(i),
                        stock: i,
                    };
                    service.update(&id, replacement).await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        // Last write wins: the stored document is exactly one of the submitted bodies.
        let stored = service.get(&id).await.unwrap();
        assert_eq!(stored.name, format!("Widget {}", stored.stock));
        assert_eq!(stored.price, f64::from(stored.stock));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found_for_every_policy() {
        let store = std::sync::Arc::new(MemoryStore::spawn());
        let ghost = ObjectId::new().to_hex();

        let products = ResourceService::<Product>::new(store.clone(), DB);
        let users = ResourceService::<User>::new(store, DB);
        assert!(matches!(products.delete(&ghost).await, Err(ServiceError::NotFound { .. })));
        assert!(matches!(users.delete(&ghost).await, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_removes_document() {
        let service = ResourceService::<Product>::new(std::sync::Arc::new(MemoryStore::spawn()), DB);
        let product = service.create(product_params()).await.unwrap();
        let id = product.id.to_hex();

        service.delete(&id).await.unwrap();
        assert!(matches!(service.get(&id).await, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_failed_transactional_insert_leaves_no_trace() {
        let memory = MemoryStore::spawn();
        let faulty = FaultyStore::wrap(memory.clone());
        faulty.fail_next(StoreOp::Insert, StoreError::WriteRejected("forced".into()));
        let service = ResourceService::<Product>::new(faulty.handle(), DB);

        let err = service.create(product_params()).await.unwrap_err();
        assert!(matches!(err, ServiceError::WriteRejected(_)));
        assert_eq!(
            faulty.calls(),
            vec![StoreOp::Begin, StoreOp::Insert, StoreOp::Abort]
        );
        assert_eq!(memory.open_transactions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_direct_policy_skips_transactions() {
        let faulty = FaultyStore::wrap(MemoryStore::spawn());
        let service = ResourceService::<User>::new(faulty.handle(), DB);
        let params = UserCreate {
            name: "Bob".into(),
            email: "bob@example.com".into(),
            password: "pw".into(),
        };

        service.create(params).await.unwrap();
        assert_eq!(faulty.calls(), vec![StoreOp::Insert]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_transaction_failed() {
        let faulty = FaultyStore::wrap(MemoryStore::spawn());
        let attempts = crate::framework::DEFAULT_MAX_ATTEMPTS as usize;
        faulty.fail_times(StoreOp::Insert, attempts, StoreError::TransientConflict("busy".into()));
        let service = ResourceService::<Product>::new(faulty.handle(), DB);

        let err = service.create(product_params()).await.unwrap_err();
        assert!(matches!(err, ServiceError::TransactionFailed(_)));
        assert_eq!(err.status_code(), 500);
        faulty.verify();
    }

    #[tokio::test]
    async fn test_store_outage_maps_to_unavailable() {
        let faulty = FaultyStore::wrap(MemoryStore::spawn());
        faulty.fail_next(StoreOp::FindById, StoreError::Unavailable("down".into()));
        let service = ResourceService::<User>::new(faulty.handle(), DB);

        let err = service.get(&ObjectId::new().to_hex()).await.unwrap_err();
        assert!(matches!(err, ServiceError::StoreUnavailable(_)));
    }
}
