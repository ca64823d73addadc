//! # The resource abstraction
//!
//! [`Resource`] is the schema descriptor every stored kind (Order, Product, User) implements.
//! Writing [`ResourceService`](super::ResourceService), [`StoreGateway`](super::StoreGateway) and
//! the HTTP router once against this trait is what keeps the three services from being three
//! copies of the same code.
//!
//! Associated types keep the payloads apart: an `Order` is created from an `OrderCreate` and
//! replaced from an `OrderReplace`, and the compiler refuses a `ProductCreate` in their place.

use super::ValidationError;
use crate::store::ObjectId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// How a resource's writes reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPolicy {
    /// Straight through the gateway, one store call.
    Direct,
    /// Inside a session-scoped transaction run by the [`TransactionRunner`](super::TransactionRunner).
    Transactional,
}

pub trait Resource: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Human name used in messages and logs (e.g. `"Order"`).
    const KIND: &'static str;

    /// Collection name, also the URL segment (e.g. `"orders"`).
    const COLLECTION: &'static str;

    const POLICY: MutationPolicy;

    /// Body accepted on creation. Carries no identifier and no server-set fields.
    type Create: DeserializeOwned + Debug + Send + 'static;

    /// Body accepted on full replacement. Serialized as the `$set` patch, so it must not carry
    /// fields that are immutable after creation.
    type Replace: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static;

    fn id(&self) -> ObjectId;

    /// Builds the stored value from the payload and the server-assigned fields, validating
    /// the payload on the way.
    fn from_create(
        id: ObjectId,
        created_at: DateTime<Utc>,
        params: Self::Create,
    ) -> Result<Self, ValidationError>;

    /// Field rules for a replacement body.
    fn validate_replace(_replace: &Self::Replace) -> Result<(), ValidationError> {
        Ok(())
    }
}
