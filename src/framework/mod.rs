//! Generic resource framework.
//!
//! Everything here is written once against the [`Resource`] trait and reused by the Order,
//! Product and User services.
//!
//! # Main Components
//!
//! - [`Resource`] - Trait that stored kinds implement to be served by the framework
//! - [`StoreGateway`] - Typed CRUD view of one collection
//! - [`TransactionRunner`] - Runs a mutation inside a retried, session-scoped transaction
//! - [`ResourceService`] - Validation, enrichment and policy dispatch for one resource
//! - [`ServiceError`] - The error taxonomy callers see
//!
//! # Testing
//!
//! See [`crate::store::mock`] for the fault-injecting store used throughout the tests.

pub mod error;
pub mod gateway;
pub mod resource;
pub mod service;
pub mod transaction;

pub use error::{ServiceError, ValidationError};
pub use gateway::StoreGateway;
pub use resource::{MutationPolicy, Resource};
pub use service::{Replaced, ResourceService};
pub use transaction::{TransactionRunner, DEFAULT_MAX_ATTEMPTS};
