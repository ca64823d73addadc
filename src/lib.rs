//! # Storefront
//!
//! > **Order, Product and User services over one shared document store.**
//!
//! Three small HTTP CRUD services and a nightly batch job, sharing a single store handle.
//! Each service is the same generic component instantiated for a different schema.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### One component, three schemas
//!
//! The services differ only in their fields and in how writes reach the store:
//! - **Users** write straight through the gateway.
//! - **Products** and **Orders** write inside a session-scoped transaction.
//!
//! So the CRUD logic is written once, as [`ResourceService<R>`](framework::ResourceService),
//! and each kind supplies a [`Resource`](framework::Resource) implementation naming its
//! payload types and its [`MutationPolicy`](framework::MutationPolicy).
//!
//! ### The store is the only shared state
//!
//! There is no in-process cache. Request handlers and the scheduler run concurrently against the
//! same [`StoreHandle`](store::StoreHandle) and take no locks of their own.
//!
//! ## 👩‍💻 Architecture Notes
//!
//! ### 1. Type-Safe Error Handling
//! Each layer has its own `thiserror` enum: [`StoreError`](store::StoreError) below the
//! services, [`ServiceError`](framework::ServiceError) above them. Every store failure is mapped
//! before it leaves a service, and every `ServiceError` knows its HTTP status.
//!
//! ### 2. Transactions survive cancellation
//! A transactional write runs in its own task. A client that disconnects mid-request cannot
//! leave a transaction open: the task still commits or aborts.
//!
//! ### 3. Observability
//! `tracing` everywhere with structured fields, plus a `tower-http` access log span per request.
//! See [`lifecycle::tracing`].
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Store ([`store`])
//! - **Role**: The [`DocumentStore`](store::DocumentStore) contract, the MongoDB-backed
//!   [`MongoStore`](store::MongoStore), the in-process [`MemoryStore`](store::MemoryStore) engine
//!   and the fault-injecting [`FaultyStore`](store::mock::FaultyStore) for tests.
//!
//! ### 2. The Engine ([`framework`])
//! - **Role**: Gateway, transaction runner and the generic service.
//! - **Key items**: [`Resource`](framework::Resource), [`ResourceService`](framework::ResourceService).
//!
//! ### 3. The Schemas ([`model`])
//! - **Role**: `Order`, `Product`, `User` and their payloads and field rules.
//!
//! ### 4. The Transport ([`http`], [`auth`])
//! - **Role**: axum routers per service, JSON error bodies, the token validation stub.
//!
//! ### 5. Background work ([`scheduler`])
//! - **Role**: The daily `Pending` → `Completed` batch transition.
//!
//! ### 6. The Orchestrator ([`lifecycle`], [`config`])
//! - **Role**: Loads configuration, connects the store, wires the services, shuts down.
//! - **Key items**: [`ServiceSystem`](lifecycle::ServiceSystem).
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Orders on :8081, products on :8082, users on :8083
//! MONGODB_URI=mongodb://localhost:27017 RUST_LOG=info cargo run
//!
//! # Or without a database server
//! STORE_URI=memory://local cargo run
//!
//! curl -X POST localhost:8081/orders \
//!   -d '{"user_id":"u1","product_id":"p1","quantity":2,"total":19.98}' \
//!   -H 'content-type: application/json'
//! ```
//!
//! ### Running Tests
//!
//! ```bash
//! cargo test
//! ```

pub mod auth;
pub mod config;
pub mod framework;
pub mod http;
pub mod lifecycle;
pub mod model;
pub mod scheduler;
pub mod store;
