//! Process lifecycle: observability setup and the service orchestrator.
//!
//! # Main Components
//!
//! - [`ServiceSystem`] - Connects the store, builds the three services and the scheduler, shuts
//!   them down again
//! - [`setup_tracing`] - Initializes the tracing/logging infrastructure

pub mod service_system;
pub mod tracing;

pub use self::service_system::*;
pub use self::tracing::*;
