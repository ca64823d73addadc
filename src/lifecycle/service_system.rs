use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auth::{StubTokenValidator, TokenValidator};
use crate::config::{AppConfig, ConfigError};
use crate::framework::{ResourceService, TransactionRunner};
use crate::http;
use crate::model::{Order, Product, User};
use crate::scheduler::{BatchStatusScheduler, SchedulerState};
use crate::store::{self, StoreError, StoreHandle};

/// How long `shutdown` waits for the store engine to drain before abandoning it.
const STORE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("store connection failed: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The runtime orchestrator for the three resource services.
///
/// `ServiceSystem` is responsible for:
/// - **Lifecycle Management**: Connecting the store, starting and stopping the scheduler
/// - **Dependency Wiring**: Handing the one shared [`StoreHandle`] to every service
/// - **Transport**: Building the per-service HTTP routers
///
/// # Example
///
/// ```ignore
/// let config = AppConfig::load()?;
/// let system = ServiceSystem::new(&config).await?;
///
/// let orders = system.orders_router();
/// // ... serve the routers ...
///
/// system.shutdown().await?;
/// ```
pub struct ServiceSystem {
    pub orders: ResourceService<Order>,
    pub products: ResourceService<Product>,
    pub users: ResourceService<User>,
    pub scheduler: Arc<BatchStatusScheduler>,

    validator: Arc<dyn TokenValidator>,
    store: StoreHandle,
    shutdown_tx: watch::Sender<bool>,

    /// The scheduler loop, if enabled.
    scheduler_handle: Option<JoinHandle<()>>,

    /// The in-process store engine task, when this system started one.
    store_handle: Option<JoinHandle<()>>,
}

impl ServiceSystem {
    /// Connects to `config.store.uri` and starts everything.
    ///
    /// A store that cannot be reached here is fatal; nothing is started.
    pub async fn new(config: &AppConfig) -> Result<Self, StartupError> {
        let (store, store_handle) = store::connect(&config.store.uri).await?;
        let mut system = Self::with_store(store, config)?;
        system.store_handle = store_handle;
        Ok(system)
    }

    /// Starts everything on an already connected store.
    pub fn with_store(store: StoreHandle, config: &AppConfig) -> Result<Self, ConfigError> {
        let database = config.store.database.as_str();
        let schedule = config.schedule()?;

        let transactions =
            TransactionRunner::with_max_attempts(store.clone(), config.transaction.max_attempts);
        let orders = ResourceService::with_runner(store.clone(), database, transactions.clone());
        let products = ResourceService::with_runner(store.clone(), database, transactions.clone());
        let users = ResourceService::with_runner(store.clone(), database, transactions);

        let scheduler = Arc::new(BatchStatusScheduler::new(store.clone(), database, schedule));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler_handle = if config.scheduler.enabled {
            let scheduler = scheduler.clone();
            Some(tokio::spawn(async move { scheduler.run(shutdown_rx).await }))
        } else {
            info!("Scheduler disabled");
            None
        };

        info!(database, "Services ready");
        Ok(Self {
            orders,
            products,
            users,
            scheduler,
            validator: Arc::new(StubTokenValidator),
            store,
            shutdown_tx,
            scheduler_handle,
            store_handle: None,
        })
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn scheduler_state(&self) -> watch::Receiver<SchedulerState> {
        self.scheduler.subscribe()
    }

    pub fn orders_router(&self) -> Router {
        http::resource_router(self.orders.clone())
    }

    pub fn products_router(&self) -> Router {
        http::resource_router(self.products.clone())
    }

    pub fn users_router(&self) -> Router {
        http::users_router(self.users.clone(), self.validator.clone())
    }

    /// Gracefully shuts down the system.
    ///
    /// 1. Signals the scheduler and waits for its loop to exit
    /// 2. Drops every service, releasing their store handles
    /// 3. Waits for the store engine to finish, if this system started it
    ///
    /// Routers handed out earlier hold store handles too; stop serving them first.
    pub async fn shutdown(self) -> Result<(), String> {
        info!("Shutting down services...");

        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.scheduler_handle {
            if let Err(e) = handle.await {
                error!("Scheduler task failed: {:?}", e);
                return Err(format!("Scheduler task failed: {:?}", e));
            }
        }

        drop(self.orders);
        drop(self.products);
        drop(self.users);
        drop(self.scheduler);
        drop(self.store);

        if let Some(mut handle) = self.store_handle {
            match tokio::time::timeout(STORE_DRAIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Store task failed: {:?}", e);
                    return Err(format!("Store task failed: {:?}", e));
                }
                Err(_) => {
                    warn!("Store still referenced after shutdown, abandoning it");
                    handle.abort();
                }
            }
        }

        info!("Shutdown complete.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderCreate, OrderStatus};

    fn config(enabled: bool) -> AppConfig {
        let mut config = AppConfig::default();
        config.store.uri = "memory://test".into();
        config.scheduler.enabled = enabled;
        config
    }

    #[tokio::test]
    async fn test_services_share_one_store() {
        let system = ServiceSystem::new(&config(false)).await.unwrap();

        let order = system
            .orders
            .create(OrderCreate {
                user_id: "u1".into(),
                product_id: "p1".into(),
                quantity: 1,
                total: 1.0,
                status: None,
            })
            .await
            .unwrap();

        assert_eq!(system.scheduler.run_transition().await.unwrap(), 1);
        let fetched = system.orders.get(&order.id.to_hex()).await.unwrap();
        assert_eq!(fetched.status, OrderStatus::Completed);

        system.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_store_is_fatal() {
        let mut config = config(true);
        config.store.uri = "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200".into();
        let err = ServiceSystem::new(&config).await.err().unwrap();
        assert!(matches!(err, StartupError::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_scheduler() {
        let system = ServiceSystem::new(&config(true)).await.unwrap();
        assert!(system.scheduler_handle.is_some());
        assert_eq!(*system.scheduler_state().borrow(), SchedulerState::Idle);

        tokio::time::timeout(Duration::from_secs(2), system.shutdown())
            .await
            .expect("shutdown hung")
            .unwrap();
    }
}
