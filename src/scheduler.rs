//! # Batch status scheduler
//!
//! Once a day the [`BatchStatusScheduler`] moves every `Pending` order to `Completed` with a
//! single `update_many` call. It runs as its own task beside the HTTP services and shares their
//! store handle; it takes no locks and does not coordinate with live requests.
//!
//! A failed run is logged and forgotten. The next attempt is the next scheduled time.

use crate::framework::StoreGateway;
use crate::model::{Order, OrderStatus};
use crate::store::{Filter, Patch, StoreError, StoreHandle};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

/// Fires once a day at a fixed UTC wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    pub fn new(at: NaiveTime) -> Self {
        Self { at }
    }

    /// Midnight UTC.
    pub fn midnight() -> Self {
        Self::new(NaiveTime::MIN)
    }

    /// Parses `HH:MM` (or `HH:MM:SS`).
    pub fn parse(s: &str) -> Result<Self, chrono::ParseError> {
        NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .map(Self::new)
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// The first firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            today
        } else {
            today + Duration::days(1)
        }
    }
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self::midnight()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

pub struct BatchStatusScheduler {
    orders: StoreGateway<Order>,
    schedule: DailySchedule,
    state: watch::Sender<SchedulerState>,
}

impl BatchStatusScheduler {
    pub fn new(store: StoreHandle, database: &str, schedule: DailySchedule) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            orders: StoreGateway::new(store, database),
            schedule,
            state,
        }
    }

    pub fn schedule(&self) -> DailySchedule {
        self.schedule
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Marks every `Pending` order `Completed` in one store call. Returns how many matched.
    pub async fn run_transition(&self) -> Result<u64, StoreError> {
        let filter = Filter::new().eq("status", OrderStatus::Pending.as_str());
        let patch = Patch::new().set("status", OrderStatus::Completed.as_str());
        let result = self.orders.update_many(filter, patch).await?;
        Ok(result.matched_count)
    }

    /// One scheduled run. Failures are logged and swallowed; returns the matched count on success.
    #[instrument(skip(self), name = "batch_status")]
    pub async fn tick(&self) -> Option<u64> {
        self.state.send_replace(SchedulerState::Running);
        let outcome = self.run_transition().await;
        self.state.send_replace(SchedulerState::Idle);

        match outcome {
            Ok(matched) => {
                info!(matched, "Order statuses updated");
                Some(matched)
            }
            Err(e) => {
                error!(error = %e, "Error updating order statuses");
                None
            }
        }
    }

    /// Sleeps until each scheduled time and ticks, until `shutdown` flips to `true` or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(at = %self.schedule.at(), "Scheduler started");
        loop {
            let now = Utc::now();
            let next = self.schedule.next_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(%next, "Next batch run scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::ResourceService;
    use crate::model::OrderCreate;
    use crate::store::mock::{FaultyStore, StoreOp};
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::sync::Arc;

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

    #[test]
    fn test_next_after_later_today() {
        let schedule = DailySchedule::parse("13:30").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(now),
            Utc.with_ymd_and_hms(2026, 10, 19, 13, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_next_after_rolls_to_tomorrow() {
        let schedule = DailySchedule::midnight();
        let now = Utc.with_ymd_and_hms(2026, 12, 31, 12, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(now),
            Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap()
        );

        // Exactly on the firing time is not "after".
        let on_time = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(on_time),
            Utc.with_ymd_and_hms(2026, 10, 20, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DailySchedule::parse("25:00").is_err());
        assert!(DailySchedule::parse("noon").is_err());
        assert_eq!(DailySchedule::parse("00:00").unwrap(), DailySchedule::default());
    }

    #[tokio::test]
    async fn test_pending_orders_become_completed() {
        let store: StoreHandle = Arc::new(MemoryStore::spawn());
        let orders = ResourceService::<Order>::new(store.clone(), DB);
        let scheduler = BatchStatusScheduler::new(store, DB, DailySchedule::midnight());

        let order = orders.create(order_params()).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);

        assert_eq!(scheduler.tick().await, Some(1));
        let fetched = orders.get(&order.id.to_hex()).await.unwrap();
        assert_eq!(fetched.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_second_transition_matches_nothing() {
        let store: StoreHandle = Arc::new(MemoryStore::spawn());
        let orders = ResourceService::<Order>::new(store.clone(), DB);
        let scheduler = BatchStatusScheduler::new(store, DB, DailySchedule::midnight());

        orders.create(order_params()).await.unwrap();
        orders.create(order_params()).await.unwrap();

        assert_eq!(scheduler.run_transition().await.unwrap(), 2);
        assert_eq!(scheduler.run_transition().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_run_is_swallowed() {
        let faulty = FaultyStore::wrap(MemoryStore::spawn());
        faulty.fail_next(StoreOp::UpdateMany, StoreError::Unavailable("down".into()));
        let scheduler = BatchStatusScheduler::new(faulty.handle(), DB, DailySchedule::midnight());
        let state = scheduler.subscribe();

        assert_eq!(scheduler.tick().await, None);
        assert_eq!(*state.borrow(), SchedulerState::Idle);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        faulty.verify();

        // The next run goes through again.
        assert_eq!(scheduler.tick().await, Some(0));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let scheduler = BatchStatusScheduler::new(
            Arc::new(MemoryStore::spawn()),
            DB,
            DailySchedule::midnight(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
