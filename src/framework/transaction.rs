//! # Transactional mutator
//!
//! [`TransactionRunner::run_atomic`] executes one logical mutation inside a session-scoped
//! transaction: begin, run the operation, commit. Any failure aborts, so nothing the operation
//! wrote is ever observable. Transient conflicts re-run the whole operation from a fresh
//! transaction, up to `max_attempts` times in total, sleeping a jittered, exponentially growing
//! delay between attempts so that writers contending for one document spread out.
//!
//! ## Cancellation
//!
//! The attempt loop runs in its own Tokio task. If the caller's future is dropped (a client
//! disconnects mid-request) the task keeps going until the transaction is committed or aborted,
//! so no transaction is ever left open behind a cancelled request. A panicking operation is
//! caught inside the attempt and its transaction aborted like any other failure.

use crate::store::{StoreError, StoreHandle, TxnId};
use futures::FutureExt;
use rand::Rng;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, warn, Instrument};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

const BACKOFF_BASE: Duration = Duration::from_millis(5);
const BACKOFF_CAP: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct TransactionRunner {
    store: StoreHandle,
    max_attempts: u32,
}

impl TransactionRunner {
    pub fn new(store: StoreHandle) -> Self {
        Self::with_max_attempts(store, DEFAULT_MAX_ATTEMPTS)
    }

    /// `max_attempts` counts the first try; zero is treated as one.
    pub fn with_max_attempts(store: StoreHandle, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `op` atomically. `op` is called once per attempt with the attempt's transaction and
    /// must bind every write to it.
    pub async fn run_atomic<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Fn(TxnId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        let store = self.store.clone();
        let max_attempts = self.max_attempts;
        let task = tokio::spawn(
            async move { attempt_loop(store, max_attempts, op).await }.in_current_span(),
        );
        task.await.map_err(|e| StoreError::TransactionFailed {
            attempts: 0,
            reason: format!("transaction task failed: {e}"),
        })?
    }
}

async fn attempt_loop<T, F, Fut>(store: StoreHandle, max_attempts: u32, op: F) -> Result<T, StoreError>
where
    F: Fn(TxnId) -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match store.begin_transaction().await {
            Ok(txn) => match run_once(&store, txn, attempt, &op).await {
                Ok(value) => {
                    debug!(%txn, attempt, "Transaction committed");
                    return Ok(value);
                }
                Err(e) => e,
            },
            // Nothing was opened, so there is nothing to release.
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e),
        };

        if !error.is_transient() {
            warn!(attempt, error = %error, "Transaction aborted");
            return Err(error);
        }
        if attempt >= max_attempts {
            warn!(attempt, error = %error, "Transaction retries exhausted");
            return Err(StoreError::TransactionFailed {
                attempts: attempt,
                reason: error.to_string(),
            });
        }
        let delay = backoff(attempt);
        debug!(attempt, ?delay, error = %error, "Transient conflict, retrying");
        tokio::time::sleep(delay).await;
    }
}

/// One attempt: the transaction is committed on success and aborted on every failure path,
/// a panic in `op` included.
async fn run_once<T, F, Fut>(
    store: &StoreHandle,
    txn: TxnId,
    attempt: u32,
    op: &F,
) -> Result<T, StoreError>
where
    F: Fn(TxnId) -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let outcome = match AssertUnwindSafe(async { op(txn).await }).catch_unwind().await {
        Ok(Ok(value)) => store.commit_transaction(txn).await.map(|()| value),
        Ok(Err(e)) => Err(e),
        Err(panic) => Err(StoreError::TransactionFailed {
            attempts: attempt,
            reason: format!("operation panicked: {}", panic_message(panic.as_ref())),
        }),
    };
    if outcome.is_err() {
        if let Err(abort_error) = store.abort_transaction(txn).await {
            warn!(%txn, error = %abort_error, "Abort failed");
        }
    }
    outcome
}

/// Delay before the attempt following `attempt`: uniform in `[0, min(cap, base * 2^attempt)]`.
fn backoff(attempt: u32) -> Duration {
    let ceiling = BACKOFF_BASE
        .saturating_mul(1u32 << attempt.min(16))
        .min(BACKOFF_CAP);
    let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}
