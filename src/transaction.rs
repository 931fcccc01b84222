//! Units of work wrapped in storage transactions.
//!
//! [`run_in_transaction`] opens a session, exposes it to the work through a
//! task-local [`TransactionContext`], and commits. Nested calls join the
//! outer transaction instead of opening a new one. Two kinds of failure are
//! retried:
//!
//! - a commit that ends with the `UnknownTransactionCommitResult` label is
//!   committed again,
//! - work or a commit that fails with the `TransientTransactionError` label
//!   aborts and replays the whole transaction. Panics whose payload is such a
//!   [`StorageError`] are treated the same way.
//!
//! Replayed work must be safe to run again.

use crate::config::ResolvedConfig;
use crate::errors::{log_redacted, ImportError, StorageError};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// An open storage transaction.
#[async_trait]
pub trait ClientSession: Send + Sync {
    async fn commit_transaction(&self) -> Result<(), StorageError>;
    async fn abort_transaction(&self) -> Result<(), StorageError>;
    /// Lets a store recover its own session type from the ambient context.
    fn as_any(&self) -> &dyn Any;
}

/// Starts sessions with a transaction already open.
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn start_transaction(&self) -> Result<Arc<dyn ClientSession>, StorageError>;
}

tokio::task_local! {
    static CURRENT_TRANSACTION: TransactionContext;
}

/// The transaction bound to the current unit of work.
#[derive(Clone)]
pub struct TransactionContext {
    session: Arc<dyn ClientSession>,
}

impl TransactionContext {
    /// The active transaction of this task, if any.
    pub fn current() -> Option<Self> {
        CURRENT_TRANSACTION.try_with(|ctx| ctx.clone()).ok()
    }

    pub fn session(&self) -> &dyn ClientSession {
        self.session.as_ref()
    }

    pub fn session_as<T: 'static>(&self) -> Option<&T> {
        self.session.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext").finish_non_exhaustive()
    }
}

/// How a definitive commit failure is reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFailureMode {
    /// Return the storage error as is.
    Propagate,
    /// Log it with a reference id and return an opaque error.
    Unexpected,
}

/// Errors the runner can classify and build.
pub trait TransientFailure: From<StorageError> + fmt::Display {
    /// True if the whole transaction may be replayed.
    fn is_transient(&self) -> bool;

    /// Opaque error for a commit failure in [`CommitFailureMode::Unexpected`].
    fn unexpected_commit_failure(err: StorageError) -> Self;
}

impl TransientFailure for StorageError {
    fn is_transient(&self) -> bool {
        self.is_transient_transaction_error()
    }

    fn unexpected_commit_failure(err: StorageError) -> Self {
        StorageError::new(format!(
            "unexpected commit failure (reference {})",
            log_redacted(&err)
        ))
    }
}

impl TransientFailure for ImportError {
    fn is_transient(&self) -> bool {
        matches!(self, ImportError::Storage(e) if e.is_transient_transaction_error())
    }

    fn unexpected_commit_failure(err: StorageError) -> Self {
        ImportError::unexpected(&err)
    }
}

/// Retry bounds. `None` means no bound.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub commit_retry_limit: Option<u32>,
    pub transaction_retry_limit: Option<u32>,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            commit_retry_limit: None,
            transaction_retry_limit: None,
            initial_delay_ms: 10,
            max_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            commit_retry_limit: config.commit_retry_limit,
            transaction_retry_limit: config.transaction_retry_limit,
            ..Self::default()
        }
    }

    fn allows(limit: Option<u32>, retries_so_far: u32) -> bool {
        limit.map_or(true, |max| retries_so_far < max)
    }

    /// `min(initial_delay * 2^attempt, max_delay)`
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.min(16));
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// A failed attempt that may be replayed.
enum Failure<E> {
    Work(E),
    Commit(StorageError),
    Panic(Box<dyn Any + Send>),
}

impl<E: TransientFailure + 'static> Failure<E> {
    fn describe(&self) -> String {
        match self {
            Failure::Work(e) => e.to_string(),
            Failure::Commit(e) => e.to_string(),
            Failure::Panic(payload) => payload
                .downcast_ref::<StorageError>()
                .map(ToString::to_string)
                .or_else(|| payload.downcast_ref::<E>().map(ToString::to_string))
                .unwrap_or_else(|| "panic".to_string()),
        }
    }

    fn raise<T>(self, mode: CommitFailureMode) -> Result<T, E> {
        match self {
            Failure::Work(e) => Err(e),
            Failure::Commit(e) => Err(commit_failure(e, mode)),
            Failure::Panic(payload) => panic::resume_unwind(payload),
        }
    }
}

fn commit_failure<E: TransientFailure>(err: StorageError, mode: CommitFailureMode) -> E {
    match mode {
        CommitFailureMode::Propagate => E::from(err),
        CommitFailureMode::Unexpected => E::unexpected_commit_failure(err),
    }
}

/// A panic is transient if it carries a labelled `StorageError` or the work's own error type.
fn is_transient_panic<E: TransientFailure + 'static>(payload: &(dyn Any + Send)) -> bool {
    payload
        .downcast_ref::<StorageError>()
        .is_some_and(StorageError::is_transient_transaction_error)
        || payload.downcast_ref::<E>().is_some_and(E::is_transient)
}

/// Runs `work` inside a transaction started from `sessions`.
///
/// If a transaction is already active on this task, `work` runs once inside
/// it and nothing is committed here.
///
/// # Errors
///
/// Returns the first non-transient error from `work`, or the commit error
/// reported according to `mode`. Transient failures are returned only once
/// `policy.transaction_retry_limit` is exhausted. Panics that are not
/// transient storage errors are resumed after the transaction is aborted.
pub async fn run_in_transaction<S, F, Fut, T, E>(
    sessions: &S,
    policy: &RetryPolicy,
    mode: CommitFailureMode,
    mut work: F,
) -> Result<T, E>
where
    S: SessionSource + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: TransientFailure + 'static,
{
    if TransactionContext::current().is_some() {
        debug!("Joining active transaction");
        return work().await;
    }

    let mut attempt = 0u32;
    loop {
        let session = sessions.start_transaction().await.map_err(E::from)?;
        let context = TransactionContext {
            session: session.clone(),
        };
        let outcome = AssertUnwindSafe(CURRENT_TRANSACTION.scope(context, work()))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(value)) => match commit_with_retry(session.as_ref(), policy).await {
                Ok(()) => return Ok(value),
                Err(err) if err.is_transient_transaction_error() => Failure::Commit(err),
                Err(err) => {
                    abort_quietly(session.as_ref()).await;
                    return Err(commit_failure(err, mode));
                }
            },
            Ok(Err(err)) if err.is_transient() => Failure::Work(err),
            Ok(Err(err)) => {
                abort_quietly(session.as_ref()).await;
                return Err(err);
            }
            Err(payload) if is_transient_panic::<E>(payload.as_ref()) => Failure::Panic(payload),
            Err(payload) => {
                abort_quietly(session.as_ref()).await;
                panic::resume_unwind(payload);
            }
        };

        abort_quietly(session.as_ref()).await;
        if !RetryPolicy::allows(policy.transaction_retry_limit, attempt) {
            warn!(
                attempts = attempt + 1,
                error = %failure.describe(),
                "Transaction retry limit reached"
            );
            return failure.raise(mode);
        }

        let delay = policy.backoff(attempt);
        warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %failure.describe(),
            "Retrying transaction after transient error"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

async fn commit_with_retry(
    session: &dyn ClientSession,
    policy: &RetryPolicy,
) -> Result<(), StorageError> {
    let mut retries = 0u32;
    loop {
        match session.commit_transaction().await {
            Ok(()) => return Ok(()),
            Err(err)
                if err.is_unknown_commit_result()
                    && RetryPolicy::allows(policy.commit_retry_limit, retries) =>
            {
                warn!(retry = retries + 1, error = %err, "Retrying commit after unknown result");
                retries += 1;
                tokio::task::yield_now().await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn abort_quietly(session: &dyn ClientSession) {
    if let Err(e) = session.abort_transaction().await {
        debug!(error = %e, "Abort after failed transaction also failed");
    }
}
