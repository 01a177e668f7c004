//! Query Context
//!
//! Cancellation and deadline inherited from the caller. Every suspension
//! point of the query engine races its work against the context.

use crate::domain::errors::QueryError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-owned cancellation scope for one or more queries.
///
/// Cloning shares the same cancellation token and deadline.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl QueryContext {
    /// A context that is never canceled unless [`QueryContext::cancel`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline(Instant::now() + timeout)
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Derive a context canceled together with this one, but which can
    /// also be canceled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the error describing why this context is done, if it is.
    pub fn err(&self) -> Option<QueryError> {
        if self.cancel.is_cancelled() {
            return Some(QueryError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(QueryError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Run `fut` until it completes or this context is done, whichever
    /// comes first. `fut` is dropped when the context wins.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, QueryError> {
        if let Some(err) = self.err() {
            return Err(err);
        }

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(QueryError::Canceled),
            _ = expired => Err(QueryError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}
