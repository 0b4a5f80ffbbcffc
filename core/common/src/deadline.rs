//! Bounded waits for network-facing operations.
//!
//! Every wait on peers (discovery flush, remote catch-up, status probes,
//! downloads) goes through [`with_deadline`], so callers decide per site
//! whether an elapsed deadline degrades to a best-effort result or
//! becomes an [`Error::Timeout`].

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Outcome of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deadline<T> {
    /// The future finished in time.
    Completed(T),
    /// The deadline elapsed first; the future was dropped.
    TimedOut,
}

impl<T> Deadline<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Deadline::TimedOut)
    }

    /// Convert to `Some` on completion.
    pub fn completed(self) -> Option<T> {
        match self {
            Deadline::Completed(value) => Some(value),
            Deadline::TimedOut => None,
        }
    }

    /// Convert an elapsed deadline into `Error::Timeout`.
    pub fn or_timeout(self, label: &str, after: Duration) -> Result<T> {
        match self {
            Deadline::Completed(value) => Ok(value),
            Deadline::TimedOut => Err(Error::timeout(label, after)),
        }
    }
}

/// Race `future` against `limit`.
pub async fn with_deadline<F>(limit: Duration, future: F) -> Deadline<F::Output>
where
    F: Future,
{
    match tokio::time::timeout(limit, future).await {
        Ok(value) => Deadline::Completed(value),
        Err(_) => Deadline::TimedOut,
    }
}
