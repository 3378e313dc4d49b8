//! Parallel fan-out of independent sub-jobs with isolated failures.
//!
//! All members of a group run in flight simultaneously and the whole cohort
//! is awaited; one member failing never cancels its siblings and never fails
//! the group. The result is the ordered subset that succeeded — an empty
//! subset is a degraded outcome the caller handles, not an error.

use std::future::Future;

use futures::future::join_all;
use tracing::warn;

/// Outcome of one fan-out group.
#[derive(Debug)]
pub struct GroupResult<T> {
    /// Successful member outputs, in launch order.
    pub succeeded: Vec<T>,
    /// Labels of members that failed (already logged as warnings).
    pub failed: Vec<String>,
}

impl<T> GroupResult<T> {
    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty()
    }

    pub fn launched(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Launch every labeled sub-job concurrently and await the entire cohort.
///
/// Failed members are logged as warnings and dropped; they are never retried
/// within the same invocation.
pub async fn settle_all<T, Fut>(jobs: Vec<(String, Fut)>) -> GroupResult<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    let (labels, futures): (Vec<_>, Vec<_>) = jobs.into_iter().unzip();
    let outcomes = join_all(futures).await;

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for (label, outcome) in labels.into_iter().zip(outcomes) {
        match outcome {
            Ok(value) => succeeded.push(value),
            Err(error) => {
                warn!(member = %label, "sub-job failed: {error:#}");
                failed.push(label);
            }
        }
    }

    GroupResult { succeeded, failed }
}
