//! Typed error hierarchy for the conveyor orchestrator.
//!
//! Three top-level enums cover the three layers:
//! - `TransportError` — HTTP-level failures, surfaced only after retries are exhausted
//! - `JobError` — a polled external job ended badly or never ended
//! - `PipelineError` — phase-level failures the run loop must react to

use std::time::Duration;
use thiserror::Error;

/// A transport-level failure. The retry wrapper recovers these locally;
/// callers only ever see one after the retry budget is spent.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {status} from {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("network error calling {endpoint}: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            TransportError::Network { .. } => None,
        }
    }
}

/// Errors from awaiting a single external job.
///
/// The two terminal variants are deliberately distinct: a job that reported a
/// failure state and a job that never reached a terminal state need different
/// operator responses.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {job_id} ended in terminal state {state}")]
    TerminatedUnsuccessfully { job_id: String, state: String },

    #[error("job {job_id} did not reach a terminal state within {}s", waited.as_secs())]
    TimedOut { job_id: String, waited: Duration },

    #[error("status fetch for job {job_id} failed: {source}")]
    StatusFetch {
        job_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl JobError {
    /// The job identifier this error refers to.
    pub fn job_id(&self) -> &str {
        match self {
            JobError::TerminatedUnsuccessfully { job_id, .. }
            | JobError::TimedOut { job_id, .. }
            | JobError::StatusFetch { job_id, .. } => job_id,
        }
    }
}

/// Errors from the phase state machine.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A merge reported a hard conflict. Recoverable by hand: the run halts
    /// and the operator resumes from the next phase on the unmerged agent
    /// ref, so the conflicted work is not discarded.
    #[error("merge conflict: {head} -> {base}; resolve manually, then resume with --from {next_phase} --ref {head}")]
    MergeConflict {
        head: String,
        base: String,
        next_phase: usize,
    },

    #[error("agent finished but reported no branch (job {job_id})")]
    MissingBranch { job_id: String },

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Merge conflicts halt the run but carry explicit recovery instructions,
    /// unlike ordinary phase failures.
    pub fn is_recoverable_conflict(&self) -> bool {
        matches!(self, PipelineError::MergeConflict { .. })
    }
}
