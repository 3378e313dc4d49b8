//! Generic polling for long-running external jobs.
//!
//! The poller is vocabulary-agnostic: callers supply a status-fetch closure
//! and a `StatusVocabulary` naming the one success state and the full
//! terminal set. The same loop awaits agent runs (15 s x 480), image tasks
//! (3 s x 120), and deployment builds (10 s x 40).

use std::future::Future;
use std::time::Duration;

use indicatif::ProgressBar;
use tracing::debug;

use crate::errors::JobError;

/// Default cadence for agent jobs: 15 s x 480 polls = 2 h ceiling.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_POLLS: u32 = 480;

/// Poll cadence and ceiling for one job kind.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}

impl PollSettings {
    pub fn new(interval: Duration, max_polls: u32) -> Self {
        Self {
            interval,
            max_polls,
        }
    }

    /// Total time the poller will wait before declaring a timeout.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_polls
    }
}

/// The status vocabulary of one external job kind.
///
/// `terminal` must include `success`; any terminal state that is not the
/// success state fails the job.
#[derive(Debug, Clone, Copy)]
pub struct StatusVocabulary {
    pub success: &'static str,
    pub terminal: &'static [&'static str],
}

impl StatusVocabulary {
    pub fn is_success(&self, state: &str) -> bool {
        state == self.success
    }

    pub fn is_terminal(&self, state: &str) -> bool {
        self.terminal.contains(&state)
    }
}

/// A status snapshot the poller can classify.
pub trait PolledStatus {
    fn state(&self) -> &str;
}

/// Await a job until it reaches a terminal state or the ceiling is hit.
///
/// Suspends between polls; the only side effect is progress reporting via
/// the optional spinner. Success returns the final snapshot; a terminal
/// non-success state or an exhausted ceiling fail with the matching
/// `JobError` variant.
pub async fn await_job<S, F, Fut>(
    job_id: &str,
    vocab: &StatusVocabulary,
    settings: &PollSettings,
    progress: Option<&ProgressBar>,
    mut fetch: F,
) -> Result<S, JobError>
where
    S: PolledStatus,
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<S>>,
{
    for poll in 1..=settings.max_polls {
        tokio::time::sleep(settings.interval).await;

        let snapshot = fetch().await.map_err(|source| JobError::StatusFetch {
            job_id: job_id.to_string(),
            source,
        })?;
        let state = snapshot.state().to_string();
        let elapsed = settings.interval * poll;

        if let Some(bar) = progress {
            bar.set_message(format!("{state} ({}s elapsed)", elapsed.as_secs()));
        }
        debug!(job_id, state = %state, elapsed_secs = elapsed.as_secs(), "poll");

        if vocab.is_success(&state) {
            return Ok(snapshot);
        }
        if vocab.is_terminal(&state) {
            return Err(JobError::TerminatedUnsuccessfully {
                job_id: job_id.to_string(),
                state,
            });
        }
    }

    Err(JobError::TimedOut {
        job_id: job_id.to_string(),
        waited: settings.ceiling(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    const VOCAB: StatusVocabulary = StatusVocabulary {
        success: "FINISHED",
        terminal: &["FINISHED", "STOPPED", "FAILED", "ERROR"],
    };

    #[derive(Debug)]
    struct Snapshot(String);

    impl PolledStatus for Snapshot {
        fn state(&self) -> &str {
            &self.0
        }
    }

    fn fast_settings(max_polls: u32) -> PollSettings {
        PollSettings::new(Duration::from_secs(15), max_polls)
    }

    async fn scripted(states: &'static [&'static str], settings: PollSettings) -> Result<Snapshot, JobError> {
        let calls = AtomicU32::new(0);
        await_job("job-1", &VOCAB, &settings, None, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) as usize;
            let state = states[n.min(states.len() - 1)];
            async move { Ok(Snapshot(state.to_string())) }
        })
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn returns_snapshot_on_success_state() {
        let result = scripted(&["RUNNING", "RUNNING", "FINISHED"], fast_settings(10)).await;
        assert_eq!(result.unwrap().state(), "FINISHED");
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_non_success_fails_with_state() {
        let result = scripted(&["RUNNING", "FAILED"], fast_settings(10)).await;
        match result.unwrap_err() {
            JobError::TerminatedUnsuccessfully { job_id, state } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(state, "FAILED");
            }
            other => panic!("expected TerminatedUnsuccessfully, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_exhaustion_times_out() {
        let result = scripted(&["RUNNING"], fast_settings(4)).await;
        match result.unwrap_err() {
            JobError::TimedOut { waited, .. } => {
                assert_eq!(waited, Duration::from_secs(60));
            }
            other => panic!("expected TimedOut, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn suspends_for_interval_between_polls() {
        let start = Instant::now();
        let _ = scripted(&["RUNNING", "FINISHED"], fast_settings(10)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_error_propagates_with_job_id() {
        let result: Result<Snapshot, JobError> =
            await_job("job-9", &VOCAB, &fast_settings(5), None, || async {
                Err(anyhow::anyhow!("connection reset"))
            })
            .await;
        match result.unwrap_err() {
            JobError::StatusFetch { job_id, .. } => assert_eq!(job_id, "job-9"),
            other => panic!("expected StatusFetch, got {other}"),
        }
    }

    #[test]
    fn vocabulary_classifies_states() {
        assert!(VOCAB.is_success("FINISHED"));
        assert!(VOCAB.is_terminal("FINISHED"));
        assert!(VOCAB.is_terminal("STOPPED"));
        assert!(!VOCAB.is_terminal("RUNNING"));
    }
}
