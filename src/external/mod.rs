//! Collaborator seams for every external service the pipeline talks to.
//!
//! Each service hides behind an object-safe trait so the orchestrator can be
//! driven end to end against in-memory doubles. The production clients live
//! in the sibling modules.

use anyhow::Result;
use async_trait::async_trait;
use indicatif::ProgressBar;

use crate::errors::JobError;
use crate::poller::{self, PollSettings, PolledStatus, StatusVocabulary};

pub mod cursor;
pub mod github;
pub mod nanobanana;
pub mod slack;
pub mod v0;
pub mod vercel;

pub use cursor::CursorClient;
pub use github::GitHubClient;
pub use nanobanana::NanoBananaClient;
pub use slack::SlackChannel;
pub use v0::V0Client;
pub use vercel::VercelDeployer;

/// Terminal vocabulary of background agent runs.
pub const AGENT_VOCAB: StatusVocabulary = StatusVocabulary {
    success: "FINISHED",
    terminal: &["FINISHED", "STOPPED", "FAILED", "ERROR"],
};

/// Snapshot of one background agent run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub id: String,
    pub status: String,
    /// Branch the agent pushed its work to; present once the run finishes.
    pub branch: Option<String>,
    pub summary: Option<String>,
}

impl PolledStatus for AgentRun {
    fn state(&self) -> &str {
        &self.status
    }
}

/// A file staged for an atomic multi-file commit.
#[derive(Debug, Clone)]
pub struct RepoFile {
    pub path: String,
    /// Base64-encoded content, matching the blob upload encoding.
    pub content_base64: String,
}

/// Result of merging a phase branch into the target branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// Nothing to merge; the target already contains the branch.
    UpToDate,
    /// Non-fast-forwardable divergence; needs a human.
    Conflict,
}

/// Launches and steers background coding agents.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Start an agent against `source_ref` of the repo; returns the run id.
    async fn submit(&self, repo_url: &str, source_ref: &str, prompt: &str) -> Result<String>;

    async fn status(&self, run_id: &str) -> Result<AgentRun>;

    /// Send a correction into a still-open run.
    async fn inject_followup(&self, run_id: &str, text: &str) -> Result<()>;
}

/// Hosted-repo operations the pipeline needs.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Create the repo if absent; returns its clone URL.
    async fn ensure_repo(&self, name: &str, private: bool) -> Result<String>;

    async fn branch_exists(&self, repo: &str, branch: &str) -> Result<bool>;

    async fn create_branch(&self, repo: &str, branch: &str, from: &str) -> Result<()>;

    async fn merge(&self, repo: &str, base: &str, head: &str) -> Result<MergeOutcome>;

    /// Commit several files to a branch as one commit.
    async fn commit_files(
        &self,
        repo: &str,
        branch: &str,
        message: &str,
        files: &[RepoFile],
    ) -> Result<()>;

    /// Read a file's decoded content from a ref, `None` if absent.
    async fn read_file(&self, repo: &str, reference: &str, path: &str) -> Result<Option<String>>;

    /// Open a change request; returns its web URL.
    async fn open_change_request(
        &self,
        repo: &str,
        base: &str,
        head: &str,
        title: &str,
        body: &str,
    ) -> Result<String>;
}

/// One-way run notifications (distinct from the interactive `ReviewChannel`).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Make sure the project's channel exists; returns its id.
    async fn ensure_channel(&self, project: &str) -> Result<String>;

    async fn post(&self, channel: &str, text: &str) -> Result<Option<String>>;
}

/// Text-prompt-to-image generation.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate one image; returns its hosted URL when the task finishes.
    async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<String>;

    /// Fetch the raw bytes of a generated image.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Optional UI-scaffold generation from an approved mockup.
#[async_trait]
pub trait ScaffoldGenerator: Send + Sync {
    /// Best effort; returns generated component source keyed by path.
    async fn scaffold(&self, mockup_url: &str, instructions: &str) -> Result<Vec<(String, String)>>;
}

/// Deployment of the finished target branch.
#[async_trait]
pub trait DeployTarget: Send + Sync {
    /// Trigger a deployment; returns the live URL once the build is ready.
    async fn deploy(&self, project: &str, branch: &str) -> Result<String>;
}

/// Await an agent run with the standard agent vocabulary.
pub async fn await_agent<B: AgentBackend + ?Sized>(
    backend: &B,
    run_id: &str,
    settings: &PollSettings,
    progress: Option<&ProgressBar>,
) -> Result<AgentRun, JobError> {
    poller::await_job(run_id, &AGENT_VOCAB, settings, progress, || {
        backend.status(run_id)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct SequencedBackend {
        states: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl AgentBackend for SequencedBackend {
        async fn submit(&self, _repo: &str, _source: &str, _prompt: &str) -> Result<String> {
            Ok("run-1".into())
        }

        async fn status(&self, run_id: &str) -> Result<AgentRun> {
            let mut states = self.states.lock().unwrap();
            let status = if states.len() > 1 {
                states.remove(0)
            } else {
                states[0]
            };
            Ok(AgentRun {
                id: run_id.to_string(),
                status: status.to_string(),
                branch: Some("agent/run-1".into()),
                summary: Some("did the thing".into()),
            })
        }

        async fn inject_followup(&self, _run_id: &str, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn await_agent_reaches_finished() {
        let backend = SequencedBackend {
            states: Mutex::new(vec!["CREATING", "RUNNING", "FINISHED"]),
        };
        let settings = PollSettings::new(Duration::from_secs(15), 10);
        let run = await_agent(&backend, "run-1", &settings, None).await.unwrap();
        assert_eq!(run.status, "FINISHED");
        assert_eq!(run.branch.as_deref(), Some("agent/run-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn await_agent_surfaces_stopped() {
        let backend = SequencedBackend {
            states: Mutex::new(vec!["RUNNING", "STOPPED"]),
        };
        let settings = PollSettings::new(Duration::from_secs(15), 10);
        let err = await_agent(&backend, "run-2", &settings, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::TerminatedUnsuccessfully { ref state, .. } if state == "STOPPED"
        ));
    }
}
