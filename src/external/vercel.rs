//! Deployment client for Vercel.
//!
//! Triggers a git-sourced deployment of the finished branch, then polls the
//! build every 10 s with a ~7-minute ceiling.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::external::DeployTarget;
use crate::poller::{self, PollSettings, PolledStatus, StatusVocabulary};
use crate::retry::Transport;

const API_BASE: &str = "https://api.vercel.com";

pub const DEPLOY_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEPLOY_MAX_POLLS: u32 = 40;

const DEPLOY_VOCAB: StatusVocabulary = StatusVocabulary {
    success: "READY",
    terminal: &["READY", "ERROR", "CANCELED"],
};

pub struct VercelDeployer {
    transport: Transport,
    token: String,
    /// Numeric GitHub repo id Vercel needs for git-sourced deployments.
    repo_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    id: String,
    #[serde(rename = "readyState")]
    ready_state: String,
    #[serde(default)]
    url: Option<String>,
}

impl PolledStatus for Deployment {
    fn state(&self) -> &str {
        &self.ready_state
    }
}

impl VercelDeployer {
    pub fn new(transport: Transport, token: &str, repo_id: Option<u64>) -> Self {
        Self {
            transport,
            token: token.to_string(),
            repo_id,
        }
    }

    async fn fetch(&self, deployment_id: &str) -> Result<Deployment> {
        let request = self
            .transport
            .client()
            .get(format!("{API_BASE}/v13/deployments/{deployment_id}"))
            .bearer_auth(&self.token);
        let response = self
            .transport
            .execute_ok("vercel:deployment", request)
            .await?;
        response
            .json()
            .await
            .context("decoding deployment status")
    }
}

#[async_trait]
impl DeployTarget for VercelDeployer {
    async fn deploy(&self, project: &str, branch: &str) -> Result<String> {
        let mut git_source = json!({
            "type": "github",
            "ref": branch,
            "repo": project,
        });
        if let Some(id) = self.repo_id {
            git_source["repoId"] = json!(id);
        }
        let request = self
            .transport
            .client()
            .post(format!("{API_BASE}/v13/deployments"))
            .bearer_auth(&self.token)
            .json(&json!({
                "name": project,
                "gitSource": git_source,
                "target": "production",
            }));
        let response = self.transport.execute_ok("vercel:deploy", request).await?;
        let created: Deployment = response
            .json()
            .await
            .context("decoding deployment creation response")?;

        let settings = PollSettings::new(DEPLOY_POLL_INTERVAL, DEPLOY_MAX_POLLS);
        let ready = poller::await_job(&created.id, &DEPLOY_VOCAB, &settings, None, || {
            self.fetch(&created.id)
        })
        .await?;
        let host = ready
            .url
            .or(created.url)
            .with_context(|| format!("deployment {} ready without a url", created.id))?;
        Ok(format!("https://{host}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_states_classify() {
        assert!(DEPLOY_VOCAB.is_success("READY"));
        assert!(DEPLOY_VOCAB.is_terminal("ERROR"));
        assert!(DEPLOY_VOCAB.is_terminal("CANCELED"));
        assert!(!DEPLOY_VOCAB.is_terminal("BUILDING"));
        assert!(!DEPLOY_VOCAB.is_terminal("QUEUED"));
    }

    #[test]
    fn poll_ceiling_is_under_seven_minutes() {
        let settings = PollSettings::new(DEPLOY_POLL_INTERVAL, DEPLOY_MAX_POLLS);
        assert_eq!(settings.ceiling(), Duration::from_secs(400));
    }

    #[test]
    fn deployment_shape() {
        let deployment: Deployment = serde_json::from_value(json!({
            "id": "dpl_1",
            "readyState": "BUILDING",
            "url": "demo-abc.vercel.app"
        }))
        .unwrap();
        assert_eq!(deployment.state(), "BUILDING");
        assert_eq!(deployment.url.as_deref(), Some("demo-abc.vercel.app"));
    }
}
