//! Background-agent client for the Cursor API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::external::{AgentBackend, AgentRun};
use crate::retry::Transport;

const API_BASE: &str = "https://api.cursor.com/v0";

pub struct CursorClient {
    transport: Transport,
    auth_header: String,
}

#[derive(Debug, Serialize)]
struct LaunchRequest<'a> {
    prompt: PromptText<'a>,
    source: Source<'a>,
}

#[derive(Debug, Serialize)]
struct PromptText<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Source<'a> {
    repository: &'a str,
    #[serde(rename = "ref")]
    reference: &'a str,
}

#[derive(Debug, Deserialize)]
struct AgentResponse {
    id: String,
    status: String,
    #[serde(default)]
    target: Option<AgentTarget>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgentTarget {
    #[serde(rename = "branchName")]
    branch_name: Option<String>,
}

impl From<AgentResponse> for AgentRun {
    fn from(resp: AgentResponse) -> Self {
        AgentRun {
            id: resp.id,
            status: resp.status,
            branch: resp.target.and_then(|t| t.branch_name),
            summary: resp.summary,
        }
    }
}

impl CursorClient {
    pub fn new(transport: Transport, api_key: &str) -> Self {
        // Basic auth with the key as username and no password.
        let encoded = BASE64.encode(format!("{api_key}:"));
        Self {
            transport,
            auth_header: format!("Basic {encoded}"),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.transport
            .client()
            .request(method, format!("{API_BASE}{path}"))
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json")
    }

    /// Cheap authenticated call to prove the key works.
    pub async fn verify_access(&self) -> Result<()> {
        self.list_models().await.map(|_| ())
    }

    /// Models the agent API will accept for launches.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let request = self.request(reqwest::Method::GET, "/models");
        let response = self.transport.execute_ok("cursor:models", request).await?;
        let parsed: ModelList = response.json().await.context("decoding model list")?;
        Ok(parsed.models)
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<String>,
}

#[async_trait]
impl AgentBackend for CursorClient {
    async fn submit(&self, repo_url: &str, source_ref: &str, prompt: &str) -> Result<String> {
        let body = LaunchRequest {
            prompt: PromptText { text: prompt },
            source: Source {
                repository: repo_url,
                reference: source_ref,
            },
        };
        let request = self.request(reqwest::Method::POST, "/agents").json(&body);
        let response = self.transport.execute_ok("cursor:launch", request).await?;
        let parsed: AgentResponse = response
            .json()
            .await
            .context("decoding agent launch response")?;
        Ok(parsed.id)
    }

    async fn status(&self, run_id: &str) -> Result<AgentRun> {
        let request = self.request(reqwest::Method::GET, &format!("/agents/{run_id}"));
        let response = self.transport.execute_ok("cursor:status", request).await?;
        let parsed: AgentResponse = response
            .json()
            .await
            .context("decoding agent status response")?;
        Ok(parsed.into())
    }

    async fn inject_followup(&self, run_id: &str, text: &str) -> Result<()> {
        let request = self
            .request(reqwest::Method::POST, &format!("/agents/{run_id}/followup"))
            .json(&json!({ "prompt": { "text": text } }));
        self.transport.execute_ok("cursor:followup", request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_encodes_key_with_empty_password() {
        let transport = Transport::new(crate::retry::RetryPolicy::default());
        let client = CursorClient::new(transport, "key_abc123");
        assert_eq!(
            client.auth_header,
            format!("Basic {}", BASE64.encode("key_abc123:"))
        );
    }

    #[test]
    fn agent_response_maps_into_run() {
        let resp: AgentResponse = serde_json::from_value(serde_json::json!({
            "id": "bc-1",
            "status": "FINISHED",
            "target": { "branchName": "cursor/requirements", "url": "https://x" },
            "summary": "wrote the docs"
        }))
        .unwrap();
        let run: AgentRun = resp.into();
        assert_eq!(run.branch.as_deref(), Some("cursor/requirements"));
        assert_eq!(run.summary.as_deref(), Some("wrote the docs"));
    }

    #[test]
    fn model_list_decodes_and_defaults_empty() {
        let parsed: ModelList = serde_json::from_value(serde_json::json!({
            "models": ["claude-4.6-opus-high-thinking", "gpt-5.3-codex-high"]
        }))
        .unwrap();
        assert_eq!(parsed.models.len(), 2);
        let empty: ModelList = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(empty.models.is_empty());
    }

    #[test]
    fn agent_response_tolerates_missing_target() {
        let resp: AgentResponse =
            serde_json::from_value(serde_json::json!({ "id": "bc-2", "status": "CREATING" }))
                .unwrap();
        let run: AgentRun = resp.into();
        assert!(run.branch.is_none());
        assert!(run.summary.is_none());
    }
}
