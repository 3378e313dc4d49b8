//! Best-effort UI scaffold generation from an approved mockup via v0.
//!
//! The scaffold is an accelerant for the design translation phase, never a
//! gate: callers treat any failure here as "no scaffold" and move on.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::external::ScaffoldGenerator;
use crate::retry::Transport;

const API_BASE: &str = "https://api.v0.dev/v1";

pub struct V0Client {
    transport: Transport,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(rename = "latestVersion", default)]
    latest_version: Option<ChatVersion>,
}

#[derive(Debug, Deserialize)]
struct ChatVersion {
    #[serde(default)]
    files: Vec<ChatFile>,
}

#[derive(Debug, Deserialize)]
struct ChatFile {
    name: String,
    content: String,
}

impl V0Client {
    pub fn new(transport: Transport, api_key: &str) -> Self {
        Self {
            transport,
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl ScaffoldGenerator for V0Client {
    async fn scaffold(&self, mockup_url: &str, instructions: &str) -> Result<Vec<(String, String)>> {
        let message = format!(
            "Recreate this UI mockup as React components with Tailwind. {instructions}"
        );
        let request = self
            .transport
            .client()
            .post(format!("{API_BASE}/chats"))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "message": message,
                "attachments": [{ "url": mockup_url }],
            }));
        let response = self.transport.execute_ok("v0:chats", request).await?;
        let chat: ChatResponse = response
            .json()
            .await
            .context("decoding scaffold response")?;
        let files = chat
            .latest_version
            .map(|version| {
                version
                    .files
                    .into_iter()
                    .map(|file| (file.name, file.content))
                    .collect()
            })
            .unwrap_or_default();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_response_yields_named_files() {
        let chat: ChatResponse = serde_json::from_value(json!({
            "id": "chat-1",
            "latestVersion": {
                "files": [
                    { "name": "components/hero.tsx", "content": "export const Hero = ..." }
                ]
            }
        }))
        .unwrap();
        let files = chat.latest_version.unwrap().files;
        assert_eq!(files[0].name, "components/hero.tsx");
    }

    #[test]
    fn chat_response_without_version_is_empty_not_error() {
        let chat: ChatResponse = serde_json::from_value(json!({ "id": "chat-2" })).unwrap();
        assert!(chat.latest_version.is_none());
    }
}
