//! Image generation client for the NanoBanana API.
//!
//! Generation is task-based: submit a prompt, then poll the task record
//! every 3 s with a 6-minute ceiling. The API reports progress as a numeric
//! `successFlag` (0 generating, 1 success, 2 create failed, 3 generate
//! failed); the flag is mapped onto the shared status vocabulary before
//! polling.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::external::ImageGenerator;
use crate::poller::{self, PollSettings, PolledStatus, StatusVocabulary};
use crate::retry::Transport;

const API_BASE: &str = "https://api.nanobananaapi.ai/api/v1/nanobanana";

pub const IMAGE_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const IMAGE_MAX_POLLS: u32 = 120;

const IMAGE_VOCAB: StatusVocabulary = StatusVocabulary {
    success: "SUCCESS",
    terminal: &["SUCCESS", "CREATE_FAILED", "GENERATE_FAILED"],
};

pub struct NanoBananaClient {
    transport: Transport,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TaskCreated {
    #[serde(rename = "taskId")]
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskRecord {
    #[serde(rename = "successFlag")]
    success_flag: u8,
    #[serde(default)]
    response: Option<TaskOutput>,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    #[serde(rename = "resultUrls", default)]
    result_urls: Vec<String>,
}

struct TaskSnapshot {
    state: &'static str,
    url: Option<String>,
}

impl PolledStatus for TaskSnapshot {
    fn state(&self) -> &str {
        self.state
    }
}

impl From<TaskRecord> for TaskSnapshot {
    fn from(record: TaskRecord) -> Self {
        let state = match record.success_flag {
            1 => "SUCCESS",
            2 => "CREATE_FAILED",
            3 => "GENERATE_FAILED",
            _ => "GENERATING",
        };
        TaskSnapshot {
            state,
            url: record
                .response
                .and_then(|output| output.result_urls.into_iter().next()),
        }
    }
}

impl NanoBananaClient {
    pub fn new(transport: Transport, api_key: &str) -> Self {
        Self {
            transport,
            api_key: api_key.to_string(),
        }
    }

    async fn submit(&self, prompt: &str, aspect_ratio: &str) -> Result<String> {
        let request = self
            .transport
            .client()
            .post(format!("{API_BASE}/generate"))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "prompt": prompt,
                "type": "TEXTTOIMAGE",
                "imageSize": aspect_ratio,
                "numImages": "1",
            }));
        let response = self
            .transport
            .execute_ok("nanobanana:generate", request)
            .await?;
        let created: Envelope<TaskCreated> = response
            .json()
            .await
            .context("decoding image task creation response")?;
        Ok(created.data.task_id)
    }

    async fn fetch_record(&self, task_id: &str) -> Result<TaskSnapshot> {
        let request = self
            .transport
            .client()
            .get(format!("{API_BASE}/record-info"))
            .query(&[("taskId", task_id)])
            .bearer_auth(&self.api_key);
        let response = self
            .transport
            .execute_ok("nanobanana:record", request)
            .await?;
        let record: Envelope<TaskRecord> = response
            .json()
            .await
            .context("decoding image task record")?;
        Ok(record.data.into())
    }
}

#[async_trait]
impl ImageGenerator for NanoBananaClient {
    async fn generate(&self, prompt: &str, aspect_ratio: &str) -> Result<String> {
        let task_id = self.submit(prompt, aspect_ratio).await?;
        let settings = PollSettings::new(IMAGE_POLL_INTERVAL, IMAGE_MAX_POLLS);
        let snapshot = poller::await_job(&task_id, &IMAGE_VOCAB, &settings, None, || {
            self.fetch_record(&task_id)
        })
        .await?;
        snapshot
            .url
            .with_context(|| format!("image task {task_id} finished without a result url"))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let request = self.transport.client().get(url);
        let response = self
            .transport
            .execute_ok("nanobanana:download", request)
            .await?;
        let bytes = response.bytes().await.context("downloading image bytes")?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(flag: u8, urls: &[&str]) -> TaskRecord {
        serde_json::from_value(json!({
            "successFlag": flag,
            "response": { "resultUrls": urls }
        }))
        .unwrap()
    }

    #[test]
    fn success_flag_mapping() {
        assert_eq!(TaskSnapshot::from(record(0, &[])).state, "GENERATING");
        assert_eq!(TaskSnapshot::from(record(1, &["u"])).state, "SUCCESS");
        assert_eq!(TaskSnapshot::from(record(2, &[])).state, "CREATE_FAILED");
        assert_eq!(TaskSnapshot::from(record(3, &[])).state, "GENERATE_FAILED");
    }

    #[test]
    fn snapshot_carries_first_result_url() {
        let snapshot = TaskSnapshot::from(record(1, &["https://img/one.png", "https://img/two.png"]));
        assert_eq!(snapshot.url.as_deref(), Some("https://img/one.png"));
    }

    #[test]
    fn poll_ceiling_is_six_minutes() {
        let settings = PollSettings::new(IMAGE_POLL_INTERVAL, IMAGE_MAX_POLLS);
        assert_eq!(settings.ceiling(), Duration::from_secs(360));
    }
}
