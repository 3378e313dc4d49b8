//! Slack as both the notification feed and the approval channel.
//!
//! Gate questions are posted as messages and answered by thread reply, by a
//! top-level channel message, or by emoji reaction on the gate message
//! itself. Answers are polled every 5 s;
//! an unanswered gate auto-approves after 15 minutes (30 for design variant
//! selection) so an unattended run keeps moving. Auto-approvals are logged
//! as such.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::approval::{
    ApprovalDecision, RetryDecision, ReviewChannel, VariantSelection, parse_decision,
    reaction_decision,
};
use crate::assets::{DesignVariant, parse_variant_reply};
use crate::external::Notifier;
use crate::retry::Transport;

const API_BASE: &str = "https://slack.com/api";

pub const REPLY_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DECISION_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const SELECTION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Default, Clone)]
struct GateContext {
    channel: Option<String>,
    thread: Option<String>,
}

pub struct SlackChannel {
    transport: Transport,
    token: String,
    /// Only this user's replies and reactions count at gates, when set.
    user_id: Option<String>,
    context: Mutex<GateContext>,
}

impl SlackChannel {
    pub fn new(transport: Transport, token: &str, user_id: Option<String>) -> Self {
        Self {
            transport,
            token: token.to_string(),
            user_id,
            context: Mutex::new(GateContext::default()),
        }
    }

    /// Point subsequent gate traffic at a channel and optional thread root.
    pub fn set_context(&self, channel: &str, thread: Option<&str>) {
        let mut ctx = self.context.lock().unwrap();
        ctx.channel = Some(channel.to_string());
        ctx.thread = thread.map(str::to_string);
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value> {
        let request = self
            .transport
            .client()
            .post(format!("{API_BASE}/{method}"))
            .bearer_auth(&self.token)
            .json(&body);
        let response = self
            .transport
            .execute_ok(&format!("slack:{method}"), request)
            .await?;
        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("decoding slack {method} response"))?;
        if payload["ok"].as_bool() != Some(true) {
            let error = payload["error"].as_str().unwrap_or("unknown");
            bail!("slack {method} failed: {error}");
        }
        Ok(payload)
    }

    fn gate_channel(&self) -> Result<(String, Option<String>)> {
        let ctx = self.context.lock().unwrap();
        let channel = ctx
            .channel
            .clone()
            .context("slack gate used before a channel was set")?;
        Ok((channel, ctx.thread.clone()))
    }

    /// Post into the current gate context; returns the message timestamp.
    async fn post_gate(&self, text: &str) -> Result<String> {
        let (channel, thread) = self.gate_channel()?;
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(ts) = thread {
            body["thread_ts"] = Value::String(ts);
        }
        let payload = self.call("chat.postMessage", body).await?;
        payload["ts"]
            .as_str()
            .map(str::to_string)
            .context("postMessage response missing ts")
    }

    /// Newest human-authored text strictly after `after`. Bot- and
    /// app-authored messages never count as answers, so the bot cannot read
    /// its own status posts back as decisions.
    fn newest_text(&self, messages: Vec<Value>, after: f64) -> Option<String> {
        let mut latest: Option<(f64, String)> = None;
        for message in messages {
            let Some(ts) = message["ts"].as_str().and_then(|t| t.parse::<f64>().ok()) else {
                continue;
            };
            if ts <= after {
                continue;
            }
            if !message["bot_id"].is_null() || !message["app_id"].is_null() {
                continue;
            }
            if let Some(user) = &self.user_id {
                if message["user"].as_str() != Some(user) {
                    continue;
                }
            }
            if let Some(text) = message["text"].as_str() {
                if latest.as_ref().is_none_or(|(seen, _)| ts > *seen) {
                    latest = Some((ts, text.to_string()));
                }
            }
        }
        latest.map(|(_, text)| text)
    }

    /// Latest thread message posted after the gate message. Replies live
    /// under the thread root, so the scan runs over the root and filters by
    /// timestamp.
    async fn latest_reply(
        &self,
        channel: &str,
        root_ts: &str,
        after_ts: &str,
    ) -> Result<Option<String>> {
        let payload = self
            .call(
                "conversations.replies",
                json!({ "channel": channel, "ts": root_ts }),
            )
            .await?;
        let messages = payload["messages"].as_array().cloned().unwrap_or_default();
        Ok(self.newest_text(messages, after_ts.parse().unwrap_or(0.0)))
    }

    /// Latest top-level channel message after the gate, for reviewers who
    /// answer in the channel instead of the thread.
    async fn latest_channel_message(
        &self,
        channel: &str,
        after_ts: &str,
    ) -> Result<Option<String>> {
        let payload = self
            .call(
                "conversations.history",
                json!({ "channel": channel, "oldest": after_ts, "limit": 50 }),
            )
            .await?;
        let messages = payload["messages"].as_array().cloned().unwrap_or_default();
        Ok(self.newest_text(messages, after_ts.parse().unwrap_or(0.0)))
    }

    /// Newest answer from either the gate thread or the channel itself.
    async fn latest_answer(
        &self,
        channel: &str,
        root_ts: &str,
        after_ts: &str,
    ) -> Result<Option<String>> {
        if let Some(text) = self.latest_reply(channel, root_ts, after_ts).await? {
            return Ok(Some(text));
        }
        self.latest_channel_message(channel, after_ts).await
    }

    /// Decision-bearing reaction on the gate message from the configured user.
    async fn reaction_reply(&self, channel: &str, ts: &str) -> Result<Option<ApprovalDecision>> {
        let payload = self
            .call(
                "reactions.get",
                json!({ "channel": channel, "timestamp": ts }),
            )
            .await?;
        let reactions = payload["message"]["reactions"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for reaction in reactions {
            let Some(name) = reaction["name"].as_str() else {
                continue;
            };
            if let Some(user) = &self.user_id {
                let users = reaction["users"].as_array().cloned().unwrap_or_default();
                if !users.iter().any(|u| u.as_str() == Some(user)) {
                    continue;
                }
            }
            if let Some(decision) = reaction_decision(name) {
                return Ok(Some(decision));
            }
        }
        Ok(None)
    }

    /// Poll replies and reactions until a decision arrives or the window
    /// closes. `None` means the window closed unanswered.
    async fn poll_for_decision(
        &self,
        channel: &str,
        root_ts: &str,
        gate_ts: &str,
        window: Duration,
    ) -> Result<Option<ApprovalDecision>> {
        let rounds = (window.as_secs() / REPLY_POLL_INTERVAL.as_secs()).max(1);
        for _ in 0..rounds {
            tokio::time::sleep(REPLY_POLL_INTERVAL).await;
            if let Some(decision) = self.reaction_reply(channel, gate_ts).await? {
                return Ok(Some(decision));
            }
            if let Some(text) = self.latest_answer(channel, root_ts, gate_ts).await? {
                if let Some(decision) = parse_decision(&text) {
                    return Ok(Some(decision));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Notifier for SlackChannel {
    async fn ensure_channel(&self, project: &str) -> Result<String> {
        let name = format!("proj-{project}").to_lowercase();
        let payload = self
            .call(
                "conversations.list",
                json!({ "types": "public_channel", "limit": 1000 }),
            )
            .await?;
        if let Some(channels) = payload["channels"].as_array() {
            for channel in channels {
                if channel["name"].as_str() == Some(name.as_str()) {
                    if let Some(id) = channel["id"].as_str() {
                        return Ok(id.to_string());
                    }
                }
            }
        }
        info!(channel = %name, "creating slack channel");
        let payload = self
            .call("conversations.create", json!({ "name": name }))
            .await?;
        let id = payload["channel"]["id"]
            .as_str()
            .map(str::to_string)
            .context("conversations.create response missing channel id")?;

        // First creation only: topic and operator invite are best effort.
        let topic = format!("pipeline runs for {project}");
        if let Err(error) = self
            .call(
                "conversations.setTopic",
                json!({ "channel": id, "topic": topic }),
            )
            .await
        {
            warn!("could not set channel topic: {error:#}");
        }
        if let Some(user) = &self.user_id {
            if let Err(error) = self
                .call(
                    "conversations.invite",
                    json!({ "channel": id, "users": user }),
                )
                .await
            {
                warn!("could not invite operator: {error:#}");
            }
        }
        Ok(id)
    }

    async fn post(&self, channel: &str, text: &str) -> Result<Option<String>> {
        let payload = self
            .call(
                "chat.postMessage",
                json!({ "channel": channel, "text": text }),
            )
            .await?;
        Ok(payload["ts"].as_str().map(str::to_string))
    }
}

#[async_trait]
impl ReviewChannel for SlackChannel {
    async fn announce(&self, text: &str) -> Result<()> {
        self.post_gate(text).await?;
        Ok(())
    }

    async fn await_decision(
        &self,
        phase_name: &str,
        summary: &str,
        branch_url: &str,
    ) -> Result<ApprovalDecision> {
        let (channel, thread) = self.gate_channel()?;
        let text = format!(
            "*{phase_name}* finished.\n{summary}\nbranch: {branch_url}\n\
             Reply `approve`, `stop`, or a followup, or react 👍 / 🛑. \
             Auto-approves in 15 minutes."
        );
        let ts = self.post_gate(&text).await?;
        let root = thread.unwrap_or_else(|| ts.clone());
        match self
            .poll_for_decision(&channel, &root, &ts, DECISION_TIMEOUT)
            .await?
        {
            Some(decision) => Ok(decision),
            None => {
                warn!(phase = phase_name, "approval window closed, auto-approving");
                self.post_gate(&format!("⏰ no answer in 15 minutes, auto-approving {phase_name}"))
                    .await?;
                Ok(ApprovalDecision::Approve)
            }
        }
    }

    async fn select_variant(&self, variants: &[DesignVariant]) -> Result<Option<VariantSelection>> {
        let (channel, thread) = self.gate_channel()?;
        let mut text = String::from("*Design directions ready.* Reply with a number, optionally followed by feedback (`2 darker background`), or `stop`.\n");
        for (i, variant) in variants.iter().enumerate() {
            text.push_str(&format!(
                "{}. *{}* — {}\n{}\n",
                i + 1,
                variant.name,
                variant.philosophy,
                variant.image_url
            ));
        }
        text.push_str("Auto-selects option 1 in 30 minutes.");
        let ts = self.post_gate(&text).await?;
        let root = thread.unwrap_or_else(|| ts.clone());

        let mut last_seen = ts.clone();
        let rounds = (SELECTION_TIMEOUT.as_secs() / REPLY_POLL_INTERVAL.as_secs()).max(1);
        for _ in 0..rounds {
            tokio::time::sleep(REPLY_POLL_INTERVAL).await;
            let Some(reply) = self.latest_answer(&channel, &root, &last_seen).await? else {
                continue;
            };
            if matches!(parse_decision(&reply), Some(ApprovalDecision::Stop)) {
                return Ok(None);
            }
            match parse_variant_reply(&reply, variants.len()) {
                Ok((index, feedback)) => return Ok(Some(VariantSelection { index, feedback })),
                Err(error) => {
                    // Move the cursor past the nudge so it is not re-read.
                    last_seen = self
                        .post_gate(&format!("could not read that: {error}"))
                        .await?;
                }
            }
        }

        warn!("selection window closed, auto-selecting the first direction");
        self.post_gate("⏰ no answer in 30 minutes, going with option 1")
            .await?;
        Ok(Some(VariantSelection {
            index: 0,
            feedback: String::new(),
        }))
    }

    async fn prompt_retry(&self, phase_name: &str, error: &str) -> Result<RetryDecision> {
        let (channel, thread) = self.gate_channel()?;
        let text = format!(
            "❌ *{phase_name}* failed: {error}\nReply `retry` (or 👍) to run it again, `stop` (or 🛑) to end the run. Stops in 15 minutes if unanswered."
        );
        let ts = self.post_gate(&text).await?;
        let root = thread.unwrap_or_else(|| ts.clone());
        let rounds = (DECISION_TIMEOUT.as_secs() / REPLY_POLL_INTERVAL.as_secs()).max(1);
        for _ in 0..rounds {
            tokio::time::sleep(REPLY_POLL_INTERVAL).await;
            if let Some(decision) = self.reaction_reply(&channel, &ts).await? {
                return Ok(match decision {
                    ApprovalDecision::Approve => RetryDecision::Retry,
                    _ => RetryDecision::Stop,
                });
            }
            if let Some(reply) = self.latest_answer(&channel, &root, &ts).await? {
                let lower = reply.trim().to_lowercase();
                if lower == "retry" || lower == "r" || lower == "yes" || lower == "y" {
                    return Ok(RetryDecision::Retry);
                }
                if matches!(parse_decision(&reply), Some(ApprovalDecision::Stop)) {
                    return Ok(RetryDecision::Stop);
                }
            }
        }
        warn!(phase = phase_name, "retry window closed unanswered, stopping");
        Ok(RetryDecision::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_must_be_set_before_gating() {
        let channel = SlackChannel::new(
            Transport::new(crate::retry::RetryPolicy::default()),
            "xoxb-test",
            None,
        );
        assert!(channel.gate_channel().is_err());
        channel.set_context("C0123", Some("171.002"));
        let (id, thread) = channel.gate_channel().unwrap();
        assert_eq!(id, "C0123");
        assert_eq!(thread.as_deref(), Some("171.002"));
    }

    fn test_channel(user_id: Option<String>) -> SlackChannel {
        SlackChannel::new(
            Transport::new(crate::retry::RetryPolicy::default()),
            "xoxb-test",
            user_id,
        )
    }

    #[test]
    fn bot_and_app_messages_never_read_as_answers() {
        let channel = test_channel(None);
        let messages = vec![
            json!({ "ts": "100.1", "text": "working on it", "bot_id": "B01", "user": "U9" }),
            json!({ "ts": "100.2", "text": "status update", "app_id": "A01" }),
            json!({ "ts": "100.3", "text": "approve", "user": "U1" }),
        ];
        assert_eq!(
            channel.newest_text(messages, 99.0),
            Some("approve".to_string())
        );
    }

    #[test]
    fn messages_at_or_before_the_gate_are_ignored() {
        let channel = test_channel(None);
        let messages = vec![
            json!({ "ts": "99.0", "text": "old chatter", "user": "U1" }),
            json!({ "ts": "100.0", "text": "the gate itself", "user": "U1" }),
        ];
        assert_eq!(channel.newest_text(messages, 100.0), None);
    }

    #[test]
    fn configured_user_filter_applies_on_top_of_bot_filter() {
        let channel = test_channel(Some("U1".to_string()));
        let messages = vec![
            json!({ "ts": "100.1", "text": "stop", "user": "U2" }),
            json!({ "ts": "100.2", "text": "approve", "user": "U1" }),
            json!({ "ts": "100.3", "text": "later chatter", "user": "U3" }),
        ];
        assert_eq!(
            channel.newest_text(messages, 100.0),
            Some("approve".to_string())
        );
    }

    #[test]
    fn newest_of_several_answers_wins() {
        let channel = test_channel(None);
        let messages = vec![
            json!({ "ts": "100.2", "text": "followup: fix the nav", "user": "U1" }),
            json!({ "ts": "100.5", "text": "approve", "user": "U1" }),
        ];
        assert_eq!(
            channel.newest_text(messages, 100.0),
            Some("approve".to_string())
        );
    }

    #[test]
    fn decision_window_polls_every_five_seconds() {
        let rounds = DECISION_TIMEOUT.as_secs() / REPLY_POLL_INTERVAL.as_secs();
        assert_eq!(rounds, 180);
        let rounds = SELECTION_TIMEOUT.as_secs() / REPLY_POLL_INTERVAL.as_secs();
        assert_eq!(rounds, 360);
    }
}
