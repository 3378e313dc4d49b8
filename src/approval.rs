//! Human-in-the-loop approval gates between phases.
//!
//! A `ReviewChannel` is wherever the human answers from (terminal prompt or
//! chat thread). The gate itself is a small enumerated state machine so that
//! every legal transition is visible in one match.

use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use console::style;
use dialoguer::{Input, Select};
use tracing::info;

use crate::assets::DesignVariant;

/// A human's answer at a phase gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Stop,
    /// Free-form correction to send back to the running agent.
    Followup(String),
}

/// Final outcome of one gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewVerdict {
    /// `reopened` is true when at least one followup round ran first.
    Approved { reopened: bool },
    Stopped,
}

/// Answer to a "phase failed, retry?" prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Stop,
}

/// A chosen design variant plus optional free-form feedback.
#[derive(Debug, Clone)]
pub struct VariantSelection {
    pub index: usize,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GateState {
    Awaiting,
    FollowupSent,
    Approved,
    Stopped,
}

/// Classify a textual reply. `None` means the text is not addressed to the
/// gate; the caller keeps polling. Corrections must be marked with a
/// `followup` prefix so ordinary thread chatter is never injected into the
/// agent.
pub fn parse_decision(text: &str) -> Option<ApprovalDecision> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.to_lowercase().as_str() {
        "approve" | "a" | "yes" | "y" | "lgtm" => return Some(ApprovalDecision::Approve),
        "stop" | "s" | "no" | "abort" => return Some(ApprovalDecision::Stop),
        _ => {}
    }
    for prefix in ["followup:", "followup ", "f:", "f "] {
        if let Some(rest) = strip_prefix_ci(trimmed, prefix) {
            let correction = rest.trim();
            // A bare followup keyword carries no correction to send.
            if correction.is_empty() {
                return None;
            }
            return Some(ApprovalDecision::Followup(correction.to_string()));
        }
    }
    None
}

/// ASCII-case-insensitive prefix strip that slices the original text, so
/// multibyte characters after the prefix survive untouched.
fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

/// Map an emoji reaction name to a decision.
pub fn reaction_decision(reaction: &str) -> Option<ApprovalDecision> {
    const POSITIVE: &[&str] = &[
        "+1",
        "thumbsup",
        "white_check_mark",
        "heavy_check_mark",
        "approved",
    ];
    const NEGATIVE: &[&str] = &["octagonal_sign", "x", "no_entry", "stop_sign", "hand"];
    if POSITIVE.contains(&reaction) {
        Some(ApprovalDecision::Approve)
    } else if NEGATIVE.contains(&reaction) {
        Some(ApprovalDecision::Stop)
    } else {
        None
    }
}

/// Where gate questions are asked and answered.
#[async_trait]
pub trait ReviewChannel: Send + Sync {
    /// One-way status line, no answer expected.
    async fn announce(&self, text: &str) -> Result<()>;

    /// Present a finished phase and wait for approve / stop / followup.
    async fn await_decision(
        &self,
        phase_name: &str,
        summary: &str,
        branch_url: &str,
    ) -> Result<ApprovalDecision>;

    /// Present mockup variants and wait for a pick. `None` stops the run.
    async fn select_variant(&self, variants: &[DesignVariant]) -> Result<Option<VariantSelection>>;

    /// Ask whether a failed phase should be retried in place.
    async fn prompt_retry(&self, phase_name: &str, error: &str) -> Result<RetryDecision>;
}

/// Run the approval gate for one finished phase.
///
/// `apply_followup` sends the correction to the still-open job and awaits it
/// again, returning the refreshed summary that is re-presented at the gate.
/// There is no bound on followup rounds; only Approve and Stop exit.
pub async fn review_phase<F, Fut>(
    channel: &dyn ReviewChannel,
    phase_name: &str,
    branch_url: &str,
    mut summary: String,
    mut apply_followup: F,
) -> Result<ReviewVerdict>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut state = GateState::Awaiting;
    let mut reopened = false;
    loop {
        state = match state {
            GateState::Awaiting => {
                match channel
                    .await_decision(phase_name, &summary, branch_url)
                    .await?
                {
                    ApprovalDecision::Approve => GateState::Approved,
                    ApprovalDecision::Stop => GateState::Stopped,
                    ApprovalDecision::Followup(text) => {
                        info!(phase = phase_name, "followup requested: {text}");
                        summary = apply_followup(text).await?;
                        reopened = true;
                        GateState::FollowupSent
                    }
                }
            }
            GateState::FollowupSent => GateState::Awaiting,
            GateState::Approved => return Ok(ReviewVerdict::Approved { reopened }),
            GateState::Stopped => return Ok(ReviewVerdict::Stopped),
        };
    }
}

/// Gate answered interactively at the terminal.
pub struct TerminalChannel;

#[async_trait]
impl ReviewChannel for TerminalChannel {
    async fn announce(&self, text: &str) -> Result<()> {
        println!("{text}");
        Ok(())
    }

    async fn await_decision(
        &self,
        phase_name: &str,
        summary: &str,
        branch_url: &str,
    ) -> Result<ApprovalDecision> {
        let header = format!(
            "\n{} {}\n{}\n{} {}",
            style("phase complete:").bold(),
            style(phase_name).cyan().bold(),
            summary,
            style("branch:").dim(),
            style(branch_url).underlined()
        );
        let reply = tokio::task::spawn_blocking(move || {
            println!("{header}");
            Input::<String>::new()
                .with_prompt("approve / stop / or type a followup")
                .allow_empty(false)
                .interact_text()
        })
        .await??;
        // Terminal input is addressed to the gate by construction, so
        // unmatched text is a followup without needing the prefix.
        Ok(match parse_decision(&reply) {
            Some(decision) => decision,
            None => ApprovalDecision::Followup(reply.trim().to_string()),
        })
    }

    async fn select_variant(&self, variants: &[DesignVariant]) -> Result<Option<VariantSelection>> {
        let mut items: Vec<String> = variants
            .iter()
            .map(|v| format!("{} — {} ({})", v.name, v.philosophy, v.image_url))
            .collect();
        items.push("stop the run".to_string());
        let stop_index = items.len() - 1;

        let picked = tokio::task::spawn_blocking(move || {
            Select::new()
                .with_prompt("pick a design direction")
                .items(&items)
                .default(0)
                .interact()
        })
        .await??;
        if picked == stop_index {
            return Ok(None);
        }

        let feedback = tokio::task::spawn_blocking(|| {
            Input::<String>::new()
                .with_prompt("feedback for the chosen direction (empty for none)")
                .allow_empty(true)
                .interact_text()
        })
        .await??;
        Ok(Some(VariantSelection {
            index: picked,
            feedback: feedback.trim().to_string(),
        }))
    }

    async fn prompt_retry(&self, phase_name: &str, error: &str) -> Result<RetryDecision> {
        let header = format!(
            "{} {} failed: {}",
            style("✗").red().bold(),
            style(phase_name).bold(),
            error
        );
        let picked = tokio::task::spawn_blocking(move || {
            println!("{header}");
            Select::new()
                .with_prompt("retry this phase?")
                .items(&["retry", "stop"])
                .default(0)
                .interact()
        })
        .await??;
        Ok(if picked == 0 {
            RetryDecision::Retry
        } else {
            RetryDecision::Stop
        })
    }
}

/// Gate policy for unattended runs: no questions are ever asked. Phases
/// pass straight through, the first design direction is taken, and a failed
/// phase ends the run.
pub struct UnattendedChannel;

#[async_trait]
impl ReviewChannel for UnattendedChannel {
    async fn announce(&self, text: &str) -> Result<()> {
        println!("{text}");
        Ok(())
    }

    async fn await_decision(
        &self,
        phase_name: &str,
        _summary: &str,
        _branch_url: &str,
    ) -> Result<ApprovalDecision> {
        info!(phase = phase_name, "unattended run, no gate");
        Ok(ApprovalDecision::Approve)
    }

    async fn select_variant(&self, variants: &[DesignVariant]) -> Result<Option<VariantSelection>> {
        let Some(first) = variants.first() else {
            return Ok(None);
        };
        info!(variant = %first.name, "unattended run, taking the first direction");
        Ok(Some(VariantSelection {
            index: 0,
            feedback: String::new(),
        }))
    }

    async fn prompt_retry(&self, phase_name: &str, error: &str) -> Result<RetryDecision> {
        info!(phase = phase_name, "unattended run, halting on failure: {error}");
        Ok(RetryDecision::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn text_vocabulary() {
        assert_eq!(parse_decision("approve"), Some(ApprovalDecision::Approve));
        assert_eq!(parse_decision(" A "), Some(ApprovalDecision::Approve));
        assert_eq!(parse_decision("yes"), Some(ApprovalDecision::Approve));
        assert_eq!(parse_decision("stop"), Some(ApprovalDecision::Stop));
        assert_eq!(parse_decision("S"), Some(ApprovalDecision::Stop));
        assert_eq!(parse_decision(""), None);
        assert_eq!(parse_decision("   "), None);
    }

    #[test]
    fn followup_prefix_forms() {
        assert_eq!(
            parse_decision("followup: use a darker palette"),
            Some(ApprovalDecision::Followup("use a darker palette".into()))
        );
        assert_eq!(
            parse_decision("followup fix the header"),
            Some(ApprovalDecision::Followup("fix the header".into()))
        );
        assert_eq!(
            parse_decision("f: add tests"),
            Some(ApprovalDecision::Followup("add tests".into()))
        );
        assert_eq!(
            parse_decision("Followup: tighten spacing"),
            Some(ApprovalDecision::Followup("tighten spacing".into()))
        );
        // Bare keyword has nothing to inject.
        assert_eq!(parse_decision("followup"), None);
        assert_eq!(parse_decision("f:"), None);
    }

    #[test]
    fn unaddressed_chatter_is_ignored() {
        assert_eq!(parse_decision("lunch anyone?"), None);
        assert_eq!(parse_decision("the nav overlaps the logo"), None);
        assert_eq!(parse_decision("fyi deploy window is at 5"), None);
    }

    #[test]
    fn multibyte_correction_survives_prefix_strip() {
        assert_eq!(
            parse_decision("FOLLOWUP: тёмная тема"),
            Some(ApprovalDecision::Followup("тёмная тема".into()))
        );
        assert_eq!(
            parse_decision("f: İstanbul palette"),
            Some(ApprovalDecision::Followup("İstanbul palette".into()))
        );
    }

    #[test]
    fn reaction_vocabulary() {
        assert_eq!(reaction_decision("+1"), Some(ApprovalDecision::Approve));
        assert_eq!(
            reaction_decision("white_check_mark"),
            Some(ApprovalDecision::Approve)
        );
        assert_eq!(reaction_decision("x"), Some(ApprovalDecision::Stop));
        assert_eq!(
            reaction_decision("octagonal_sign"),
            Some(ApprovalDecision::Stop)
        );
        assert_eq!(reaction_decision("eyes"), None);
    }

    struct Scripted {
        replies: Mutex<Vec<ApprovalDecision>>,
    }

    impl Scripted {
        fn new(replies: Vec<ApprovalDecision>) -> Self {
            Self {
                replies: Mutex::new(replies),
            }
        }
    }

    #[async_trait]
    impl ReviewChannel for Scripted {
        async fn announce(&self, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn await_decision(
            &self,
            _phase: &str,
            _summary: &str,
            _url: &str,
        ) -> Result<ApprovalDecision> {
            Ok(self.replies.lock().unwrap().remove(0))
        }

        async fn select_variant(
            &self,
            _variants: &[DesignVariant],
        ) -> Result<Option<VariantSelection>> {
            Ok(None)
        }

        async fn prompt_retry(&self, _phase: &str, _error: &str) -> Result<RetryDecision> {
            Ok(RetryDecision::Stop)
        }
    }

    #[tokio::test]
    async fn immediate_approval_is_not_reopened() {
        let channel = Scripted::new(vec![ApprovalDecision::Approve]);
        let verdict = review_phase(&channel, "Engineer", "url", "done".into(), |_| async {
            panic!("no followup expected")
        })
        .await
        .unwrap();
        assert_eq!(verdict, ReviewVerdict::Approved { reopened: false });
    }

    #[tokio::test]
    async fn followup_rounds_then_approval() {
        let channel = Scripted::new(vec![
            ApprovalDecision::Followup("round one".into()),
            ApprovalDecision::Followup("round two".into()),
            ApprovalDecision::Approve,
        ]);
        let sent = Mutex::new(Vec::new());
        let verdict = review_phase(&channel, "Engineer", "url", "v0".into(), |text| {
            sent.lock().unwrap().push(text.clone());
            async move { Ok(format!("summary after {text}")) }
        })
        .await
        .unwrap();
        assert_eq!(verdict, ReviewVerdict::Approved { reopened: true });
        assert_eq!(
            *sent.lock().unwrap(),
            vec!["round one".to_string(), "round two".to_string()]
        );
    }

    #[tokio::test]
    async fn unattended_channel_never_blocks() {
        let channel = UnattendedChannel;
        assert_eq!(
            channel.await_decision("Engineer", "done", "url").await.unwrap(),
            ApprovalDecision::Approve
        );
        let variants = vec![DesignVariant {
            key: "direction-1".into(),
            name: "Warm Hearth".into(),
            philosophy: "comfort first".into(),
            image_url: "https://img/1.png".into(),
            output: "docs/design/mockups/direction-1.png".into(),
        }];
        let selection = channel.select_variant(&variants).await.unwrap().unwrap();
        assert_eq!(selection.index, 0);
        assert_eq!(
            channel.prompt_retry("Engineer", "boom").await.unwrap(),
            RetryDecision::Stop
        );
    }

    #[tokio::test]
    async fn stop_wins_even_after_followup() {
        let channel = Scripted::new(vec![
            ApprovalDecision::Followup("tweak".into()),
            ApprovalDecision::Stop,
        ]);
        let verdict = review_phase(&channel, "Architect", "url", "v0".into(), |_| async {
            Ok("v1".to_string())
        })
        .await
        .unwrap();
        assert_eq!(verdict, ReviewVerdict::Stopped);
    }
}
