//! The phase state machine driving a whole run.
//!
//! Phases execute strictly in order. Each one launches a background agent,
//! awaits it, passes a human gate, then merges its branch into the target
//! branch so the next phase branches from the accumulated work. Merge
//! conflicts halt the run with resume instructions; any other phase failure
//! is offered for an in-place retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{info, warn};

use crate::approval::{ReviewChannel, ReviewVerdict, RetryDecision, review_phase};
use crate::assets::{
    DesignVariant, approved_direction_markdown, parse_design_exploration, parse_visual_prompts,
};
use crate::context::{DesignContext, RunContext};
use crate::errors::PipelineError;
use crate::external::{
    AgentBackend, DeployTarget, ImageGenerator, MergeOutcome, RepoFile, RepoHost,
    ScaffoldGenerator, await_agent,
};
use crate::fanout::settle_all;
use crate::phase::{Phase, PhaseKind};
use crate::poller::PollSettings;

const EXPLORATION_PATH: &str = "docs/design/design-exploration.md";
const VISUAL_PROMPTS_PATH: &str = "docs/design/visual-prompts.md";
const APPROVED_DIRECTION_PATH: &str = "docs/design/approved-direction.md";
const SCAFFOLD_DIR: &str = "design-system/scaffold";

/// Every seam the pipeline talks through. Optional collaborators degrade the
/// matching feature instead of failing the run.
pub struct Collaborators {
    pub agents: Arc<dyn AgentBackend>,
    pub repo: Arc<dyn RepoHost>,
    pub review: Arc<dyn ReviewChannel>,
    pub images: Option<Arc<dyn ImageGenerator>>,
    pub scaffold: Option<Arc<dyn ScaffoldGenerator>>,
    pub deploy: Option<Arc<dyn DeployTarget>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    Pending,
    Succeeded,
    Skipped,
    Failed,
    Stopped,
}

/// What happened to one phase, for reporting.
#[derive(Debug, Clone)]
pub struct PhaseRecord {
    pub phase: String,
    pub status: PhaseStatus,
    pub detail: String,
    pub duration: Option<Duration>,
    pub job_id: Option<String>,
}

impl PhaseRecord {
    fn new(phase: &str, status: PhaseStatus, detail: &str) -> Self {
        Self {
            phase: phase.to_string(),
            status,
            detail: detail.to_string(),
            duration: None,
            job_id: None,
        }
    }

    pub fn pending(phase: &str) -> Self {
        Self::new(phase, PhaseStatus::Pending, "")
    }

    pub fn skipped(phase: &str, detail: &str) -> Self {
        Self::new(phase, PhaseStatus::Skipped, detail)
    }

    pub fn succeeded(phase: &str, detail: &str, duration: Option<Duration>) -> Self {
        let mut record = Self::new(phase, PhaseStatus::Succeeded, detail);
        record.duration = duration;
        record
    }

    pub fn failed(phase: &str, detail: &str) -> Self {
        Self::new(phase, PhaseStatus::Failed, detail)
    }

    pub fn stopped(phase: &str, detail: &str) -> Self {
        Self::new(phase, PhaseStatus::Stopped, detail)
    }
}

/// How the run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed {
        deploy_url: Option<String>,
        change_request: Option<String>,
    },
    /// A human said stop at a gate or a retry prompt.
    Stopped { at_phase: usize },
    /// A merge conflict halted the run; the message carries the exact
    /// resume flags.
    Conflicted { message: String },
}

#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub records: Vec<PhaseRecord>,
}

enum PhaseOutcome {
    Approved {
        job_id: String,
        detail: String,
    },
    Stopped {
        reason: String,
    },
}

pub struct Pipeline {
    collab: Collaborators,
    phases: Vec<Phase>,
    agent_poll: PollSettings,
    /// Branch change requests are opened against after a feat/fix run.
    default_branch: String,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(collab: Collaborators, phases: Vec<Phase>, agent_poll: PollSettings) -> Self {
        Self {
            collab,
            phases,
            agent_poll,
            default_branch: "main".to_string(),
            show_progress: false,
        }
    }

    pub fn with_default_branch(mut self, branch: &str) -> Self {
        self.default_branch = branch.to_string();
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Drive all phases from `start_phase` (1-based) to the end, then run
    /// finalization. Gates, retries, and conflicts are all resolved inside;
    /// `Err` is reserved for failures of the machinery itself.
    pub async fn run(
        &self,
        ctx: &mut RunContext,
        start_phase: usize,
    ) -> Result<RunReport, PipelineError> {
        let mut records = Vec::with_capacity(self.phases.len());
        let total = self.phases.len();

        for (index, phase) in self.phases.iter().enumerate() {
            let number = index + 1;

            if number < start_phase {
                records.push(PhaseRecord::skipped(phase.name, "resumed past"));
                continue;
            }
            if phase.skipped_for_scope(ctx.scope) {
                info!(phase = phase.name, scope = %ctx.scope, "phase skipped for scope");
                records.push(PhaseRecord::skipped(phase.name, "not run at this scope"));
                continue;
            }

            self.announce(&format!(
                "{} phase {number}/{total}: {} ({})",
                phase.emoji, phase.name, phase.model
            ))
            .await;

            loop {
                let started = Instant::now();
                match self.execute_phase(ctx, number, phase).await {
                    Ok(PhaseOutcome::Approved { job_id, detail }) => {
                        let elapsed = started.elapsed();
                        let mut record =
                            PhaseRecord::succeeded(phase.name, &detail, Some(elapsed));
                        record.job_id = Some(job_id);
                        records.push(record);
                        let mut strip_records = records.clone();
                        for remaining in self.phases.iter().skip(number) {
                            strip_records.push(PhaseRecord::pending(remaining.name));
                        }
                        self.announce(&format!(
                            "{} {} done in {} — {}",
                            phase.emoji,
                            phase.name,
                            crate::ui::format_duration(elapsed),
                            crate::ui::progress_strip(&strip_records)
                        ))
                        .await;
                        break;
                    }
                    Ok(PhaseOutcome::Stopped { reason }) => {
                        records.push(PhaseRecord::stopped(phase.name, &reason));
                        self.fill_pending(&mut records, number);
                        self.announce(&format!("🛑 run stopped at {}", phase.name)).await;
                        return Ok(RunReport {
                            outcome: RunOutcome::Stopped { at_phase: number },
                            records,
                        });
                    }
                    Err(error) if error.is_recoverable_conflict() => {
                        let message = error.to_string();
                        records.push(PhaseRecord::failed(phase.name, &message));
                        self.fill_pending(&mut records, number);
                        self.announce(&format!("⚠️ {message}")).await;
                        return Ok(RunReport {
                            outcome: RunOutcome::Conflicted { message },
                            records,
                        });
                    }
                    Err(error) => {
                        let message = error.to_string();
                        warn!(phase = phase.name, "phase failed: {message}");
                        match self
                            .collab
                            .review
                            .prompt_retry(phase.name, &message)
                            .await?
                        {
                            RetryDecision::Retry => {
                                info!(phase = phase.name, "retrying in place");
                                continue;
                            }
                            RetryDecision::Stop => {
                                records.push(PhaseRecord::failed(phase.name, &message));
                                self.fill_pending(&mut records, number);
                                return Ok(RunReport {
                                    outcome: RunOutcome::Stopped { at_phase: number },
                                    records,
                                });
                            }
                        }
                    }
                }
            }
        }

        let outcome = self.finalize(ctx, &records).await?;
        Ok(RunReport { outcome, records })
    }

    fn fill_pending(&self, records: &mut Vec<PhaseRecord>, after: usize) {
        for phase in self.phases.iter().skip(after) {
            records.push(PhaseRecord::pending(phase.name));
        }
    }

    async fn announce(&self, text: &str) {
        if let Err(error) = self.collab.review.announce(text).await {
            warn!("announcement failed: {error:#}");
        }
    }

    /// Launch, await, gate, post-process, and merge one phase.
    async fn execute_phase(
        &self,
        ctx: &mut RunContext,
        number: usize,
        phase: &Phase,
    ) -> Result<PhaseOutcome, PipelineError> {
        let prompt = phase.prompt(ctx);
        let job_id = self
            .collab
            .agents
            .submit(&ctx.repo_url, &ctx.current_ref, &prompt)
            .await?;
        info!(phase = phase.name, %job_id, source = %ctx.current_ref, "agent launched");

        let spinner = self
            .show_progress
            .then(|| crate::ui::poll_spinner(phase.name));
        let run = await_agent(
            &*self.collab.agents,
            &job_id,
            &self.agent_poll,
            spinner.as_ref(),
        )
        .await?;
        if let Some(bar) = spinner {
            bar.finish_and_clear();
        }

        let branch = run.branch.clone().ok_or(PipelineError::MissingBranch {
            job_id: job_id.clone(),
        })?;
        let summary = run
            .summary
            .clone()
            .unwrap_or_else(|| format!("{} finished on {branch}", phase.name));

        // Post-process the phase output first so the gate reviews the final
        // state of the branch, assets and all.
        let note = match phase.kind {
            PhaseKind::DesignExploration => match self.explore_designs(ctx, &branch).await? {
                Some(note) => Some(note),
                None => {
                    return Ok(PhaseOutcome::Stopped {
                        reason: "stopped at design selection".to_string(),
                    });
                }
            },
            PhaseKind::DesignTranslation => Some(self.generate_assets(ctx, &branch).await?),
            PhaseKind::Standard | PhaseKind::Review => None,
        };

        let gate_summary = match &note {
            Some(note) => format!("{summary}\n{note}"),
            None => summary,
        };
        let agents = &*self.collab.agents;
        let poll = &self.agent_poll;
        let verdict = review_phase(
            &*self.collab.review,
            phase.name,
            &ctx.branch_url(&branch),
            gate_summary,
            |text| {
                let job_id = job_id.clone();
                async move {
                    agents.inject_followup(&job_id, &text).await?;
                    let run = await_agent(agents, &job_id, poll, None).await?;
                    Ok(run
                        .summary
                        .unwrap_or_else(|| "followup applied".to_string()))
                }
            },
        )
        .await?;
        let mut detail = match verdict {
            ReviewVerdict::Stopped => {
                return Ok(PhaseOutcome::Stopped {
                    reason: "stopped at approval gate".to_string(),
                });
            }
            ReviewVerdict::Approved { reopened: true } => "approved after followup".to_string(),
            ReviewVerdict::Approved { reopened: false } => "approved".to_string(),
        };
        if let Some(note) = note {
            detail = format!("{detail}; {note}");
        }

        match self
            .collab
            .repo
            .merge(&ctx.project, &ctx.target_branch, &branch)
            .await?
        {
            MergeOutcome::Merged | MergeOutcome::UpToDate => {
                ctx.current_ref = ctx.target_branch.clone();
            }
            MergeOutcome::Conflict => {
                return Err(PipelineError::MergeConflict {
                    head: branch,
                    base: ctx.target_branch.clone(),
                    next_phase: number + 1,
                });
            }
        }

        Ok(PhaseOutcome::Approved { job_id, detail })
    }

    /// Generate mockups, gate on the human's pick, and record the approved
    /// direction on the phase branch. `None` means the human stopped the run.
    async fn explore_designs(
        &self,
        ctx: &mut RunContext,
        branch: &str,
    ) -> Result<Option<String>, PipelineError> {
        let Some(markdown) = self
            .collab
            .repo
            .read_file(&ctx.project, branch, EXPLORATION_PATH)
            .await?
        else {
            warn!("agent wrote no {EXPLORATION_PATH}; continuing without mockups");
            return Ok(Some("no exploration file produced".to_string()));
        };
        let directions = match parse_design_exploration(&markdown) {
            Ok(directions) => directions,
            Err(error) => {
                warn!("unparsable exploration file: {error:#}");
                return Ok(Some("exploration file unparsable".to_string()));
            }
        };
        let Some(images) = self.collab.images.clone() else {
            warn!("no image generator configured; skipping mockups");
            return Ok(Some("mockup generation disabled".to_string()));
        };

        let launched = directions.len();
        let jobs: Vec<(String, _)> = directions
            .into_iter()
            .map(|direction| {
                let images = images.clone();
                let label = direction.key.clone();
                (label, async move {
                    let url = images.generate(&direction.prompt, &direction.size).await?;
                    Ok(DesignVariant {
                        key: direction.key,
                        name: direction.name,
                        philosophy: direction.philosophy,
                        image_url: url,
                        output: direction.output,
                    })
                })
            })
            .collect();
        let group = settle_all(jobs).await;
        if group.is_empty() {
            warn!("all {launched} mockup generations failed; continuing without designs");
            return Ok(Some("mockup generation failed".to_string()));
        }

        let Some(selection) = self.collab.review.select_variant(&group.succeeded).await? else {
            return Ok(None);
        };
        let variant = &group.succeeded[selection.index];
        info!(variant = %variant.name, "design direction selected");

        let mut files = vec![RepoFile {
            path: APPROVED_DIRECTION_PATH.to_string(),
            content_base64: BASE64
                .encode(approved_direction_markdown(variant, &selection.feedback)),
        }];

        let scaffold_path = match &self.collab.scaffold {
            Some(scaffold) => match scaffold
                .scaffold(&variant.image_url, &selection.feedback)
                .await
            {
                Ok(generated) if !generated.is_empty() => {
                    for (name, content) in generated {
                        files.push(RepoFile {
                            path: format!("{SCAFFOLD_DIR}/{name}"),
                            content_base64: BASE64.encode(content),
                        });
                    }
                    Some(SCAFFOLD_DIR.to_string())
                }
                Ok(_) => None,
                Err(error) => {
                    warn!("scaffold generation failed, continuing without: {error:#}");
                    None
                }
            },
            None => None,
        };

        self.collab
            .repo
            .commit_files(
                &ctx.project,
                branch,
                "docs: record approved design direction",
                &files,
            )
            .await?;

        ctx.design = Some(DesignContext {
            approved_mockup_url: variant.image_url.clone(),
            variant_name: variant.name.clone(),
            feedback: selection.feedback.clone(),
            scaffold_path,
        });
        Ok(Some(format!("selected \"{}\"", variant.name)))
    }

    /// Generate the brand assets described on the phase branch and commit
    /// them as one batch. Absent prompts file or disabled generator degrade
    /// to a note in the detail string.
    async fn generate_assets(
        &self,
        ctx: &RunContext,
        branch: &str,
    ) -> Result<String, PipelineError> {
        let Some(markdown) = self
            .collab
            .repo
            .read_file(&ctx.project, branch, VISUAL_PROMPTS_PATH)
            .await?
        else {
            return Ok("no asset prompts".to_string());
        };
        let prompts = match parse_visual_prompts(&markdown) {
            Ok(prompts) => prompts,
            Err(error) => {
                warn!("unparsable visual prompts file: {error:#}");
                return Ok("asset prompts unparsable".to_string());
            }
        };
        let Some(images) = self.collab.images.clone() else {
            return Ok("asset generation disabled".to_string());
        };

        let launched = prompts.len();
        let jobs: Vec<(String, _)> = prompts
            .into_iter()
            .map(|asset| {
                let images = images.clone();
                let label = asset.name.clone();
                (label, async move {
                    let url = images.generate(&asset.prompt, &asset.size).await?;
                    let bytes = images.download(&url).await?;
                    Ok(RepoFile {
                        path: asset.output,
                        content_base64: BASE64.encode(bytes),
                    })
                })
            })
            .collect();
        let group = settle_all(jobs).await;
        if group.is_empty() {
            warn!("all {launched} asset generations failed");
            return Ok(format!("0/{launched} assets generated"));
        }

        let generated = group.succeeded.len();
        self.collab
            .repo
            .commit_files(
                &ctx.project,
                branch,
                "chore: add generated visual assets",
                &group.succeeded,
            )
            .await?;
        Ok(format!("{generated}/{launched} assets generated"))
    }

    /// Deploy the target branch and open a change request for branching runs.
    async fn finalize(
        &self,
        ctx: &RunContext,
        records: &[PhaseRecord],
    ) -> Result<RunOutcome, PipelineError> {
        let deploy_url = match &self.collab.deploy {
            Some(deploy) => match deploy.deploy(&ctx.project, &ctx.target_branch).await {
                Ok(url) => {
                    self.announce(&format!("🚀 deployed: {url}")).await;
                    Some(url)
                }
                Err(error) => {
                    warn!("deployment failed: {error:#}");
                    self.announce(&format!("⚠️ deployment failed: {error:#}")).await;
                    None
                }
            },
            None => {
                info!("no deploy target configured, skipping deployment");
                None
            }
        };

        let change_request = if ctx.mode.is_branching() && ctx.target_branch != self.default_branch
        {
            let title = change_request_title(ctx);
            let body = change_request_body(ctx, records);
            let url = self
                .collab
                .repo
                .open_change_request(
                    &ctx.project,
                    &self.default_branch,
                    &ctx.target_branch,
                    &title,
                    &body,
                )
                .await?;
            self.announce(&format!("🔀 change request: {url}")).await;
            Some(url)
        } else {
            None
        };

        self.announce("✅ run complete").await;
        Ok(RunOutcome::Completed {
            deploy_url,
            change_request,
        })
    }
}

pub fn change_request_title(ctx: &RunContext) -> String {
    let mut prompt = ctx.user_prompt.trim().to_string();
    if prompt.len() > 60 {
        prompt.truncate(57);
        prompt.push_str("...");
    }
    format!("{}: {prompt}", ctx.mode)
}

pub fn change_request_body(ctx: &RunContext, records: &[PhaseRecord]) -> String {
    let mut body = format!(
        "## Request\n{}\n\n## Phases\n| phase | status | detail |\n|---|---|---|\n",
        ctx.user_prompt
    );
    for record in records {
        let status = match record.status {
            PhaseStatus::Succeeded => "succeeded",
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Stopped => "stopped",
            PhaseStatus::Pending => "pending",
        };
        body.push_str(&format!(
            "| {} | {status} | {} |\n",
            record.phase,
            record.detail.replace('|', "\\|")
        ));
    }
    body.push_str(&format!("\nscope: {} | mode: {}\n", ctx.scope, ctx.mode));
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunMode, ScopeLevel};

    fn ctx() -> RunContext {
        RunContext::new(
            "demo",
            "add a dark mode toggle to the settings page",
            "https://github.com/acme/demo.git",
            "acme",
            "feat/dark-mode",
            RunMode::Feat,
            ScopeLevel::Micro,
        )
    }

    #[test]
    fn change_request_title_truncates_long_prompts() {
        let mut c = ctx();
        c.user_prompt = "x".repeat(100);
        let title = change_request_title(&c);
        assert!(title.starts_with("feat: "));
        assert!(title.ends_with("..."));
        assert_eq!(title.len(), "feat: ".len() + 60);
    }

    #[test]
    fn change_request_body_tabulates_phases() {
        let records = vec![
            PhaseRecord::succeeded("Engineer", "approved", Some(Duration::from_secs(90))),
            PhaseRecord::skipped("QA Reviewer", "not run at this scope"),
        ];
        let body = change_request_body(&ctx(), &records);
        assert!(body.contains("| Engineer | succeeded | approved |"));
        assert!(body.contains("| QA Reviewer | skipped |"));
        assert!(body.contains("scope: micro | mode: feat"));
    }

    #[test]
    fn pipe_characters_in_detail_are_escaped() {
        let records = vec![PhaseRecord::failed("Architect", "a | b")];
        let body = change_request_body(&ctx(), &records);
        assert!(body.contains("a \\| b"));
    }
}
