//! The run context threaded through every phase.
//!
//! `RunContext` is created once per invocation, exclusively owned and
//! mutated by the orchestrator loop. Its `current_ref` always names the
//! output of the last successfully completed phase.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// What kind of run this is. `Auto` resolves to `Init` for a fresh repo,
/// otherwise to `Feat` or `Fix` based on the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Init,
    Feat,
    Fix,
    Auto,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Init => "init",
            RunMode::Feat => "feat",
            RunMode::Fix => "fix",
            RunMode::Auto => "auto",
        }
    }

    /// Modes that work on a branch and end in a change request.
    pub fn is_branching(&self) -> bool {
        matches!(self, RunMode::Feat | RunMode::Fix)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse sizing tier controlling how much optional work each phase does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    Nano,
    Micro,
    Standard,
    Large,
}

impl ScopeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeLevel::Nano => "nano",
            ScopeLevel::Micro => "micro",
            ScopeLevel::Standard => "standard",
            ScopeLevel::Large => "large",
        }
    }

    /// Number of design directions the explorer phase requests.
    pub fn variant_count(&self) -> usize {
        match self {
            ScopeLevel::Nano | ScopeLevel::Micro => 2,
            ScopeLevel::Standard => 3,
            ScopeLevel::Large => 4,
        }
    }
}

impl std::fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Design decisions accumulated after the exploration phase, consumed by the
/// translation phase prompt.
#[derive(Debug, Clone, Default)]
pub struct DesignContext {
    pub approved_mockup_url: String,
    pub variant_name: String,
    pub feedback: String,
    pub scaffold_path: Option<String>,
}

/// Mutable single-owner record carried through the whole run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub project: String,
    pub user_prompt: String,
    pub repo_url: String,
    pub owner: String,
    /// Branch that completed phases are merged into.
    pub target_branch: String,
    /// Ref the next phase reads from; updated only on phase success.
    pub current_ref: String,
    pub mode: RunMode,
    pub scope: ScopeLevel,
    pub chat_channel: Option<String>,
    pub chat_thread: Option<String>,
    /// Populated only after the design exploration phase runs.
    pub design: Option<DesignContext>,
}

impl RunContext {
    pub fn new(
        project: &str,
        user_prompt: &str,
        repo_url: &str,
        owner: &str,
        target_branch: &str,
        mode: RunMode,
        scope: ScopeLevel,
    ) -> Self {
        Self {
            project: project.to_string(),
            user_prompt: user_prompt.to_string(),
            repo_url: repo_url.to_string(),
            owner: owner.to_string(),
            target_branch: target_branch.to_string(),
            current_ref: target_branch.to_string(),
            mode,
            scope,
            chat_channel: None,
            chat_thread: None,
            design: None,
        }
    }

    /// Web URL for a branch of this project's repo.
    pub fn branch_url(&self, branch: &str) -> String {
        format!(
            "https://github.com/{}/{}/tree/{}",
            self.owner, self.project, branch
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_starts_on_target_branch() {
        let ctx = RunContext::new(
            "demo",
            "build a thing",
            "https://github.com/acme/demo.git",
            "acme",
            "main",
            RunMode::Init,
            ScopeLevel::Standard,
        );
        assert_eq!(ctx.current_ref, "main");
        assert!(ctx.design.is_none());
    }

    #[test]
    fn branching_modes() {
        assert!(RunMode::Feat.is_branching());
        assert!(RunMode::Fix.is_branching());
        assert!(!RunMode::Init.is_branching());
        assert!(!RunMode::Auto.is_branching());
    }

    #[test]
    fn variant_counts_track_scope() {
        assert_eq!(ScopeLevel::Nano.variant_count(), 2);
        assert_eq!(ScopeLevel::Micro.variant_count(), 2);
        assert_eq!(ScopeLevel::Standard.variant_count(), 3);
        assert_eq!(ScopeLevel::Large.variant_count(), 4);
    }

    #[test]
    fn branch_url_format() {
        let ctx = RunContext::new(
            "demo",
            "p",
            "url",
            "acme",
            "main",
            RunMode::Feat,
            ScopeLevel::Micro,
        );
        assert_eq!(
            ctx.branch_url("feat/x"),
            "https://github.com/acme/demo/tree/feat/x"
        );
    }
}
