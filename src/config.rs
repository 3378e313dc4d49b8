//! Configuration assembled once at startup and passed explicitly.
//!
//! Nothing below `main` reads the environment. `from_vars` takes a lookup
//! closure so tests can feed a fixed map; `from_env` is the thin production
//! wrapper over it.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use crate::poller::PollSettings;
use crate::retry::RetryPolicy;

/// Everything the pipeline needs from the outside world.
#[derive(Debug, Clone)]
pub struct Config {
    pub cursor_api_key: String,
    pub github_token: String,
    pub repo_owner: String,
    pub slack_bot_token: Option<String>,
    pub slack_user_id: Option<String>,
    pub nanobanana_api_key: Option<String>,
    pub v0_api_key: Option<String>,
    pub vercel_token: Option<String>,
    pub retry: RetryPolicy,
    pub agent_poll: PollSettings,
    pub verbose: bool,
}

impl Config {
    /// Build from any string-keyed lookup. Required keys error; optional
    /// integrations become `None` and are reported by `preflight`.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).with_context(|| format!("required environment variable {key} is not set"))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let agent_poll_secs = optional("CONVEYOR_AGENT_POLL_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(15);

        Ok(Self {
            cursor_api_key: required("CURSOR_API_KEY")?,
            github_token: required("GITHUB_TOKEN")?,
            repo_owner: required("GITHUB_OWNER")?,
            slack_bot_token: optional("SLACK_BOT_TOKEN"),
            slack_user_id: optional("SLACK_USER_ID"),
            nanobanana_api_key: optional("NANOBANANA_API_KEY"),
            v0_api_key: optional("V0_API_KEY"),
            vercel_token: optional("VERCEL_TOKEN"),
            retry: RetryPolicy::default(),
            agent_poll: PollSettings::new(Duration::from_secs(agent_poll_secs), 480),
            verbose: optional("CONVEYOR_VERBOSE").is_some(),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Log which optional integrations are off and what that disables.
    /// Returns the disabled feature names for the `verify` report.
    pub fn preflight(&self) -> Vec<&'static str> {
        let mut disabled = Vec::new();
        if self.slack_bot_token.is_none() {
            disabled.push("slack approvals (terminal prompts instead)");
        }
        if self.nanobanana_api_key.is_none() {
            disabled.push("mockup and asset image generation");
        }
        if self.v0_api_key.is_none() {
            disabled.push("v0 scaffold generation");
        }
        if self.vercel_token.is_none() {
            disabled.push("deployment");
        }
        for feature in &disabled {
            warn!("disabled: {feature}");
        }
        disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("CURSOR_API_KEY", "key_c"),
            ("GITHUB_TOKEN", "ghp_t"),
            ("GITHUB_OWNER", "acme"),
        ])
    }

    fn build(vars: &HashMap<&str, &str>) -> Result<Config> {
        Config::from_vars(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn minimal_config_builds_with_optionals_off() {
        let config = build(&base_vars()).unwrap();
        assert_eq!(config.repo_owner, "acme");
        assert!(config.slack_bot_token.is_none());
        assert!(config.vercel_token.is_none());
        assert_eq!(config.agent_poll.interval, Duration::from_secs(15));
        assert_eq!(config.agent_poll.max_polls, 480);
    }

    #[test]
    fn missing_required_key_names_the_key() {
        let mut vars = base_vars();
        vars.remove("GITHUB_TOKEN");
        let error = build(&vars).unwrap_err();
        assert!(format!("{error:#}").contains("GITHUB_TOKEN"));
    }

    #[test]
    fn blank_optional_is_treated_as_unset() {
        let mut vars = base_vars();
        vars.insert("VERCEL_TOKEN", "  ");
        let config = build(&vars).unwrap();
        assert!(config.vercel_token.is_none());
    }

    #[test]
    fn preflight_lists_disabled_integrations() {
        let mut vars = base_vars();
        vars.insert("VERCEL_TOKEN", "vt");
        let config = build(&vars).unwrap();
        let disabled = config.preflight();
        assert_eq!(disabled.len(), 3);
        assert!(!disabled.iter().any(|d| d.contains("deployment")));
    }

    #[test]
    fn poll_interval_override() {
        let mut vars = base_vars();
        vars.insert("CONVEYOR_AGENT_POLL_SECS", "5");
        let config = build(&vars).unwrap();
        assert_eq!(config.agent_poll.interval, Duration::from_secs(5));
    }
}
