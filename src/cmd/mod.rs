//! Command-line surface and the wiring of production collaborators.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use tracing::{info, warn};

use conveyor::approval::{ReviewChannel, TerminalChannel, UnattendedChannel};
use conveyor::config::Config;
use conveyor::context::{RunContext, RunMode, ScopeLevel};
use conveyor::external::{
    AgentBackend, CursorClient, DeployTarget, GitHubClient, ImageGenerator, NanoBananaClient,
    Notifier, RepoHost, ScaffoldGenerator, SlackChannel, V0Client, VercelDeployer,
};
use conveyor::phase::{PhaseKind, phases};
use conveyor::pipeline::{Collaborators, Pipeline, RunOutcome};
use conveyor::retry::Transport;
use conveyor::scope::{infer_fix, infer_scope, infer_start_phase, slugify};
use conveyor::ui;

#[derive(Parser)]
#[command(name = "conveyor", version, about = "Multi-phase build pipeline orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the pipeline for a project.
    Run(RunArgs),
    /// Show the current status of one agent job.
    Status {
        job_id: String,
    },
    /// List the phases and the models behind them.
    Models,
    /// Check which integrations the current environment enables.
    Verify,
}

#[derive(Args)]
pub struct RunArgs {
    /// Project (and repository) name.
    pub project: String,
    /// What to build, in plain words.
    pub prompt: String,
    /// Run kind; `auto` infers init/feat/fix.
    #[arg(long, value_enum, default_value_t = RunMode::Auto)]
    pub mode: RunMode,
    /// Resume from this 1-based phase number; needs --ref so the resumed
    /// run does not silently rebuild on the default branch.
    #[arg(long, requires = "source_ref")]
    pub from: Option<usize>,
    /// Ref to build on when resuming.
    #[arg(long = "ref")]
    pub source_ref: Option<String>,
    /// Override the inferred scope tier.
    #[arg(long, value_enum)]
    pub scope: Option<ScopeLevel>,
    /// Gate phases at the terminal. Without this flag (or Slack configured)
    /// the run is unattended: no gates, halt on first failure.
    #[arg(long)]
    pub interactive: bool,
    /// Print the resolved plan and exit without launching anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Exit codes: 0 complete, 1 stopped by a human, 2 halted on a conflict.
pub async fn execute(cli: Cli) -> Result<u8> {
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Status { job_id } => status(&job_id).await.map(|()| 0),
        Command::Models => models().await.map(|()| 0),
        Command::Verify => verify().await.map(|()| 0),
    }
}

async fn run(args: RunArgs) -> Result<u8> {
    let scope = args.scope.unwrap_or_else(|| infer_scope(&args.prompt));

    if args.dry_run {
        print_plan(&args, scope);
        return Ok(0);
    }

    let config = Config::from_env()?;
    config.preflight();

    let transport = Transport::new(config.retry.clone());
    let repo: Arc<dyn RepoHost> = Arc::new(GitHubClient::new(
        transport.clone(),
        &config.repo_owner,
        &config.github_token,
    ));
    let agents: Arc<dyn AgentBackend> =
        Arc::new(CursorClient::new(transport.clone(), &config.cursor_api_key));

    let mode = resolve_mode(args.mode, &args.prompt, &*repo, &args.project).await?;
    let start_phase = args.from.unwrap_or_else(|| match mode {
        RunMode::Feat | RunMode::Fix => infer_start_phase(&args.prompt),
        _ => 1,
    });

    let (repo_url, target_branch) =
        prepare_repo(&*repo, &config, &args, mode, args.source_ref.as_deref()).await?;

    let mut ctx = RunContext::new(
        &args.project,
        &args.prompt,
        &repo_url,
        &config.repo_owner,
        &target_branch,
        mode,
        scope,
    );

    let slack = match (&config.slack_bot_token, args.interactive) {
        (Some(token), false) => Some(Arc::new(SlackChannel::new(
            transport.clone(),
            token,
            config.slack_user_id.clone(),
        ))),
        _ => None,
    };
    let review: Arc<dyn ReviewChannel> = match &slack {
        Some(slack) => {
            let channel = slack.ensure_channel(&args.project).await?;
            let kickoff = format!(
                "🏁 starting {} run for *{}* ({} scope)\n> {}",
                mode, args.project, scope, args.prompt
            );
            let thread = slack.post(&channel, &kickoff).await?;
            slack.set_context(&channel, thread.as_deref());
            ctx.chat_channel = Some(channel);
            ctx.chat_thread = thread;
            slack.clone()
        }
        None if args.interactive => Arc::new(TerminalChannel),
        None => {
            info!("no chat channel and not interactive; running unattended");
            Arc::new(UnattendedChannel)
        }
    };

    let images: Option<Arc<dyn ImageGenerator>> = config
        .nanobanana_api_key
        .as_deref()
        .map(|key| Arc::new(NanoBananaClient::new(transport.clone(), key)) as _);
    let scaffold: Option<Arc<dyn ScaffoldGenerator>> = config
        .v0_api_key
        .as_deref()
        .map(|key| Arc::new(V0Client::new(transport.clone(), key)) as _);
    let deploy: Option<Arc<dyn DeployTarget>> = config
        .vercel_token
        .as_deref()
        .map(|token| Arc::new(VercelDeployer::new(transport.clone(), token, None)) as _);

    let pipeline = Pipeline::new(
        Collaborators {
            agents,
            repo,
            review,
            images,
            scaffold,
            deploy,
        },
        phases().to_vec(),
        config.agent_poll.clone(),
    )
    .with_progress(slack.is_none());

    info!(project = %args.project, %mode, %scope, start_phase, "run starting");
    let report = pipeline.run(&mut ctx, start_phase).await?;
    ui::print_summary(&report.records);

    match report.outcome {
        RunOutcome::Completed {
            deploy_url,
            change_request,
        } => {
            if let Some(url) = deploy_url {
                println!("{} {url}", style("deployed:").green().bold());
            }
            if let Some(url) = change_request {
                println!("{} {url}", style("change request:").cyan().bold());
            }
            Ok(0)
        }
        RunOutcome::Stopped { at_phase } => {
            println!("{} at phase {at_phase}", style("stopped").yellow().bold());
            Ok(1)
        }
        RunOutcome::Conflicted { message } => {
            println!("{} {message}", style("halted:").red().bold());
            Ok(2)
        }
    }
}

/// `auto` becomes `init` for a repo with no default branch yet, otherwise
/// feat or fix based on the prompt.
async fn resolve_mode(
    mode: RunMode,
    prompt: &str,
    repo: &dyn RepoHost,
    project: &str,
) -> Result<RunMode> {
    if mode != RunMode::Auto {
        return Ok(mode);
    }
    let exists = repo.branch_exists(project, "main").await.unwrap_or(false);
    Ok(if !exists {
        RunMode::Init
    } else if infer_fix(prompt) {
        RunMode::Fix
    } else {
        RunMode::Feat
    })
}

/// Make sure the repo and the target branch for this run exist.
async fn prepare_repo(
    repo: &dyn RepoHost,
    config: &Config,
    args: &RunArgs,
    mode: RunMode,
    source_ref: Option<&str>,
) -> Result<(String, String)> {
    let repo_url = match mode {
        RunMode::Init => {
            let url = repo.ensure_repo(&args.project, true).await?;
            // A freshly created repo's initial commit takes a moment to land.
            for _ in 0..10 {
                if repo.branch_exists(&args.project, "main").await? {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
            url
        }
        _ => format!(
            "https://github.com/{}/{}.git",
            config.repo_owner, args.project
        ),
    };

    let target_branch = match (source_ref, mode) {
        (Some(reference), _) => reference.to_string(),
        (None, RunMode::Feat | RunMode::Fix) => {
            let branch = format!("{mode}/{}", slugify(&args.prompt));
            if !repo.branch_exists(&args.project, &branch).await? {
                repo.create_branch(&args.project, &branch, "main").await?;
            }
            branch
        }
        (None, _) => "main".to_string(),
    };
    Ok((repo_url, target_branch))
}

fn print_plan(args: &RunArgs, scope: ScopeLevel) {
    println!(
        "{} {} ({} scope, {} mode)",
        style("plan for").bold(),
        style(&args.project).cyan().bold(),
        scope,
        args.mode
    );
    let start = args.from.unwrap_or(1);
    for (index, phase) in phases().iter().enumerate() {
        let number = index + 1;
        let note = if number < start {
            style("skipped (resume)").dim()
        } else if phase.skipped_for_scope(scope) {
            style("skipped (scope)").dim()
        } else {
            style("will run").green()
        };
        println!(
            "  {number}. {} {} ({})  {note}",
            phase.emoji, phase.name, phase.model
        );
    }
}

async fn status(job_id: &str) -> Result<()> {
    let config = Config::from_env()?;
    let client = CursorClient::new(Transport::new(config.retry.clone()), &config.cursor_api_key);
    let run = client
        .status(job_id)
        .await
        .with_context(|| format!("fetching status of job {job_id}"))?;
    println!("{} {}", style("status:").bold(), run.status);
    if let Some(branch) = run.branch {
        println!("{} {branch}", style("branch:").bold());
    }
    if let Some(summary) = run.summary {
        println!("{} {summary}", style("summary:").bold());
    }
    Ok(())
}

async fn models() -> Result<()> {
    for (index, phase) in phases().iter().enumerate() {
        let kind = match phase.kind {
            PhaseKind::Standard => "standard",
            PhaseKind::DesignExploration => "design exploration",
            PhaseKind::DesignTranslation => "design translation",
            PhaseKind::Review => "review (skipped at nano scope)",
        };
        println!(
            "{}. {} {} — {} [{kind}]",
            index + 1,
            phase.emoji,
            style(phase.name).bold(),
            phase.model
        );
    }

    // With credentials present, also show what the agent API offers.
    if let Ok(config) = Config::from_env() {
        let client =
            CursorClient::new(Transport::new(config.retry.clone()), &config.cursor_api_key);
        match client.list_models().await {
            Ok(available) => {
                println!("\n{}", style("agent API models:").bold());
                for model in available {
                    println!("  {model}");
                }
            }
            Err(error) => warn!("could not list agent models: {error:#}"),
        }
    }
    Ok(())
}

async fn verify() -> Result<()> {
    let config = Config::from_env()?;
    println!("{}", style("required credentials present").green().bold());
    let client = CursorClient::new(Transport::new(config.retry.clone()), &config.cursor_api_key);
    client
        .verify_access()
        .await
        .context("agent API rejected the configured key")?;
    println!("{}", style("agent API reachable").green());
    let disabled = config.preflight();
    if disabled.is_empty() {
        println!("all optional integrations enabled");
    } else {
        for feature in disabled {
            println!("{} {feature}", style("off:").yellow());
        }
    }
    Ok(())
}
