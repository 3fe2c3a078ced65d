use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use foundry_core::build_loop::CandidateOutcome;
use foundry_core::scoring::{SandboxTestRunner, ScoringEngine, TestRunner};
use foundry_core::{FoundryConfig, IterationReport};

mod approvals;
mod services;

use services::Services;

/// Foundry - an autonomous plan, build, score, publish and deploy loop
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", env = "FOUNDRY_CONFIG", default_value = "foundry.toml")]
    config: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the build loop until Ctrl+C, with the review gateway alongside
    Run {
        /// Do not start the HTTP gateway
        #[arg(long)]
        no_gateway: bool,
    },

    /// Run exactly one iteration and print its report
    Once {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Serve the review gateway without running the loop
    Serve,

    /// Score a file with the configured analyzers and test command
    Score {
        file: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Review queued writes to protected files
    Approvals {
        #[command(subcommand)]
        action: ApprovalAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ApprovalAction {
    /// List pending approvals
    List {
        /// Include approved and denied entries
        #[arg(long)]
        all: bool,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Approve a pending write
    Approve { id: String },
    /// Deny a pending write
    Deny { id: String },
    /// Drop every approved and denied entry
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    foundry_core::telemetry::init(cli.verbose);

    match cli.command {
        Commands::Run { no_gateway } => run(&load_config(&cli.config)?, no_gateway).await?,
        Commands::Once { json } => {
            let services = Services::build(&load_config(&cli.config)?)?;
            let report = services.build_loop.run_once().await;
            print_report(&report, json)?;
        }
        Commands::Serve => {
            let config = load_config(&cli.config)?;
            let services = Services::build(&config)?;
            let gateway = services.gateway();
            let addr = config.socket_addr()?;
            println!("Foundry gateway on http://{addr}");
            tokio::select! {
                result = gateway.start(addr) => result?,
                _ = tokio::signal::ctrl_c() => gateway.shutdown(),
            }
        }
        Commands::Score { file, json } => score(&load_config(&cli.config)?, &file, json).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => print!("{}", load_config(&cli.config)?.to_toml()?),
            ConfigAction::Init { force } => init_config(&cli.config, force)?,
        },
        Commands::Approvals { action } => {
            let guard = services::open_guard(&load_config(&cli.config)?)?;
            match action {
                ApprovalAction::List { all, json } => approvals::list(&guard, all, json).await?,
                ApprovalAction::Approve { id } => approvals::approve(&guard, &id).await?,
                ApprovalAction::Deny { id } => approvals::deny(&guard, &id).await?,
                ApprovalAction::Clear => approvals::clear(&guard).await?,
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<FoundryConfig> {
    FoundryConfig::load(Some(path)).with_context(|| format!("failed to load {}", path.display()))
}

async fn run(config: &FoundryConfig, no_gateway: bool) -> anyhow::Result<()> {
    let services = Services::build(config)?;

    let mut server = None;
    if !no_gateway {
        let gateway = Arc::new(services.gateway());
        let addr = config.socket_addr()?;
        println!("Review gateway on http://{addr}");
        let serving = gateway.clone();
        server = Some((gateway, tokio::spawn(async move { serving.start(addr).await })));
    }

    let build_loop = services.build_loop.clone();
    let mut running = tokio::spawn(async move { build_loop.run().await });

    tokio::select! {
        _ = &mut running => {}
        _ = tokio::signal::ctrl_c() => {
            println!("Stopping after in-flight work settles...");
            services.build_loop.stop();
            running.await.context("build loop task failed")?;
        }
    }

    if let Some((gateway, handle)) = server {
        gateway.shutdown();
        handle.await.context("gateway task failed")??;
    }

    let status = services.build_loop.status();
    println!("Stopped after {} iteration(s).", status.iteration);
    Ok(())
}

async fn score(config: &FoundryConfig, file: &Path, json: bool) -> anyhow::Result<()> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let tests = SandboxTestRunner::from_settings(&config.scoring);
    let outcome = tests.run(&code).await;
    let breakdown = ScoringEngine::from_settings(&config.scoring)
        .breakdown(&code, outcome)
        .await;

    if json {
        let value = serde_json::json!({
            "file": file,
            "score": breakdown.total(),
            "breakdown": breakdown,
            "tests": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}  {}/10", file.display().to_string().bold(), breakdown.total());
    println!("  functionality {}/4", breakdown.functionality);
    println!("  quality       {}/2", breakdown.quality);
    println!("  performance   {}/2", breakdown.performance);
    println!("  safety        {}/2", breakdown.safety);
    if outcome.is_none() {
        println!("  (no test command configured)");
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    FoundryConfig::default().to_file(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn print_report(report: &IterationReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "Iteration {}: {}/{} candidate(s) deployed",
        report.iteration,
        report.deployed(),
        report.candidates.len()
    );
    for candidate in &report.candidates {
        let score = candidate
            .score
            .map(|s| format!("{s}/10"))
            .unwrap_or_else(|| "-".to_string());
        let outcome = candidate.outcome.to_string();
        let outcome = match candidate.outcome {
            CandidateOutcome::Deployed => outcome.green(),
            CandidateOutcome::DeploySkipped(_) | CandidateOutcome::PublishFailed => outcome.yellow(),
            CandidateOutcome::Abandoned(_) | CandidateOutcome::Failed(_) => outcome.red(),
        };
        println!("  [{}] {:>5}  {}  {}", candidate.index, score, outcome, candidate.approach);
        if let Some(tag) = &candidate.tag {
            println!("        tag {tag}");
        }
    }
    Ok(())
}
