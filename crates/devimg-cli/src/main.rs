mod commands;

use clap::{Parser, Subcommand};
use devimg_core::{Mode, Platform};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "devimg", about = "Build, validate and promote dev container images")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

/// Overrides accepted by every subcommand. Flags beat `DEVIMG_*` variables,
/// which beat devimg.toml.
#[derive(clap::Args, Debug, Clone)]
pub(crate) struct GlobalArgs {
    /// Execution mode [default: detected from ACT / GITHUB_ACTIONS / CI]
    #[arg(long, global = true)]
    mode: Option<Mode>,
    /// Target platform, repeatable (e.g. linux/arm64)
    #[arg(long = "platform", global = true)]
    platforms: Vec<Platform>,
    /// Registry host
    #[arg(long, global = true)]
    registry: Option<String>,
    /// Repository path within the registry
    #[arg(long, global = true)]
    repository: Option<String>,
    /// Commit or session id used in the staging tag
    #[arg(long, global = true)]
    commit: Option<String>,
    /// Config file; its directory is the project directory
    #[arg(long, global = true, default_value = devimg_core::CONFIG_FILE)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the resolved build configuration
    Env {
        /// Print as JSON
        #[arg(long)]
        json: bool,
        /// Discard the cached resolution first
        #[arg(long)]
        refresh: bool,
    },
    /// Build the staging image
    Build {
        /// Only this variant
        #[arg(long)]
        variant: Option<String>,
    },
    /// Run the check suite against the staging image
    Test {
        /// Only this variant
        #[arg(long)]
        variant: Option<String>,
        /// Validate this image instead of the staging reference
        #[arg(long)]
        image: Option<String>,
        /// Fail when the nested-daemon check fails
        #[arg(long)]
        strict: bool,
    },
    /// Publish the staging image under its final tags
    Promote {
        /// Only this variant
        #[arg(long)]
        variant: Option<String>,
        /// Destination tag, repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Add the tags derived from the CI event
        #[arg(long)]
        from_event: bool,
    },
    /// Print the tags derived from the CI event
    Tags,
    /// Build, test and promote in one go
    Run {
        /// Only this variant
        #[arg(long)]
        variant: Option<String>,
        /// Destination tag, repeatable
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Add the tags derived from the CI event
        #[arg(long)]
        from_event: bool,
        /// Fail when the nested-daemon check fails
        #[arg(long)]
        strict: bool,
    },
    /// Run the CI workflow locally with act
    Local {
        /// Only this job
        #[arg(long)]
        job: Option<String>,
        /// Workflow file or directory [default: .github/workflows]
        #[arg(long)]
        workflow: Option<PathBuf>,
    },
    /// Check that docker, buildx, devcontainer and act are usable
    Doctor,
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries command output (`env --json`, `tags`); logs go to stderr
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::new("info"),
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let cli = Cli::parse();

    // Dropping the command future removes staged contexts and kills children
    let result = tokio::select! {
        result = dispatch(cli) => result,
        () = interrupted() => {
            eprintln!("Interrupted");
            return ExitCode::from(130);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(commands::exit_code(&e))
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let global = cli.global;
    match cli.command {
        Commands::Env { json, refresh } => commands::env(&global, json, refresh).await?,
        Commands::Build { variant } => commands::build(&global, variant.as_deref()).await?,
        Commands::Test {
            variant,
            image,
            strict,
        } => commands::test(&global, variant.as_deref(), image, strict).await?,
        Commands::Promote {
            variant,
            tags,
            from_event,
        } => commands::promote(&global, variant.as_deref(), &tags, from_event).await?,
        Commands::Tags => commands::tags()?,
        Commands::Run {
            variant,
            tags,
            from_event,
            strict,
        } => commands::run(&global, variant.as_deref(), &tags, from_event, strict).await?,
        Commands::Local { job, workflow } => {
            commands::local(workflow.as_deref(), job.as_deref()).await?
        }
        Commands::Doctor => commands::doctor(&global).await?,
    }
    Ok(())
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
