use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info};
use thiserror::Error;

mod feature;
mod libs;

use feature::commands::{self, Command, Context};
use feature::containers::registry::HttpRegistryClient;
use feature::release::Host;
use feature::workflows::github::GitHubWorkflowClient;
use libs::clock::{Cancellation, TokioClock};
use libs::error::{ApiError, ConfigError};
use libs::outcome;
use libs::retry::RetryPolicy;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Tag configuration file.
    #[arg(short, long, default_value = "repos.toml", global = true)]
    config: PathBuf,

    #[arg(long, action, global = true)]
    debug: bool,

    /// Organization that owns the repositories.
    #[arg(long, default_value = "ssl-hep", global = true)]
    owner: String,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Tag local clones under this directory instead of GitHub.
    #[arg(long, global = true)]
    local: Option<PathBuf>,

    /// Targets processed concurrently.
    #[arg(short, long, default_value_t = 1, global = true)]
    jobs: usize,

    /// Resolve and print tags without creating them.
    #[arg(long, action, global = true)]
    dry_run: bool,

    /// Seconds between polls of CI and registries.
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..), global = true)]
    poll_interval: u64,

    /// Seconds to wait on CI and registries before giving up.
    #[arg(long, default_value_t = 3600, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tag repos using settings from the config file
    Tag,
    /// Add a new tag to commits that already carry a tag
    Retag {
        #[arg(long, default_value = "retag.toml")]
        retag_config: PathBuf,
    },
    /// Verify containers have been published for a tag
    VerifyContainers {
        #[arg(long)]
        tag: String,
    },
    /// Wait for workflows started by a tag to complete
    MonitorWorkflows {
        #[arg(long)]
        tag: String,
    },
    /// Tag, then wait for workflows and published containers
    Release,
}

#[derive(Debug, Error)]
enum StartupError
{
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to set up client: {0}")]
    Client(#[from] ApiError),
}

fn command(args: &Args) -> Result<Command, ConfigError>
{
    let command = match &args.command
    {
        Commands::Tag => Command::Tag { specs: libs::data::load_tag_config(&args.config)? },
        Commands::Retag { retag_config } => Command::Retag { specs: libs::data::load_retag_config(retag_config)? },
        Commands::VerifyContainers { tag } => Command::VerifyContainers { specs: libs::data::load_tag_config(&args.config)?, tag: tag.clone() },
        Commands::MonitorWorkflows { tag } => Command::MonitorWorkflows { specs: libs::data::load_tag_config(&args.config)?, reference: tag.clone() },
        Commands::Release => Command::Release { specs: libs::data::load_tag_config(&args.config)? },
    };
    Ok(command)
}

async fn run(args: Args) -> Result<bool, StartupError>
{
    let command = command(&args)?;
    info!("Read Release Configuration");

    let host = match &args.local
    {
        Some(root) => Host::Local { root: root.clone() },
        None => Host::GitHub { owner: args.owner.clone(), token: args.token.clone() },
    };
    let release = feature::release::connect(&host)?;
    let registry = HttpRegistryClient::new()?;
    let workflows = GitHubWorkflowClient::new(&args.owner, args.token.as_deref())?;

    let (handle, cancel) = Cancellation::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok()
        {
            error!("Interrupted, cancelling");
            handle.cancel();
        }
    });

    let context = Context {
        release: &*release,
        registry: &registry,
        workflows: &workflows,
        clock: &TokioClock,
        cancel,
        retry: RetryPolicy::default(),
        jobs: args.jobs,
        dry_run: args.dry_run,
        poll_interval: Duration::from_secs(args.poll_interval),
        timeout: Duration::from_secs(args.timeout),
    };
    let report = commands::execute(command, &context).await;

    for outcome in report.outcomes.iter()
    {
        println!("{}", outcome);
    }

    let failures = outcome::failures(&report.outcomes);
    if !failures.is_empty() || !report.blocked.is_empty()
    {
        error!("{} target(s) failed:", failures.len() + report.blocked.len());
        for failure in failures
        {
            error!("\t{}", failure);
        }
        for blocked in report.blocked.iter()
        {
            error!("\t{}", blocked);
        }
    }

    Ok(report.is_success())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize the logger, with --debug log everything; otherwise, log only errors, warnings and info.
    if args.debug
    {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }
    else
    {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    match run(args).await
    {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) =>
        {
            error!("{}", error);
            ExitCode::FAILURE
        }
    }
}

#[test]
fn test_args()
{
    let args = Args::try_parse_from(["release-tool", "--dry-run", "retag", "--retag-config", "other.toml"]).unwrap();
    assert!(args.dry_run);
    assert_eq!(args.config, PathBuf::from("repos.toml"));
    assert!(matches!(args.command, Commands::Retag { ref retag_config } if retag_config == &PathBuf::from("other.toml")));

    let args = Args::try_parse_from(["release-tool", "verify-containers", "--tag", "v1", "--config", "x.toml"]).unwrap();
    assert_eq!(args.config, PathBuf::from("x.toml"));
    assert!(matches!(args.command, Commands::VerifyContainers { ref tag } if tag == "v1"));

    assert!(Args::try_parse_from(["release-tool", "monitor-workflows"]).is_err());
}

#[test]
fn test_poll_interval_must_be_positive()
{
    assert!(Args::try_parse_from(["release-tool", "--poll-interval", "0", "tag"]).is_err());

    let args = Args::try_parse_from(["release-tool", "--poll-interval", "5", "--timeout", "18446744073709551615", "tag"]).unwrap();
    assert_eq!(args.poll_interval, 5);
    assert_eq!(args.timeout, u64::MAX);
}

#[test]
fn test_command_requires_config()
{
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repos.toml");
    let args = Args::try_parse_from(["release-tool", "--config", path.to_str().unwrap(), "tag"]).unwrap();
    assert_eq!(command(&args).unwrap_err(), ConfigError::Missing(path.clone()));

    std::fs::write(&path, "[ServiceX]\nbranch = \"develop\"\nlabel = \"develop1\"\ntagtype = \"calver\"\n").unwrap();
    assert!(matches!(command(&args), Ok(Command::Tag { ref specs }) if specs.len() == 1));
}
