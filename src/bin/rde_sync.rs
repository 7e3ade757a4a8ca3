use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use rde_sync::config::{Selection, SelectionLoader};
use rde_sync::domain::OutdatedPolicy;
use rde_sync::error::SyncError;
use rde_sync::fetcher::RdeHttpClient;
use rde_sync::output::JsonOutput;
use rde_sync::store::Store;
use rde_sync::sync::{ProgressSink, SyncEngine, status_report};

#[derive(Parser)]
#[command(name = "rde-sync")]
#[command(about = "Selective local-cache refresh for RDE research-data metadata")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch or refresh the selected metadata targets")]
    Sync(SyncArgs),
    #[command(about = "Show the local state of every catalog target")]
    Status(StatusArgs),
}

#[derive(Args)]
struct SyncArgs {
    /// Selection config file (defaults to rde-sync.json when present)
    #[arg(long)]
    config: Option<String>,

    /// Base directory of the local metadata tree
    #[arg(long)]
    base_dir: Option<String>,

    /// Bearer token; falls back to the RDE_API_TOKEN environment variable
    #[arg(long)]
    token: Option<String>,

    #[arg(long)]
    include_dataset_details: bool,

    /// Override the staleness policy from the config
    #[arg(long)]
    policy: Option<OutdatedPolicy>,

    /// Override the staleness threshold in days from the config
    #[arg(long)]
    stale_days: Option<u32>,
}

#[derive(Args)]
struct StatusArgs {
    #[arg(long)]
    base_dir: Option<String>,

    #[arg(long)]
    include_dataset_details: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(sync) = report.downcast_ref::<SyncError>() {
            return ExitCode::from(map_exit_code(sync));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::PrerequisiteMissing { .. } => 2,
        SyncError::Http(_) | SyncError::ApiStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => run_sync(args),
        Commands::Status(args) => run_status(args),
    }
}

fn run_sync(args: SyncArgs) -> miette::Result<()> {
    let token = args
        .token
        .or_else(|| std::env::var("RDE_API_TOKEN").ok())
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| SyncError::Http("no bearer token (use --token or RDE_API_TOKEN)".into()))
        .into_diagnostic()?;

    let mut selection: Selection =
        SelectionLoader::resolve(args.config.as_deref()).into_diagnostic()?;
    if args.include_dataset_details {
        selection.include_dataset_details = true;
    }
    if let Some(policy) = args.policy {
        selection.outdated_policy = policy;
    }
    if let Some(stale_days) = args.stale_days {
        selection.stale_days = stale_days;
    }

    let store = resolve_store(args.base_dir).into_diagnostic()?;
    let fetcher = RdeHttpClient::new().into_diagnostic()?;
    let engine = SyncEngine::new(store, fetcher);

    let outcome = engine
        .run(&token, &selection, &ConsoleProgress)
        .into_diagnostic()?;
    println!("{outcome}");
    Ok(())
}

fn run_status(args: StatusArgs) -> miette::Result<()> {
    let store = resolve_store(args.base_dir).into_diagnostic()?;
    let report = status_report(&store, args.include_dataset_details);
    JsonOutput::print_status(&report).into_diagnostic()?;
    Ok(())
}

fn resolve_store(base_dir: Option<String>) -> Result<Store, SyncError> {
    match base_dir {
        Some(dir) => Ok(Store::new(Utf8PathBuf::from(dir))),
        None => match ProjectDirs::from("jp", "nims", "rde-sync") {
            Some(dirs) => {
                let base = Utf8PathBuf::from_path_buf(dirs.data_local_dir().to_path_buf())
                    .map_err(|_| SyncError::Filesystem("non-utf8 data directory".to_string()))?;
                Ok(Store::new(base))
            }
            None => Store::from_working_dir(),
        },
    }
}

struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn notify(&self, percent: u8, message: &str) -> bool {
        eprintln!("[{percent:>3}%] {message}");
        true
    }
}
