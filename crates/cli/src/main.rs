use crate::{
    commands::{Commands, TransferArgs},
    error::CliError,
    schedule::DailySchedule,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use engine_config::{config::TransferConfig, env::EnvManager};
use engine_core::connections::ConnectionManager;
use engine_runtime::{orchestrator::TransferOrchestrator, report::JobReport};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod commands;
mod conn;
mod error;
mod logging;
mod output;
mod schedule;
mod shutdown;

const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Parser)]
#[command(
    name = "etl-transfer",
    version,
    about = "Bulk table transfer between PostgreSQL databases",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    transfer: TransferArgs,

    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Environment file to load (defaults to .env when present)"
    )]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code.into(),
        Err(err) => {
            error!("{err}");
            eprintln!("error: {err}");
            ExitCode::GeneralError.into()
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let mut env = EnvManager::new();
    match &cli.env_file {
        Some(path) => env.load_from_file(path)?,
        None if Path::new(DEFAULT_ENV_FILE).exists() => env.load_from_file(DEFAULT_ENV_FILE)?,
        None => {}
    }

    logging::init(&env.get_or("LOG_LEVEL", "info"), env.get("LOG_FILE").map(Path::new))?;

    let config = TransferConfig::from_env(&env)?;
    let connections = conn::connect(&config)?;

    let code = match cli.command {
        Some(Commands::TestConn) => {
            if conn::test_connections(&config, &connections).await {
                ExitCode::Success
            } else {
                ExitCode::GeneralError
            }
        }
        Some(Commands::RowCount { table, target }) => {
            conn::row_count(&connections, &table, target).await?;
            ExitCode::Success
        }
        None => {
            let shutdown = ShutdownCoordinator::new(CancellationToken::new());
            shutdown.register_handlers();
            transfer(&config, &cli.transfer, &connections, &shutdown).await?
        }
    };

    Ok(code)
}

async fn transfer(
    config: &TransferConfig,
    args: &TransferArgs,
    connections: &ConnectionManager,
    shutdown: &ShutdownCoordinator,
) -> Result<ExitCode, CliError> {
    let schedule = args
        .schedule
        .as_deref()
        .map(str::parse::<DailySchedule>)
        .transpose()?;
    // Surface configuration problems before waiting for the first scheduled run.
    config.build_job(&args.overrides())?;

    let cancel = shutdown.cancel_token();
    let Some(schedule) = schedule else {
        let report = transfer_once(config, args, connections, cancel).await?;
        return Ok(exit_code(&report, shutdown));
    };

    if args.run_now {
        transfer_once(config, args, connections, cancel.clone()).await?;
    }

    let token = &cancel;
    schedule
        .run_daily(token, || async move {
            if let Err(err) = transfer_once(config, args, connections, token.clone()).await {
                error!(%err, "Scheduled transfer could not complete");
            }
        })
        .await;

    Ok(if shutdown.is_shutdown_requested() {
        ExitCode::ShutdownRequested
    } else {
        ExitCode::Success
    })
}

/// One run with a fresh job (and run id).
async fn transfer_once(
    config: &TransferConfig,
    args: &TransferArgs,
    connections: &ConnectionManager,
    cancel: CancellationToken,
) -> Result<JobReport, CliError> {
    let (job, settings) = config.build_job(&args.overrides())?;
    info!(run_id = %job.run_id, "Starting transfer");

    let report = TransferOrchestrator::new(connections.clone(), job, settings, cancel)
        .run()
        .await;

    if let Some(path) = &args.report_json {
        output::write_report(&report, path).await?;
    }
    Ok(report)
}

fn exit_code(report: &JobReport, shutdown: &ShutdownCoordinator) -> ExitCode {
    if report.is_success() {
        ExitCode::Success
    } else if report.cancelled || shutdown.is_shutdown_requested() {
        ExitCode::ShutdownRequested
    } else {
        ExitCode::GeneralError
    }
}
