//! IAM role decommission CLI
//!
//! Entry point for the `iam-role-decommission` command-line tool.
//!
//! # Exit Codes
//!
//! - `ExitCode::Success` (0): run completed, no role or account failed
//! - `ExitCode::RoleFailures` (1): run completed, some roles or accounts failed
//! - `ExitCode::Fatal` (2): invalid input or configuration, or the credential
//!   chain failed; the run was aborted
//!
//! See `types::ExitCode` for the enum definition.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use iam_role_decommission_core::aws::iam_client::SdkIamConnector;
use iam_role_decommission_core::aws::s3::S3ObjectSink;
use iam_role_decommission_core::aws::sts::SdkDelegation;
use iam_role_decommission_core::{
    load_assignments, single_assignment, AccountAssignment, AccountOrchestrator,
    DecommissionConfig, RetryPolicy, RunMode, DEFAULT_REGION, DEFAULT_THRESHOLD_DAYS,
};
use log::{debug, info, warn};
use serde::Serialize;

mod types;

use types::ExitCode;

const SESSION_LABEL_PREFIX: &str = "iam-role-decommission";

#[derive(Parser, Debug)]
#[command(
    name = "iam-role-decommission",
    author,
    version,
    about = "Back up and decommission unused IAM roles across AWS accounts",
    long_about = "Walks a list of (account, role) targets through a two-hop credential chain \
(ambient identity -> control account role -> delegation role in the target account), snapshots \
each role completely, and decides eligibility by age and last use.\n\n\
Eligible roles are backed up to a local JSON file and to S3. With --task delete they are then \
torn down in a fixed order and the deletion is verified. Nothing is deleted without both backups.\n\n\
Examples:\n  \
iam-role-decommission run --accounts-file accounts.txt --task backup\n  \
iam-role-decommission run --account 111122223333 --role legacy-worker --task delete --pretty\n  \
iam-role-decommission inspect --account 111122223333 --role legacy-worker --pretty"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Back up eligible roles and, with --task delete, decommission them
    Run(RunArgs),

    /// Snapshot one role and print it with its eligibility verdict; never writes or deletes
    Inspect(InspectArgs),
}

/// Settings shared by every command, each with an environment fallback.
#[derive(Args, Debug, Clone)]
struct PipelineArgs {
    /// Role in the control account, assumed with the ambient identity
    #[arg(long, env = "CONTROL_ROLE_ARN")]
    control_role_arn: String,

    /// Role name assumed in each target account
    #[arg(long, env = "DELEGATION_ROLE")]
    delegation_role: String,

    /// S3 bucket receiving the remote backup copies
    #[arg(long, env = "BACKUP_BUCKET")]
    bucket: String,

    /// Local root for backup files and archives
    #[arg(long, env = "WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    /// Minimum age and idle time, in days, before a role may be deleted
    #[arg(long, env = "THRESHOLD_DAYS", default_value_t = DEFAULT_THRESHOLD_DAYS)]
    threshold_days: i64,

    #[arg(long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    region: String,

    /// CI build number, appended to the STS session name
    #[arg(long, env = "BUILD_NUMBER")]
    build_number: Option<String>,

    /// Enable trace-level logging
    #[arg(long)]
    debug: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

impl PipelineArgs {
    fn session_label(&self) -> String {
        match self.build_number.as_deref().map(str::trim) {
            Some(build) if !build.is_empty() => format!("{SESSION_LABEL_PREFIX}-{build}"),
            _ => SESSION_LABEL_PREFIX.to_string(),
        }
    }

    fn config(&self, mode: RunMode) -> DecommissionConfig {
        DecommissionConfig {
            control_role_arn: self.control_role_arn.trim().to_string(),
            delegation_role_name: self.delegation_role.trim().to_string(),
            session_label: self.session_label(),
            threshold_days: self.threshold_days,
            workspace: self.workspace.clone(),
            bucket: self.bucket.trim().to_string(),
            region: self.region.trim().to_string(),
            mode,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    /// Stop after the dual-location backup
    Backup,
    /// Back up, then decommission
    Delete,
}

impl From<Task> for RunMode {
    fn from(task: Task) -> Self {
        match task {
            Task::Backup => Self::Backup,
            Task::Delete => Self::Delete,
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    /// File of `account_id,role_name` lines
    #[arg(
        long,
        env = "ACCOUNTS_FILE",
        conflicts_with = "account",
        required_unless_present = "account"
    )]
    accounts_file: Option<PathBuf>,

    /// Single target account (12 digits), used with --role
    #[arg(long, env = "TARGET_ACCOUNT", requires = "role")]
    account: Option<String>,

    /// Single target role, used with --account
    #[arg(long, env = "TARGET_ROLE", requires = "account")]
    role: Option<String>,

    #[arg(long, env = "TASK", value_enum, default_value_t = Task::Backup)]
    task: Task,
}

impl RunArgs {
    fn assignments(&self) -> Result<Vec<AccountAssignment>> {
        match (&self.accounts_file, &self.account, &self.role) {
            (Some(path), _, _) => Ok(load_assignments(path)?),
            (None, Some(account), Some(role)) => Ok(vec![single_assignment(account, role)?]),
            _ => anyhow::bail!("either --accounts-file or --account with --role is required"),
        }
    }
}

#[derive(Args, Debug)]
struct InspectArgs {
    #[command(flatten)]
    pipeline: PipelineArgs,

    #[arg(long, env = "TARGET_ACCOUNT")]
    account: String,

    #[arg(long, env = "TARGET_ROLE")]
    role: String,
}

fn init_logging(debug: bool) -> Result<()> {
    let log_level = if debug {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_target(false)
        .format_timestamp_secs()
        .init();

    Ok(())
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("Failed to serialize output")?;
    println!("{rendered}");
    Ok(())
}

/// Build an orchestrator wired to the real AWS services.
async fn connect(config: DecommissionConfig) -> Result<AccountOrchestrator> {
    let delegation = SdkDelegation::from_environment(&config.region).await;
    let sink = S3ObjectSink::from_config(delegation.ambient_config(), config.bucket.clone());
    let connector = SdkIamConnector::new(&config.region);
    AccountOrchestrator::new(
        config,
        Arc::new(delegation),
        Arc::new(connector),
        Arc::new(sink),
    )
    .context("Invalid configuration")
}

async fn handle_run(args: RunArgs) -> Result<ExitCode> {
    let mode = RunMode::from(args.task);
    info!("Running in {mode} mode");

    // input and configuration are checked before any AWS client exists
    let assignments = args.assignments().context("Invalid target list")?;
    let config = args.pipeline.config(mode);
    config.validate().context("Invalid configuration")?;
    debug!("Configuration: {config:?}");

    let orchestrator = connect(config).await?;
    let report = orchestrator
        .run(&assignments)
        .await
        .context("Run aborted")?;

    let summary = report.summary();
    info!(
        "Run finished: {} account(s), {} role(s): {} decommissioned, {} backed up, {} not eligible, {} not found, {} protected, {} skipped, {} failed, {} account error(s)",
        summary.accounts,
        summary.roles,
        summary.decommissioned,
        summary.backed_up,
        summary.not_eligible,
        summary.not_found,
        summary.protected,
        summary.skipped,
        summary.failed,
        summary.account_errors
    );
    print_json(&report, args.pipeline.pretty)?;

    if summary.has_failures() {
        warn!("Some roles or accounts failed; see the report for details");
        Ok(ExitCode::RoleFailures)
    } else {
        Ok(ExitCode::Success)
    }
}

async fn handle_inspect(args: InspectArgs) -> Result<ExitCode> {
    let target = single_assignment(&args.account, &args.role).context("Invalid target")?;
    let config = args.pipeline.config(RunMode::Backup);
    config.validate().context("Invalid configuration")?;

    let orchestrator = connect(config).await?;
    let role_name = target.roles.first().map(String::as_str).unwrap_or_default();
    match orchestrator
        .inspect_role(&target.account_id, role_name)
        .await
        .context("Inspection aborted")?
    {
        Ok(report) => {
            info!(
                "Role {role_name} in account {} is {}",
                target.account_id, report.verdict
            );
            print_json(&report, args.pipeline.pretty)?;
            Ok(ExitCode::Success)
        }
        Err(e) => {
            print_cli_command_error(anyhow::Error::new(e));
            Ok(ExitCode::RoleFailures)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let debug = match &cli.command {
        Commands::Run(args) => args.pipeline.debug,
        Commands::Inspect(args) => args.pipeline.debug,
    };
    if let Err(e) = init_logging(debug) {
        eprintln!("iam-role-decommission: Failed to initialize logging: {e}");
        process::exit(ExitCode::Fatal.into());
    }

    let result = match cli.command {
        Commands::Run(args) => handle_run(args).await,
        Commands::Inspect(args) => handle_inspect(args).await,
    };
    let code = match result {
        Ok(code) => code,
        Err(e) => {
            print_cli_command_error(e);
            ExitCode::Fatal
        }
    };

    process::exit(code.into());
}

fn print_cli_command_error(e: anyhow::Error) {
    eprintln!("Error: {e}");
    let mut source = e.source();
    while let Some(err) = source {
        eprintln!("  Caused by: {err}");
        source = err.source();
    }
}
