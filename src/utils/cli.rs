//! Running the CLI

// Allow exits because in this file we ideally handle all errors with known exit codes
#![allow(clippy::exit)]
// Reports are the commands' output
#![allow(clippy::print_stdout)]

use crate::feedback::{self, DEFAULT_KEY_COLUMN};
use crate::submissions::config::Config;
use crate::submissions::context::RunContext;
use crate::submissions::ledger::{CsvLedger, LedgerStore};
use crate::submissions::reconcile::{preserve_for, reconcile};
use crate::submissions::roster::{Roster, RosterFilter};
use crate::submissions::sync::SyncReference;
use crate::utils::interrupt::{Interrupt, Interrupted, EXIT_INTERRUPTED};
use anyhow::Context;
use clap::Parser;
use std::fs::{self, read_to_string, OpenOptions};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code for unrecoverable errors.
const EXIT_FAILURE: i32 = 1;
/// Environment variable read for a token when no token file is given.
const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Tools for managing course submissions held in git repositories.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level (`RUST_LOG` still takes precedence).
    #[arg(short, long, global = true)]
    debug: bool,
    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// hw-submissions subcommands
    #[command(subcommand)]
    subcommands: Subcommands,
}

///
#[derive(Clone, clap::Subcommand)]
enum Subcommands {
    /// Clone or update every roster repository at a tag or branch and record
    /// the outcome in the timestamp ledger
    Clone(CloneArgs),
    /// Render per-repository feedback files from a marking CSV
    Feedback(FeedbackArgs),
}

///
#[derive(Clone, clap::Args)]
struct CloneArgs {
    /// CSV roster with `repo_id`/`REPO_ID` and `git_url`/`REPO_URL` columns.
    roster: PathBuf,
    /// Tag to check out, or `main`/`master` to follow a branch.
    reference: String,
    /// Folder holding one working copy per repository.
    output_folder: PathBuf,
    /// Only process these repository ids (case-insensitive).
    #[arg(long, num_args = 1..)]
    repos: Option<Vec<String>>,
    /// Never process these repository ids (case-insensitive).
    #[arg(long, num_args = 1..)]
    ignore: Vec<String>,
    /// Ledger CSV. Defaults to the `ledger` config value.
    #[arg(long)]
    file_timestamps: Option<PathBuf>,
    /// Keep every existing ledger row that this run doesn't replace.
    #[arg(long)]
    add_timestamps: bool,
    /// File holding a GitHub token for HTTPS remotes.
    #[arg(long)]
    token_file: Option<PathBuf>,
}

///
#[derive(Clone, clap::Args)]
struct FeedbackArgs {
    /// Marking CSV, one row per repository.
    marking: PathBuf,
    /// Folder receiving one `<key>.md` file per repository.
    output_folder: PathBuf,
    /// Built-in policy name (`ledger`) or path to a TOML policy file.
    #[arg(long, default_value = "ledger")]
    policy: String,
    /// Column holding the repository id. Defaults to the policy's, else `REPO_ID`.
    #[arg(long)]
    key_column: Option<String>,
    /// Only render these repository ids (case-insensitive).
    #[arg(long, num_args = 1..)]
    repos: Option<Vec<String>>,
}

/// Set up logging to stderr and, with `--log-file`, to a file.
///
/// The returned guard flushes the file writer when dropped.
fn init_tracing(debug: bool, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);
    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .try_init()?;
        return Ok(None);
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Could not open log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()?;
    Ok(Some(guard))
}

/// Read the config file, or use the defaults when none is given.
fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    path.map_or_else(|| Ok(Config::default()), Config::load)
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_owned(),
    }
}

/// Token for HTTPS remotes: `--token-file`, then the configured token file,
/// then `GITHUB_TOKEN`.
///
/// A token file that is given but unreadable or empty is an error.
fn load_token(token_file: Option<&Path>, config: &Config) -> anyhow::Result<Option<String>> {
    if let Some(path) = token_file.or(config.credentials.token_file.as_deref()) {
        let path = expand_home(path);
        let token = read_to_string(&path)
            .with_context(|| format!("Could not read token file {}", path.display()))?;
        let token = token.trim();
        if token.is_empty() {
            anyhow::bail!("Token file {} is empty", path.display());
        }
        return Ok(Some(token.to_owned()));
    }
    Ok(std::env::var(TOKEN_ENV)
        .ok()
        .map(|token| token.trim().to_owned())
        .filter(|token| !token.is_empty()))
}

/// The `clone` subcommand.
fn run_clone(config_path: Option<&Path>, args: &CloneArgs) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let token = load_token(args.token_file.as_deref(), &config)?;
    if token.is_none() {
        tracing::debug!("No token found; HTTPS remotes will use default credentials");
    }
    let ctx = RunContext::new(&config, token, Interrupt::install()?)?;
    let ledger = CsvLedger::new(args.file_timestamps.as_deref().unwrap_or(config.ledger.as_path()));
    clone_into(&ctx, args, &ledger)?;
    Ok(())
}

/// Reconcile the selected roster entries and save the ledger.
///
/// Returns `false`, without touching the output folder or the ledger, when no
/// roster entry matches the selection.
fn clone_into(ctx: &RunContext, args: &CloneArgs, ledger: &CsvLedger) -> anyhow::Result<bool> {
    let reference = SyncReference::parse(&args.reference);
    let filter = RosterFilter::new(args.repos.as_deref(), &args.ignore);
    let roster = Roster::load(&args.roster)?.select(&filter);
    if roster.entries.is_empty() {
        tracing::warn!(
            "No repositories in {} match the selection; nothing to do",
            args.roster.display()
        );
        return Ok(false);
    }
    fs::create_dir_all(&args.output_folder)
        .with_context(|| format!("Could not create {}", args.output_folder.display()))?;

    let reconciliation = reconcile(ctx, roster, &reference, &args.output_folder)?;
    let preserve = preserve_for(&filter, args.add_timestamps);
    let saved = ledger.save(reconciliation.rows, &preserve, &ctx.stamp());
    println!("{}", reconciliation.report);
    saved.with_context(|| format!("Could not write ledger {}", ledger.path().display()))?;
    tracing::info!("Ledger written to {}", ledger.path().display());
    Ok(true)
}

/// The `feedback` subcommand.
fn run_feedback(args: &FeedbackArgs) -> anyhow::Result<()> {
    let policy = feedback::load_policy(&args.policy)?;
    let key_column = args
        .key_column
        .as_deref()
        .or_else(|| policy.key_column())
        .unwrap_or(DEFAULT_KEY_COLUMN);
    let rows = feedback::load_rows(&args.marking)?;
    tracing::info!(
        policy = policy.name(),
        "Rendering feedback for {} rows keyed by `{key_column}`",
        rows.len()
    );
    let filter = RosterFilter::new(args.repos.as_deref(), &[]);
    let report = feedback::render_all(
        policy.as_ref(),
        &rows,
        key_column,
        &filter,
        &args.output_folder,
    )?;
    println!("{report}");
    Ok(())
}

/// Main entrypoint to application
pub fn run() {
    let cli = Cli::parse();
    let guard = match init_tracing(cli.debug, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("error: could not set up logging: {err:#}");
            std::process::exit(EXIT_FAILURE);
        }
    };
    tracing::debug!("Starting application");
    let result = match cli.subcommands {
        Subcommands::Clone(args) => run_clone(cli.config.as_deref(), &args),
        Subcommands::Feedback(args) => run_feedback(&args),
    };
    let Err(err) = result else {
        return;
    };
    let code = if err.is::<Interrupted>() {
        tracing::error!("Interrupted; the ledger was not changed");
        EXIT_INTERRUPTED
    } else {
        tracing::error!("error: {err:#}");
        EXIT_FAILURE
    };
    // `exit` skips destructors, so flush the log file first.
    drop(guard);
    std::process::exit(code);
}
