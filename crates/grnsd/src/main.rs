//! `grnsd` -- the grns task-tracking daemon.
//!
//! Parses CLI flags, loads configuration, opens the store and blob store,
//! and serves the HTTP API until interrupted.

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::{Parser, Subcommand};
use fs2::FileExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use grns_config::GrnsConfig;
use grns_storage::SqliteStore;
use grnsd::{build_state, server};

#[derive(Parser)]
#[command(name = "grnsd", about = "grns task-tracking daemon", version)]
struct Cli {
    /// Path to a config file (replaces the global config).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Trust the project-local .grns/config.toml.
    #[arg(long, global = true)]
    trust_project_config: bool,

    /// Override the listen address (host:port).
    #[arg(long, global = true)]
    listen: Option<String>,

    /// Override the database path.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Override the log filter (error|warn|info|debug|trace).
    #[arg(long, global = true, env = "GRNS_LOG")]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (the default).
    Serve,
    /// Apply pending schema migrations, or show them with --plan.
    Migrate {
        /// Print the plan without applying anything.
        #[arg(long)]
        plan: bool,
    },
    /// Print the effective configuration as TOML.
    Config,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("grnsd: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match cli.config {
        Some(ref path) => GrnsConfig::load_from(Some(path), None)?,
        None => GrnsConfig::load(cli.trust_project_config)?,
    };
    if let Some(listen) = cli.listen {
        config.api_url = format!("http://{listen}");
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    config.validate()?;

    init_logging(&config, cli.log_file.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Config => {
            println!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Migrate { plan } => migrate(&config, plan),
        Command::Serve => serve(config),
    }
}

fn init_logging(config: &GrnsConfig, log_file: Option<&std::path::Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.log_level)
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("fallback filter is valid");

    match log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn migrate(config: &GrnsConfig, plan_only: bool) -> anyhow::Result<()> {
    ensure_parent_dir(config)?;

    if plan_only {
        // Read-only: safe against a database that does not exist yet.
        let plan = grns_storage::migrations::plan_at_path(&config.db_path)?;
        println!(
            "schema version {} of {} available",
            plan.current, plan.available
        );
        for (version, description) in &plan.pending {
            println!("  pending {version}: {description}");
        }
        if plan.pending.is_empty() {
            println!("  nothing to do");
        }
        return Ok(());
    }

    // Opening the store applies pending migrations.
    let store = SqliteStore::open(&config.db_path)?;
    let version = store.schema_version_impl()?;
    println!("schema at version {version}");
    Ok(())
}

fn ensure_parent_dir(config: &GrnsConfig) -> anyhow::Result<()> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(())
}

fn serve(config: GrnsConfig) -> anyhow::Result<()> {
    ensure_parent_dir(&config)?;

    // One daemon per database file; a second instance would fight over the
    // WAL and the blob directory.
    let lock_path = config.db_path.with_extension("lock");
    let lock_file = File::create(&lock_path)
        .with_context(|| format!("failed to create lock file {}", lock_path.display()))?;
    lock_file.try_lock_exclusive().with_context(|| {
        format!("another grnsd already serves {}", config.db_path.display())
    })?;

    let addr = config
        .listen_addr()
        .expect("validated config has a listen address");
    if config.api_token.is_none() {
        warn!("api_token is not configured; the API is unauthenticated");
    }

    let state = build_state(config)?;
    let handle = server::start(state, &addr)?;
    info!(addr = %handle.addr, "grnsd ready");

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .context("failed to install signal handler")?;
    }

    while !interrupted.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    handle.shutdown();
    let _ = FileExt::unlock(&lock_file);
    let _ = fs::remove_file(&lock_path);
    info!("bye");
    Ok(())
}
