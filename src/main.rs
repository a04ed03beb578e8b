//! freerds-session-manager - FreeRDS session broker
//!
//! Entry point for the daemon binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

use freerds_session_manager::config::Config;
use freerds_session_manager::daemon;
use freerds_session_manager::utils::{format_user_error, log_startup_diagnostics};

/// Command-line arguments for freerds-session-manager
#[derive(Parser, Debug)]
#[command(name = "freerds-session-manager")]
#[command(version, about = "FreeRDS session manager", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/freerds/session-manager.toml")]
    pub config: PathBuf,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    /// Write logs to file (in addition to stdout)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Stop the running instance recorded in the pid file and exit
    #[arg(long)]
    pub kill: bool,

    /// Directory for the control endpoint and backend sockets
    #[arg(long, env = "FREERDS_PIPE_DIR")]
    pub pipe_dir: Option<PathBuf>,

    /// Pid file location
    #[arg(long, env = "FREERDS_PID_FILE")]
    pub pid_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = init_logging(&args)?;

    info!("════════════════════════════════════════════════════════");
    info!("  freerds-session-manager v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {} {}", env!("BUILD_DATE"), env!("BUILD_TIME"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_user_error(&e));
            return Err(e);
        }
    };

    if args.kill {
        return match daemon::kill_running(&config.server.pid_file) {
            Ok(pid) => {
                println!("Sent SIGTERM to session manager (pid {})", pid);
                Ok(())
            }
            Err(e) => {
                eprintln!("{}", format_user_error(&e));
                Err(e)
            }
        };
    }

    log_startup_diagnostics();
    tracing::debug!("Config: {:?}", config);

    info!("Starting session manager");
    if let Err(e) = daemon::run(config).await {
        eprintln!("{}", format_user_error(&e));
        return Err(e);
    }

    Ok(())
}

/// Load the config file (defaults when it does not exist) and apply CLI overrides
fn load_config(args: &Args) -> Result<Config> {
    let config = if args.config.exists() {
        let config = Config::load(&args.config)?;
        info!("Configuration loaded from {}", args.config.display());
        config
    } else {
        warn!("Config file {} not found, using defaults", args.config.display());
        Config::default_config()
    };

    let config = config.with_overrides(args.pipe_dir.clone(), args.pid_file.clone());
    config.validate()?;
    Ok(config)
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "freerds_session_manager={level},warn",
            level = log_level
        ))
    });

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    layers.push(match args.log_format.as_str() {
        "json" => fmt::layer().json().boxed(),
        "compact" => fmt::layer().compact().boxed(),
        _ => fmt::layer().pretty().boxed(),
    });

    // If log file is specified, write to both stdout and file
    let guard = match &args.log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);

            layers.push(match args.log_format.as_str() {
                "json" => fmt::layer().json().with_writer(writer).with_ansi(false).boxed(),
                _ => fmt::layer().with_writer(writer).with_ansi(false).boxed(),
            });
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry().with(layers).with(env_filter).init();

    if let Some(path) = &args.log_file {
        info!("Logging to file: {}", path.display());
    }

    Ok(guard)
}
