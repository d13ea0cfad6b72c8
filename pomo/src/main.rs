use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pomo::config::{self, Config, DaemonConfig, SessionConfig};
use pomo::ipc::server;
use pomo::viewer::{self, ViewerOptions};
use pomo::{keys, launcher, term};
use pomo_ipc::{ConnectionInfo, DisplayMode, RuntimeFile, SECRET_ENV};
use std::io;
use std::path::Path;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "POMO_LOG";

#[derive(Parser)]
#[command(name = "pomo", version)]
#[command(about = "Pomodoro timer for the terminal", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session and attach to it (the default)
    Start(SessionArgs),
    /// Re-attach to the running session
    Attach,
    /// Run the session daemon in the foreground
    #[command(hide = true)]
    Daemon(DaemonArgs),
}

#[derive(Args, Clone, Default)]
struct SessionArgs {
    /// Focus phase length in minutes
    #[arg(long, value_name = "MINUTES")]
    work: Option<u64>,
    /// Break length in minutes (0 skips breaks)
    #[arg(long = "break", value_name = "MINUTES")]
    rest: Option<u64>,
    /// Number of focus phases
    #[arg(long)]
    iterations: Option<u32>,
    /// timer-back, timer-forward, bar or dots
    #[arg(long, value_name = "MODE")]
    display: Option<DisplayMode>,
    /// Seconds per dot in dots mode
    #[arg(long = "dot-interval", value_name = "SECONDS")]
    dot_interval: Option<u64>,
}

impl SessionArgs {
    /// Command-line values win over the config file.
    fn apply(self, mut session: SessionConfig) -> SessionConfig {
        if let Some(work) = self.work {
            session.work_minutes = work;
        }
        if let Some(rest) = self.rest {
            session.break_minutes = rest;
        }
        if let Some(iterations) = self.iterations {
            session.iterations = iterations;
        }
        if let Some(display) = self.display {
            session.display = display;
        }
        if self.dot_interval.is_some() {
            session.dot_interval = self.dot_interval;
        }
        session
    }
}

#[derive(Args)]
struct DaemonArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Seconds to keep an ended session around for a viewer
    #[arg(long)]
    linger_secs: Option<u64>,
}

impl DaemonArgs {
    fn apply(&self, mut daemon: DaemonConfig) -> DaemonConfig {
        if let Some(linger_secs) = self.linger_secs {
            daemon.linger_secs = linger_secs;
        }
        daemon
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config()?;
    let runtime = RuntimeFile::default_location();

    match cli.command.unwrap_or(Commands::Start(cli.session)) {
        Commands::Start(args) => {
            init_viewer_logging();
            let session = args.apply(config.session.clone());
            start(session, &config, &runtime).await
        }
        Commands::Attach => {
            init_viewer_logging();
            let info = runtime
                .load()
                .with_context(|| format!("Failed to read runtime file {:?}", runtime.path()))?;
            match info {
                Some(info) => {
                    view(&info, &config).await;
                    Ok(())
                }
                None => bail!("No active session; start one with `pomo`"),
            }
        }
        Commands::Daemon(args) => {
            let _guard = init_daemon_logging(runtime.dir())?;
            run_daemon(args, config, &runtime).await
        }
    }
}

async fn start(session: SessionConfig, config: &Config, runtime: &RuntimeFile) -> Result<()> {
    session.plan()?;
    if let Some(info) = launcher::live_session(runtime).await? {
        bail!(
            "A session is already running (pid {}, started {}); use `pomo attach`",
            info.pid,
            info.started_at.format("%H:%M")
        );
    }

    let secret = launcher::new_secret();
    let info = launcher::launch(&session, config.daemon.linger_secs, &secret, runtime).await?;
    view(&info, config).await;
    Ok(())
}

async fn view(info: &ConnectionInfo, config: &Config) {
    let options = ViewerOptions {
        ansi: term::supports_ansi(),
        poll_interval: config.viewer.poll_interval(),
    };
    viewer::attach(info, keys::open, io::stdout(), &options, interrupted()).await;
}

async fn run_daemon(args: DaemonArgs, config: Config, runtime: &RuntimeFile) -> Result<()> {
    let secret = std::env::var(SECRET_ENV)
        .with_context(|| format!("{} is not set; start sessions with `pomo`", SECRET_ENV))?;
    let linger = args.apply(config.daemon).linger();
    let plan = args.session.apply(config.session).plan()?;

    info!(
        "Starting pomo daemon v{} (pid: {})",
        env!("CARGO_PKG_VERSION"),
        std::process::id()
    );
    let result = server::start(plan, secret, runtime, linger, shutdown_signal()).await;
    info!("Daemon shut down");
    result
}

/// Resolves on SIGINT. In raw key mode Ctrl+C arrives as a hotkey instead.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Resolves on SIGTERM or SIGINT.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }
    interrupted().await;
    info!("Received SIGINT, shutting down");
}

/// The viewer owns the terminal, so only warnings go to stderr by default.
fn init_viewer_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

/// The daemon has no terminal; it logs to a daily file next to the runtime file.
fn init_daemon_logging(dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {:?}", dir))?;
    let file_appender = tracing_appender::rolling::daily(dir, "pomo-daemon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();
    Ok(guard)
}
