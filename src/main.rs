use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use netguard::config::Config;
use netguard::probe::{ByteCounterProbe, LinkStateProbe, RateMeter};
use netguard::scheduler::{self, ControlLoop};
use netguard::sink::{ActionSink, IpCommandSink};
use netguard::{congestion, failover};
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// Use mimalloc as the global allocator for the binary (non-Windows only)
#[cfg(not(windows))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(
    name = "netguard",
    author,
    version,
    disable_version_flag = true,
    about = "Failover and congestion controllers for emulated campus networks"
)]
struct Cli {
    /// Print the version and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::SetTrue)]
    print_version: bool,

    /// Path to the YAML controller configuration
    #[arg(short = 'c', long = "config", required_unless_present = "print_version")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long = "check")]
    check: bool,

    /// Undo enforcement of controllers still DEGRADED when shutting down
    #[arg(long = "release-on-exit")]
    release_on_exit: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    if args.print_version {
        println!(
            "{} ({}@{}{}) [{}]",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_BRANCH"),
            env!("GIT_HASH"),
            env!("GIT_DIRTY"),
            env!("CARGO_PKG_NAME")
        );
        return Ok(());
    }

    let Some(config_path) = args.config else {
        anyhow::bail!("--config is required");
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("load {}", config_path.display()))?;
    config.validate().context("invalid configuration")?;

    if args.check {
        println!("{}: ok", config_path.display());
        return Ok(());
    }

    run(config, args.release_on_exit).await
}

async fn run(config: Config, release_on_exit: bool) -> Result<()> {
    let registry = Arc::new(config.registry());
    info!("{} nodes registered", registry.len());
    let sink: Arc<dyn ActionSink> = Arc::new(IpCommandSink::new(registry.clone(), config.sudo));
    let shutdown = CancellationToken::new();

    let failover_task = match &config.failover {
        Some(fo) => {
            let probe = LinkStateProbe::new(
                registry.clone(),
                config.sudo,
                fo.primary.clone(),
                fo.uplinks.clone(),
            );
            let controller = failover::build(fo, &registry, probe, sink.clone())
                .context("build failover controller")?;
            Some(scheduler::spawn(controller, fo.poll_interval(), shutdown.clone()))
        }
        None => None,
    };

    let congestion_task = match &config.congestion {
        Some(cg) => {
            let counter = ByteCounterProbe::new(
                registry.clone(),
                config.sudo,
                cg.chokepoint.clone(),
                cg.counter,
            );
            let controller = congestion::build(cg, &registry, RateMeter::new(counter), sink.clone())
                .context("build congestion controller")?;
            Some(scheduler::spawn(controller, cg.poll_interval(), shutdown.clone()))
        }
        None => None,
    };

    wait_for_shutdown().await?;
    info!("shutting down");
    shutdown.cancel();

    if let Some(task) = failover_task {
        finish(task, release_on_exit).await;
    }
    if let Some(task) = congestion_task {
        finish(task, release_on_exit).await;
    }
    Ok(())
}

async fn finish<C: ControlLoop>(task: JoinHandle<C>, release: bool) {
    let mut controller = match task.await {
        Ok(c) => c,
        Err(e) => {
            error!("controller task failed: {e}");
            return;
        }
    };
    if !release {
        if controller.state() == netguard::ControllerState::Degraded {
            warn!(
                controller = controller.name(),
                "exiting while DEGRADED; enforcement left in place"
            );
        }
        return;
    }
    let failures = controller.release().await;
    if !failures.is_empty() {
        warn!(
            controller = controller.name(),
            "{} release steps failed",
            failures.len()
        );
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("wait for ctrl-c")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await.context("wait for ctrl-c")
}
