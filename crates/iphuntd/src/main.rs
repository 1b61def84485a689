// # iphuntd - iphunt daemon and operator CLI
//
// A thin integration layer over iphunt-core:
// 1. Parsing operator commands (`start`, `stop`, `status`)
// 2. Loading the hunt configuration through the gate and its cache
// 3. Registering providers and building the ledger
// 4. Running the Hunter and wiring stop requests to its cancellation token
//
// No hunt logic lives here.
//
// Unix only: the control channel is a Unix socket and stop arrives as
// SIGTERM or SIGINT.
//
// ## Example
//
// ```bash
// export IPHUNT_CONFIG=/etc/iphunt/hunt.json
// export IPHUNT_CONFIG_CACHE=/var/lib/iphunt/hunt.cache.json
// export IPHUNT_LEDGER=/var/lib/iphunt/captures.jsonl
//
// iphuntd start &
// iphuntd status
// iphuntd stop
// ```

#[cfg(not(unix))]
compile_error!("iphuntd needs Unix domain sockets and signals");

mod cli;
mod control;

use anyhow::Result;
use clap::Parser;
use iphunt_core::{
    ConfigCache, ConfigLoader, Error, FileLedger, HuntReport, Hunter, HunterHandle, LedgerConfig,
    LoadedConfig, LocalFileGate, ProviderRegistry,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, trace, warn};
use tracing_subscriber::FmtSubscriber;

use cli::{Commands, OfflineMode, Opts};
use control::{ControlRequest, ControlResponse, ControlServer, DaemonStatus};

use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// - 0: Hunt completed, or command accepted
/// - 1: Configuration absent, empty or invalid
/// - 2: Runtime error before any worker started
/// - 3: Access denied by the licensing gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HuntExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
    /// Access denied
    AccessDenied = 3,
}

impl HuntExitCode {
    /// Classify a failure that stopped the hunt from starting
    fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<Error>() {
            Some(Error::AccessDenied(_)) => HuntExitCode::AccessDenied,
            Some(Error::Config(_)) | Some(Error::Unavailable(_)) => HuntExitCode::ConfigError,
            _ => HuntExitCode::RuntimeError,
        }
    }
}

impl From<HuntExitCode> for ExitCode {
    fn from(code: HuntExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let Opts {
        command,
        control,
        logging,
    } = Opts::parse();

    // Logs go to stderr; stdout carries the JSON output of `status`
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::from(logging.log_level))
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return HuntExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return HuntExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match command {
            Commands::Start {
                config,
                cache,
                offline,
                ledger,
            } => start(config, cache, offline, ledger.ledger, &control.socket).await,
            Commands::Stop => stop(&control.socket).await,
            Commands::Status { ledger } => status(&control.socket, &ledger.ledger).await,
        }
    });

    code.into()
}

async fn start(
    config: PathBuf,
    cache: Option<PathBuf>,
    offline: OfflineMode,
    ledger: PathBuf,
    socket: &Path,
) -> HuntExitCode {
    info!("Starting iphuntd");

    match run_hunt(config, cache, offline, ledger, socket).await {
        Ok(report) => {
            for failure in report.failures() {
                warn!("Account {} did not hunt: {:?}", failure.account, failure.outcome);
            }
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to render hunt report: {}", e),
            }
            info!("iphuntd finished");
            HuntExitCode::CleanShutdown
        }
        Err(e) => {
            let code = HuntExitCode::for_error(&e);
            error!("Hunt did not start: {:#}", e);
            code
        }
    }
}

/// Load, wire and run one hunt
///
/// Errors returned here happen before any worker starts.
async fn run_hunt(
    config: PathBuf,
    cache: Option<PathBuf>,
    offline: OfflineMode,
    ledger: PathBuf,
    socket: &Path,
) -> Result<HuntReport> {
    let mut loader = ConfigLoader::new(LocalFileGate::new(config)).with_policy(offline.into());
    if let Some(cache) = cache {
        loader = loader.with_cache(ConfigCache::new(cache));
    }
    let LoadedConfig { config, freshness } = loader.load().await?;

    let registry = ProviderRegistry::with_builtin_ledgers();
    #[cfg(feature = "sim")]
    {
        debug!("Registering simulated provider");
        iphunt_provider_sim::register(&registry);
    }

    let network = registry.create_network(&config.provider)?;
    let ledger = registry
        .create_ledger(&LedgerConfig::File {
            path: ledger.display().to_string(),
        })
        .await?;

    let (hunter, mut events) = Hunter::new(network, ledger, config.backoff.clone())?;
    let handle = hunter.handle();

    let server = ControlServer::bind(socket).await?;
    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.serve(handle.clone(), freshness, shutdown.clone()));
    let signal_task = tokio::spawn(forward_signals(handle.clone()));
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            trace!("Hunt event: {:?}", event);
        }
    });

    let report = hunter.run(&config.accounts, &config.ranges).await;

    shutdown.cancel();
    signal_task.abort();
    join_background("Control socket", server_task).await;
    // Dropping the hunter closes the event channel
    drop(hunter);
    join_background("Event logging", event_task).await;

    Ok(report?)
}

/// Wait for a background task, logging a panic instead of propagating it
///
/// Returns `true` when the task ended normally.
async fn join_background(name: &str, task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            warn!("{} task ended abnormally: {}", name, e);
            false
        }
    }
}

/// Turn SIGINT/SIGTERM into a stop request
async fn forward_signals(handle: HunterHandle) {
    loop {
        match wait_for_signal().await {
            Ok(signal) => {
                if handle.is_stop_requested() {
                    info!("Received {} while already stopping", signal);
                } else {
                    info!("Received {}, stopping all workers", signal);
                    handle.request_stop();
                }
            }
            Err(e) => {
                error!("Signal handling unavailable: {}", e);
                return;
            }
        }
    }
}

async fn stop(socket: &Path) -> HuntExitCode {
    match control::send(socket, ControlRequest::Stop).await {
        Ok(Some(ControlResponse::Accepted)) => {
            println!("stop requested");
            HuntExitCode::CleanShutdown
        }
        Ok(Some(other)) => {
            error!("Daemon refused stop: {:?}", other);
            HuntExitCode::RuntimeError
        }
        Ok(None) => {
            error!("No iphuntd is listening on {}", socket.display());
            HuntExitCode::RuntimeError
        }
        Err(e) => {
            error!("Failed to send stop: {:#}", e);
            HuntExitCode::RuntimeError
        }
    }
}

async fn status(socket: &Path, ledger: &Path) -> HuntExitCode {
    let status = match control::send(socket, ControlRequest::Status).await {
        Ok(Some(ControlResponse::Status { status })) => Ok(status),
        Ok(Some(other)) => Err(anyhow::anyhow!("unexpected reply: {:?}", other)),
        Ok(None) => {
            debug!("No daemon on {}, reading ledger directly", socket.display());
            offline_status(ledger).await
        }
        Err(e) => Err(e),
    };

    match status.and_then(|s| Ok(serde_json::to_string_pretty(&s)?)) {
        Ok(json) => {
            println!("{}", json);
            HuntExitCode::CleanShutdown
        }
        Err(e) => {
            error!("Failed to read status: {:#}", e);
            HuntExitCode::RuntimeError
        }
    }
}

async fn offline_status(ledger: &Path) -> Result<DaemonStatus> {
    let ledger = FileLedger::open(ledger).await?;
    DaemonStatus::offline(&ledger).await
}

/// Wait for SIGTERM or SIGINT
///
/// # Returns
///
/// Returns the name of the signal received.
async fn wait_for_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(received)
}
