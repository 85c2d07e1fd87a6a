//! Watchdog binary: the long-running supervisor service itself.
//! Command surface mirrors the original's `strings.ToLower(os.Args[1])`
//! switch in `watchdog/main.go`: install/remove/start/stop/debug/is/get.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use agent_watchdog::config::AgentConfig;
use agent_watchdog::logging::RemoteLogLayer;
use agent_watchdog::models::LicenseData;
use agent_watchdog::service_control::{PlatformServiceControl, ServiceControl, StartReason};
use agent_watchdog::service_discovery::PlatformServiceDiscovery;
use agent_watchdog::supervisor::{self, SupervisorContext};
use agent_watchdog::{logging, update_pipeline, WATCHDOG_SVC_DESCRIPTION, WATCHDOG_SVC_DISPLAY_NAME, WATCHDOG_SVC_NAME};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "watchdog")]
#[command(about = "Keeps the managed agent service running at the latest approved version")]
struct Cli {
    #[command(subcommand)]
    command: WatchdogCommand,
}

#[derive(Subcommand)]
enum WatchdogCommand {
    /// Installs the watchdog as a platform service.
    Install,
    /// Removes the watchdog service registration.
    Remove,
    /// Starts the watchdog service.
    Start,
    /// Stops the watchdog service.
    Stop,
    /// Runs the supervisor loop in the foreground, attached to a terminal.
    Debug,
    /// Reports how this process was started, then runs the supervisor loop.
    Is {
        #[arg(value_enum)]
        reason: StartReasonArg,
    },
    /// Runs a single update check and exits. For manual troubleshooting only.
    Get,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum StartReasonArg {
    #[value(name = "auto-started")]
    AutoStarted,
    #[value(name = "manual-started")]
    ManualStarted,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let base_dir = executable_dir();

    let (_log_guard, remote_log) = match logging::init(&base_dir.join("Logs"), "watchdog.log", "agent_watchdog=info") {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("failed to open log file: {e}");
            return ExitCode::from(2);
        }
    };

    info!(base_dir = %base_dir.display(), "firing up {}", WATCHDOG_SVC_DISPLAY_NAME);

    let result = match cli.command {
        WatchdogCommand::Install => install(&base_dir),
        WatchdogCommand::Remove => remove(),
        WatchdogCommand::Start => start(StartReason::ManualStarted),
        WatchdogCommand::Stop => stop(),
        WatchdogCommand::Debug => run_supervisor(&base_dir, &remote_log).await,
        WatchdogCommand::Is { reason } => {
            let reason = match reason {
                StartReasonArg::AutoStarted => StartReason::AutoStarted,
                StartReasonArg::ManualStarted => StartReason::ManualStarted,
            };
            info!(?reason, "invoked with 'is' start reason");
            run_supervisor(&base_dir, &remote_log).await
        }
        WatchdogCommand::Get => run_single_update_check(&base_dir).await,
    };

    match result {
        Ok(()) => {
            info!("command execution finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::from(1)
        }
    }
}

fn executable_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn install(base_dir: &PathBuf) -> anyhow::Result<()> {
    let control = PlatformServiceControl::new();
    let exe_path = base_dir.join(if cfg!(windows) { "watchdog.exe" } else { "watchdog" });
    control.install(WATCHDOG_SVC_NAME, WATCHDOG_SVC_DISPLAY_NAME, WATCHDOG_SVC_DESCRIPTION, &exe_path.display().to_string())?;
    Ok(())
}

fn remove() -> anyhow::Result<()> {
    let control = PlatformServiceControl::new();
    control.remove(WATCHDOG_SVC_NAME)?;
    Ok(())
}

fn start(reason: StartReason) -> anyhow::Result<()> {
    let control = PlatformServiceControl::new();
    control.start(WATCHDOG_SVC_NAME, reason)?;
    Ok(())
}

fn stop() -> anyhow::Result<()> {
    let control = PlatformServiceControl::new();
    control.stop(WATCHDOG_SVC_NAME)?;
    Ok(())
}

async fn run_supervisor(base_dir: &PathBuf, remote_log: &Arc<RemoteLogLayer>) -> anyhow::Result<()> {
    let config = AgentConfig::load_current(base_dir)?;
    let hostname = hostname()?;

    let service_control: Arc<dyn ServiceControl + Send + Sync> = Arc::new(PlatformServiceControl::new());
    let service_discovery: Arc<dyn agent_watchdog::service_discovery::ServiceDiscovery + Send + Sync> =
        Arc::new(PlatformServiceDiscovery::new());

    let ctx = Arc::new(SupervisorContext::new(
        base_dir.clone(),
        hostname,
        &config,
        service_control,
        service_discovery,
    )?);

    activate_remote_logging(remote_log, &ctx).await;

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_signal.cancel();
    });

    supervisor::run(ctx, shutdown).await;
    Ok(())
}

/// Queries `/license` once at startup and, if valid, switches on the
/// remote log forwarder for the rest of the process lifetime. Failure
/// is logged at `warn` and never blocks the supervisor from starting.
async fn activate_remote_logging(remote_log: &Arc<RemoteLogLayer>, ctx: &SupervisorContext) {
    match ctx.api_client.get::<LicenseData>("/license").await {
        Ok(license) if license.valid => {
            info!(owner = %license.owner, "license valid, enabling remote log forwarding");
            remote_log.activate(ctx.api_client.clone(), license.owner);
        }
        Ok(_) => warn!("license invalid, remote log forwarding disabled"),
        Err(e) => warn!(error = %e, "failed to query license, remote log forwarding disabled"),
    }
}

async fn run_single_update_check(base_dir: &PathBuf) -> anyhow::Result<()> {
    let updates_dir = base_dir.join(update_pipeline::UPDATES_SUBDIR);
    if updates_dir.exists() {
        tokio::fs::remove_dir_all(&updates_dir).await?;
    }

    let config = AgentConfig::load_current(base_dir)?;
    let api_client = agent_watchdog::api_client::ApiClient::new(
        config.webservice.endpoint.clone(),
        config.license_key.clone(),
        config.proxy_url(),
    )?;
    let discovery = PlatformServiceDiscovery::new();
    let lifecycle_mutex = Arc::new(tokio::sync::Mutex::new(()));

    update_pipeline::check_for_updates(base_dir, agent_watchdog::AGENT_SVC_NAME, &api_client, &discovery, lifecycle_mutex).await?;
    Ok(())
}

fn hostname() -> anyhow::Result<String> {
    Ok(hostname::get()?.to_string_lossy().into_owned())
}
