//! Manager binary: a short-lived helper invoked (via a disposable copy)
//! by the watchdog to perform privileged operations it cannot safely
//! do to itself. Grounded on `main`/`doUpdate` in the original
//! `manager/manager.go`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use agent_watchdog::installer;
use agent_watchdog::logging;
use agent_watchdog::service_control::{PlatformServiceControl, ServiceControl, StartReason};
use agent_watchdog::service_discovery::PlatformServiceDiscovery;
use agent_watchdog::{AGENT_SVC_NAME, WATCHDOG_SVC_DESCRIPTION, WATCHDOG_SVC_DISPLAY_NAME, WATCHDOG_SVC_NAME};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "manager")]
#[command(about = "One-shot helper that installs agent updates and toggles its service state")]
struct Cli {
    #[command(subcommand)]
    command: ManagerCommand,
}

#[derive(Subcommand)]
enum ManagerCommand {
    /// Stops the agent, reinstalls it from `installer_file`, and restarts it.
    Update { installer_file: PathBuf },
    /// Starts the agent service.
    Start,
    /// Stops the agent service.
    Stop,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let base_dir = executable_dir();

    let (_log_guard, _remote_log) = match logging::init(&base_dir.join("Logs"), "manager.log", "agent_watchdog=info") {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("failed to open log file: {e}");
            return ExitCode::from(2);
        }
    };

    info!("firing up manager");

    let control = PlatformServiceControl::new();
    let result = match cli.command {
        ManagerCommand::Update { installer_file } => do_update(&base_dir, &installer_file, &control),
        ManagerCommand::Start => control.start(AGENT_SVC_NAME, StartReason::ManualStarted).map_err(Into::into),
        ManagerCommand::Stop => control.stop(AGENT_SVC_NAME).map_err(Into::into),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            warn!(error = %e, "command failed");
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

/// Stops the agent, reinstalls it, restarts it, and finally reinstates
/// the watchdog service as a safety belt, matching the original's
/// "these are going to be no-op commands if the watchdog is still
/// running" comment: failures here are logged, never escalated.
fn do_update(base_dir: &Path, installer_file: &Path, control: &PlatformServiceControl) -> anyhow::Result<()> {
    info!("checking prerequisites");
    if !installer_file.exists() {
        anyhow::bail!("update package not found at {}", installer_file.display());
    }

    info!("stopping agent service");
    if let Err(e) = control.stop(AGENT_SVC_NAME) {
        warn!(error = %e, "could not stop agent service, continuing anyway");
    }

    info!("reinstalling agent service");
    let discovery = PlatformServiceDiscovery::new();
    if let Err(e) = installer::reinstall(installer_file, AGENT_SVC_NAME, &discovery) {
        warn!(error = %e, "failed to reinstall agent service, continuing anyway");
    }

    info!("restarting agent service");
    let restart_result = control.start(AGENT_SVC_NAME, StartReason::AutoStarted);
    if let Err(e) = &restart_result {
        warn!(error = %e, "failed to restart agent service after reinstall");
    }

    reinstate_watchdog_as_safety_belt(base_dir, control);

    restart_result.map_err(Into::into)
}

fn reinstate_watchdog_as_safety_belt(base_dir: &Path, control: &PlatformServiceControl) {
    let exe_path = base_dir.join(if cfg!(windows) { "watchdog.exe" } else { "watchdog" });
    match control.install(
        WATCHDOG_SVC_NAME,
        WATCHDOG_SVC_DISPLAY_NAME,
        WATCHDOG_SVC_DESCRIPTION,
        &exe_path.display().to_string(),
    ) {
        Ok(()) | Err(agent_watchdog::error::ServiceControlError::AlreadyExists { .. }) => {}
        Err(e) => warn!(error = %e, "failed to install {WATCHDOG_SVC_DISPLAY_NAME}"),
    }

    match control.start(WATCHDOG_SVC_NAME, StartReason::AutoStarted) {
        Ok(()) => {}
        Err(e) => warn!(error = %e, "failed to start {WATCHDOG_SVC_DISPLAY_NAME}"),
    }
}
