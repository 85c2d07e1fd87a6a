//! Helper-Copy Invocation Layer.
//!
//! The watchdog binary is itself a Windows service and therefore cannot
//! replace its own executable on disk while running. Privileged
//! one-shot operations (service start/stop, config apply, agent update)
//! are instead delegated to a short-lived copy of the `manager` binary,
//! invoked under the lifecycle mutex and deleted afterwards. Grounded
//! on `performCommand` in the original `watchdog/commands.go`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::AppError;

const MANAGER_BINARY: &str = if cfg!(windows) { "manager.exe" } else { "manager" };
const MANAGER_IN_ACTION: &str = if cfg!(windows) { "manager_in_action.exe" } else { "manager_in_action" };

/// Invokes the manager helper with `args`, serialized against
/// `lifecycle_mutex` so the agent's own start/stop commands never race
/// with an in-flight command or update.
pub async fn perform_command(base_dir: &Path, lifecycle_mutex: Arc<Mutex<()>>, args: &[&str]) -> Result<(), AppError> {
    let manager_path = base_dir.join(MANAGER_BINARY);
    let helper_path = base_dir.join(MANAGER_IN_ACTION);

    tokio::fs::copy(&manager_path, &helper_path).await.map_err(|e| {
        error!(error = %e, "failed to make copy of manager binary");
        AppError::Io(e)
    })?;

    let result = run_and_clean_up(&helper_path, args, lifecycle_mutex).await;

    debug!(path = %helper_path.display(), "deleting helper copy");
    if let Err(e) = tokio::fs::remove_file(&helper_path).await {
        error!(path = %helper_path.display(), error = %e, "failed to delete helper copy");
    }

    result
}

async fn run_and_clean_up(helper_path: &Path, args: &[&str], lifecycle_mutex: Arc<Mutex<()>>) -> Result<(), AppError> {
    info!(?args, "performing command via helper copy");
    let _guard = lifecycle_mutex.lock().await;

    let helper_path = helper_path.to_path_buf();
    let owned_args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let status = tokio::task::spawn_blocking(move || run_helper(&helper_path, &owned_args))
        .await
        .map_err(|e| AppError::subprocess("manager_in_action", format!("join error: {e}")))??;

    if !status.success() {
        return Err(AppError::subprocess(
            "manager_in_action",
            format!("exited with status {status}"),
        ));
    }

    info!(?args, "successfully performed command");
    Ok(())
}

fn run_helper(helper_path: &Path, args: &[String]) -> Result<std::process::ExitStatus, AppError> {
    Command::new(helper_path)
        .args(args)
        .status()
        .map_err(|e| AppError::subprocess(helper_path.display().to_string(), e.to_string()))
}
