//! Installer Runner: generates a short-lived wrapper script that
//! invokes the platform installer against a discovered target
//! directory, runs it synchronously, and relays its log. Grounded on
//! `createBatchFile`/`reinstallServices` in the original
//! `manager/manager.go`.

use std::path::Path;
use std::process::Command;

use tracing::{info, warn};

use crate::error::AppError;
use crate::service_discovery::{DiscoveredService, ServiceDiscovery};

#[cfg(windows)]
const WRAPPER_SCRIPT_NAME: &str = "reinstall.bat";
#[cfg(not(windows))]
const WRAPPER_SCRIPT_NAME: &str = "reinstall.sh";

/// Reinstalls the agent service by locating its current install
/// directory(ies) via service discovery and invoking the platform
/// installer against each, trying the next candidate on failure. This
/// mirrors the original's "hopefully there will only be one target
/// directory" loop.
pub fn reinstall(
    package_path: &Path,
    service_name: &str,
    discovery: &dyn ServiceDiscovery,
) -> Result<(), AppError> {
    let candidates = discovery
        .find_services(service_name)
        .map_err(AppError::ServiceControl)?;

    if candidates.is_empty() {
        return Err(AppError::subprocess(
            "reinstall",
            "could not find installed agent to determine target directory",
        ));
    }

    let mut last_error = None;
    for candidate in &candidates {
        let target_dir = target_dir_for(candidate);
        info!(target_dir, "attempting reinstall into discovered target dir");

        match run_installer(package_path, &target_dir) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(target_dir, error = %e, "failed to execute installer against target dir");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| AppError::subprocess("reinstall", "no target directory candidates succeeded")))
}

fn target_dir_for(service: &DiscoveredService) -> String {
    Path::new(&service.path)
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

fn run_installer(package_path: &Path, target_dir: &str) -> Result<(), AppError> {
    let installer_log_path = Path::new(target_dir).join("Logs").join("installer.log");
    let script_path = std::env::temp_dir().join(WRAPPER_SCRIPT_NAME);

    write_wrapper_script(&script_path, package_path, target_dir, &installer_log_path)?;

    let status = Command::new(&script_path)
        .status()
        .map_err(|e| AppError::subprocess(script_path.display().to_string(), e.to_string()));

    let _ = std::fs::remove_file(&script_path);

    let installer_output = std::fs::read_to_string(&installer_log_path);
    match installer_output {
        Ok(contents) => info!("contents of installer log:\n{contents}"),
        Err(e) => warn!(path = %installer_log_path.display(), error = %e, "failed to read installer log file"),
    }

    let status = status?;
    if !status.success() {
        return Err(AppError::subprocess(
            script_path.display().to_string(),
            format!("installer exited with status {status}"),
        ));
    }
    Ok(())
}

#[cfg(windows)]
fn write_wrapper_script(script_path: &Path, package_path: &Path, target_dir: &str, installer_log_path: &Path) -> Result<(), AppError> {
    let contents = format!(
        "msiexec /i \"{}\" INSTALLFOLDER=\"{}\" /qnlv /log \"{}\"\n",
        package_path.display(),
        target_dir,
        installer_log_path.display(),
    );
    std::fs::write(script_path, contents).map_err(AppError::Io)
}

#[cfg(not(windows))]
fn write_wrapper_script(script_path: &Path, package_path: &Path, target_dir: &str, installer_log_path: &Path) -> Result<(), AppError> {
    let contents = format!(
        "#!/bin/sh\nset -e\ntar -xzf \"{}\" -C \"{}\" > \"{}\" 2>&1\n",
        package_path.display(),
        target_dir,
        installer_log_path.display(),
    );
    std::fs::write(script_path, contents)?;
    let mut perms = std::fs::metadata(script_path)?.permissions();
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(0o755);
    std::fs::set_permissions(script_path, perms)?;
    Ok(())
}
