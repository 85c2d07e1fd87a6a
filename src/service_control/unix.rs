//! systemd adapter used on non-Windows hosts. No equivalent exists in
//! the original agent (Windows-only); grounded on the `run_systemctl`
//! helper in the Atlas-Launcher runner daemon, which shells out to
//! `systemctl` and treats a non-zero exit as a platform failure.

use std::process::Command;

use super::{wait_for_state, ServiceControl, ServiceState, StartReason};
use crate::error::ServiceControlError;

pub struct SystemdServiceControl;

impl SystemdServiceControl {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemdServiceControl {
    fn default() -> Self {
        Self::new()
    }
}

fn unit_name(name: &str) -> String {
    if name.ends_with(".service") {
        name.to_string()
    } else {
        format!("{name}.service")
    }
}

fn run_systemctl(name: &str, args: &[&str]) -> Result<String, ServiceControlError> {
    let output = Command::new("systemctl")
        .args(args)
        .output()
        .map_err(|e| ServiceControlError::PlatformFailure {
            name: name.to_string(),
            message: format!("failed to execute systemctl {args:?}: {e}"),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(ServiceControlError::PlatformFailure {
        name: name.to_string(),
        message: format!("systemctl {args:?} failed (status={}): {}", output.status, stderr.trim()),
    })
}

impl ServiceControl for SystemdServiceControl {
    fn install(&self, name: &str, display_name: &str, description: &str, exe_path: &str) -> Result<(), ServiceControlError> {
        let unit = unit_name(name);
        let unit_path = format!("/etc/systemd/system/{unit}");
        if std::path::Path::new(&unit_path).exists() {
            return Err(ServiceControlError::AlreadyExists { name: name.to_string() });
        }
        let contents = format!(
            "[Unit]\nDescription={description}\n\n[Service]\nExecStart={exe_path} is auto-started\nRestart=on-failure\n\n[Install]\nWantedBy=multi-user.target\n",
        );
        std::fs::write(&unit_path, contents).map_err(|e| ServiceControlError::PlatformFailure {
            name: name.to_string(),
            message: format!("failed to write unit file for {display_name}: {e}"),
        })?;
        run_systemctl(name, &["daemon-reload"])?;
        run_systemctl(name, &["enable", &unit])?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), ServiceControlError> {
        let unit = unit_name(name);
        run_systemctl(name, &["disable", &unit])?;
        let unit_path = format!("/etc/systemd/system/{unit}");
        std::fs::remove_file(&unit_path).map_err(|e| ServiceControlError::PlatformFailure {
            name: name.to_string(),
            message: format!("failed to remove unit file: {e}"),
        })?;
        run_systemctl(name, &["daemon-reload"])?;
        Ok(())
    }

    fn start(&self, name: &str, _reason: StartReason) -> Result<(), ServiceControlError> {
        let unit = unit_name(name);
        run_systemctl(name, &["start", &unit])?;
        wait_for_state(name, ServiceState::Running, || self.query(name))
    }

    fn stop(&self, name: &str) -> Result<(), ServiceControlError> {
        let unit = unit_name(name);
        run_systemctl(name, &["stop", &unit])?;
        wait_for_state(name, ServiceState::Stopped, || self.query(name))
    }

    fn query(&self, name: &str) -> Result<ServiceState, ServiceControlError> {
        let unit = unit_name(name);
        let output = Command::new("systemctl")
            .args(["is-active", &unit])
            .output()
            .map_err(|e| ServiceControlError::PlatformFailure {
                name: name.to_string(),
                message: format!("failed to execute systemctl is-active: {e}"),
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(match stdout.trim() {
            "active" => ServiceState::Running,
            "inactive" | "failed" => ServiceState::Stopped,
            "activating" => ServiceState::StartPending,
            "deactivating" => ServiceState::StopPending,
            _ => ServiceState::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_name_appends_suffix_when_missing() {
        assert_eq!(unit_name("palette-agent"), "palette-agent.service");
        assert_eq!(unit_name("palette-agent.service"), "palette-agent.service");
    }
}
