//! Service-Control Adapter: install/remove/start/stop/query the managed
//! service through whatever the host platform's service manager is.
//!
//! The transition timeout here must stay comfortably larger than the
//! supervisor's own shutdown guard (see `supervisor::SHUTDOWN_GRACE`):
//! a stop that legitimately takes longer than the shutdown guard but
//! less than this timeout should never be mistaken for a hang.

use std::time::Duration;

use crate::error::ServiceControlError;

#[cfg(windows)]
mod windows;
#[cfg(not(windows))]
mod unix;

#[cfg(windows)]
pub use self::windows::WindowsServiceControl as PlatformServiceControl;
#[cfg(not(windows))]
pub use self::unix::SystemdServiceControl as PlatformServiceControl;

pub const TRANSITION_TIMEOUT: Duration = Duration::from_secs(30);
pub const TRANSITION_POLL_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopped,
    StartPending,
    StopPending,
    Unknown,
}

/// How the managed service was most recently started, mirrored as the
/// `is` argument the service passes itself on the way up (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReason {
    AutoStarted,
    ManualStarted,
}

impl StartReason {
    pub fn as_arg(self) -> &'static str {
        match self {
            StartReason::AutoStarted => "auto-started",
            StartReason::ManualStarted => "manual-started",
        }
    }
}

/// Platform-independent surface every Service-Control Adapter implements.
pub trait ServiceControl {
    fn install(&self, name: &str, display_name: &str, description: &str, exe_path: &str) -> Result<(), ServiceControlError>;
    fn remove(&self, name: &str) -> Result<(), ServiceControlError>;
    fn start(&self, name: &str, reason: StartReason) -> Result<(), ServiceControlError>;
    fn stop(&self, name: &str) -> Result<(), ServiceControlError>;
    fn query(&self, name: &str) -> Result<ServiceState, ServiceControlError>;
}

/// Blocks until `query` reports `expected`, polling at
/// [`TRANSITION_POLL_INTERVAL`] and failing after [`TRANSITION_TIMEOUT`].
pub(crate) fn wait_for_state<F>(name: &str, expected: ServiceState, mut query: F) -> Result<(), ServiceControlError>
where
    F: FnMut() -> Result<ServiceState, ServiceControlError>,
{
    let deadline = std::time::Instant::now() + TRANSITION_TIMEOUT;
    loop {
        let state = query()?;
        if state == expected {
            return Ok(());
        }
        if std::time::Instant::now() >= deadline {
            return Err(ServiceControlError::TransitionTimeout {
                name: name.to_string(),
                expected: format!("{expected:?}"),
                timeout_secs: TRANSITION_TIMEOUT.as_secs(),
            });
        }
        std::thread::sleep(TRANSITION_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn wait_for_state_succeeds_once_query_matches() {
        let calls = RefCell::new(0);
        let result = wait_for_state("svc", ServiceState::Running, || {
            *calls.borrow_mut() += 1;
            if *calls.borrow() < 3 {
                Ok(ServiceState::StartPending)
            } else {
                Ok(ServiceState::Running)
            }
        });
        assert!(result.is_ok());
        assert_eq!(*calls.borrow(), 3);
    }

    #[test]
    fn start_reason_maps_to_expected_cli_args() {
        assert_eq!(StartReason::AutoStarted.as_arg(), "auto-started");
        assert_eq!(StartReason::ManualStarted.as_arg(), "manual-started");
    }
}
