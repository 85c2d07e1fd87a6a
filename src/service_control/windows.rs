//! Windows Service Control Manager adapter, grounded on the original
//! agent's `service_control_windows.go` (itself built on
//! `golang.org/x/sys/windows/svc/mgr`). The Rust equivalent uses the
//! `windows-service` crate's `ServiceManager`/`Service` handles.

use windows_service::service::{
    ServiceAccess, ServiceErrorControl, ServiceInfo, ServiceStartType, ServiceState as WinServiceState,
    ServiceType,
};
use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

use super::{wait_for_state, ServiceControl, ServiceState, StartReason};
use crate::error::ServiceControlError;

pub struct WindowsServiceControl;

impl WindowsServiceControl {
    pub fn new() -> Self {
        Self
    }

    fn manager(&self, access: ServiceManagerAccess) -> Result<ServiceManager, ServiceControlError> {
        ServiceManager::local_computer(None::<&str>, access).map_err(|e| ServiceControlError::PlatformFailure {
            name: String::new(),
            message: e.to_string(),
        })
    }
}

impl Default for WindowsServiceControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceControl for WindowsServiceControl {
    fn install(&self, name: &str, display_name: &str, description: &str, exe_path: &str) -> Result<(), ServiceControlError> {
        let manager = self.manager(ServiceManagerAccess::CREATE_SERVICE)?;

        if manager
            .open_service(name, ServiceAccess::QUERY_STATUS)
            .is_ok()
        {
            return Err(ServiceControlError::AlreadyExists { name: name.to_string() });
        }

        let service_info = ServiceInfo {
            name: name.into(),
            display_name: display_name.into(),
            service_type: ServiceType::OWN_PROCESS,
            start_type: ServiceStartType::AutoStart,
            error_control: ServiceErrorControl::Normal,
            executable_path: exe_path.into(),
            launch_arguments: vec!["is".into(), "auto-started".into()],
            dependencies: vec![],
            account_name: None,
            account_password: None,
        };

        let service = manager
            .create_service(&service_info, ServiceAccess::CHANGE_CONFIG)
            .map_err(|e| platform_failure(name, e))?;
        service
            .set_description(description)
            .map_err(|e| platform_failure(name, e))?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), ServiceControlError> {
        let manager = self.manager(ServiceManagerAccess::CONNECT)?;
        let service = manager
            .open_service(name, ServiceAccess::DELETE)
            .map_err(|_| ServiceControlError::NotFound { name: name.to_string() })?;
        service.delete().map_err(|e| platform_failure(name, e))
    }

    fn start(&self, name: &str, reason: StartReason) -> Result<(), ServiceControlError> {
        let manager = self.manager(ServiceManagerAccess::CONNECT)?;
        let service = manager
            .open_service(name, ServiceAccess::START | ServiceAccess::QUERY_STATUS)
            .map_err(|_| ServiceControlError::NotFound { name: name.to_string() })?;
        service
            .start(&["is", reason.as_arg()])
            .map_err(|e| platform_failure(name, e))?;
        wait_for_state(name, ServiceState::Running, || self.query(name))
    }

    fn stop(&self, name: &str) -> Result<(), ServiceControlError> {
        let manager = self.manager(ServiceManagerAccess::CONNECT)?;
        let service = manager
            .open_service(name, ServiceAccess::STOP | ServiceAccess::QUERY_STATUS)
            .map_err(|_| ServiceControlError::NotFound { name: name.to_string() })?;
        service.stop().map_err(|e| platform_failure(name, e))?;
        wait_for_state(name, ServiceState::Stopped, || self.query(name))
    }

    fn query(&self, name: &str) -> Result<ServiceState, ServiceControlError> {
        let manager = self.manager(ServiceManagerAccess::CONNECT)?;
        let service = manager
            .open_service(name, ServiceAccess::QUERY_STATUS)
            .map_err(|_| ServiceControlError::NotFound { name: name.to_string() })?;
        let status = service.query_status().map_err(|e| platform_failure(name, e))?;
        Ok(match status.current_state {
            WinServiceState::Running => ServiceState::Running,
            WinServiceState::Stopped => ServiceState::Stopped,
            WinServiceState::StartPending => ServiceState::StartPending,
            WinServiceState::StopPending => ServiceState::StopPending,
            _ => ServiceState::Unknown,
        })
    }
}

fn platform_failure(name: &str, error: impl std::fmt::Display) -> ServiceControlError {
    ServiceControlError::PlatformFailure {
        name: name.to_string(),
        message: error.to_string(),
    }
}
