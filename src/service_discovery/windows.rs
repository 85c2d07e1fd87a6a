//! WMI-backed discovery, grounded on the original's
//! `services-discovery.go` (`github.com/StackExchange/wmi` queries
//! against `Win32_Service` and `CIM_DataFile`). The Rust `wmi` crate
//! gives the same COM-query-into-struct shape via serde.

use serde::Deserialize;
use wmi::{COMLibrary, WMIConnection};

use super::{strip_path_name, DiscoveredService, ServiceDiscovery};
use crate::error::ServiceControlError;

#[derive(Debug, Deserialize)]
#[serde(rename = "Win32_Service")]
#[allow(non_snake_case)]
struct Win32Service {
    Name: String,
    PathName: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "CIM_DataFile")]
#[allow(non_snake_case)]
struct CimDataFile {
    Version: String,
}

pub struct WmiServiceDiscovery;

impl WmiServiceDiscovery {
    pub fn new() -> Self {
        Self
    }

    fn connection(&self) -> Result<WMIConnection, ServiceControlError> {
        let com = COMLibrary::new().map_err(wmi_failure)?;
        WMIConnection::new(com).map_err(wmi_failure)
    }
}

impl Default for WmiServiceDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceDiscovery for WmiServiceDiscovery {
    fn find_services(&self, name_like: &str) -> Result<Vec<DiscoveredService>, ServiceControlError> {
        let connection = self.connection()?;

        let filter = format!("Name like '%{name_like}%'");
        let services: Vec<Win32Service> = connection
            .filtered_query(&[("Name", filter.as_str())].into_iter().collect())
            .map_err(wmi_failure)?;

        let mut discovered = Vec::new();
        for service in services {
            let path = strip_path_name(&service.PathName);
            let version = self.file_version(&connection, &path).unwrap_or_default();
            discovered.push(DiscoveredService { path, version });
        }
        Ok(discovered)
    }
}

impl WmiServiceDiscovery {
    fn file_version(&self, connection: &WMIConnection, path: &str) -> Option<String> {
        let (drive, dir, executable) = split_windows_path(path);
        let filter = format!(
            "Drive=\"{drive}\" and Path='{dir}' and Name like '%{executable}%'",
        );
        let results: Vec<CimDataFile> = connection
            .filtered_query(&[("__fake__", filter.as_str())].into_iter().collect())
            .ok()?;
        results.into_iter().next().map(|f| f.Version)
    }
}

fn split_windows_path(path: &str) -> (String, String, String) {
    let drive = path.split(':').next().map(|d| format!("{d}:")).unwrap_or_default();
    let rest = path.splitn(2, ':').nth(1).unwrap_or(path);
    let dir = rest.rsplit_once(['\\', '/']).map(|(d, _)| d).unwrap_or("");
    let executable = rest.rsplit_once(['\\', '/']).map(|(_, f)| f).unwrap_or(rest);
    (drive, dir.replace('\\', "\\\\"), executable.to_string())
}

fn wmi_failure(error: impl std::fmt::Display) -> ServiceControlError {
    ServiceControlError::PlatformFailure {
        name: String::new(),
        message: error.to_string(),
    }
}
