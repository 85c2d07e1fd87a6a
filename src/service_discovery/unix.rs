//! Unix fallback discovery: no WMI equivalent exists outside Windows,
//! so this probes the managed executable directly via `--version`
//! (the same probe the Atlas-Launcher runner daemon uses to read back
//! what is actually installed) rather than querying a service
//! database.

use std::process::Command;

use super::{DiscoveredService, ServiceDiscovery};
use crate::error::ServiceControlError;

pub struct ExeMetadataServiceDiscovery {
    search_paths: Vec<String>,
}

impl ExeMetadataServiceDiscovery {
    pub fn new() -> Self {
        Self {
            search_paths: vec!["/usr/local/bin".into(), "/usr/bin".into(), "/opt".into()],
        }
    }

    pub fn with_search_paths(search_paths: Vec<String>) -> Self {
        Self { search_paths }
    }
}

impl Default for ExeMetadataServiceDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceDiscovery for ExeMetadataServiceDiscovery {
    fn find_services(&self, name_like: &str) -> Result<Vec<DiscoveredService>, ServiceControlError> {
        let mut discovered = Vec::new();
        let mut last_error = None;

        for root in &self.search_paths {
            let candidate = std::path::Path::new(root).join(name_like);
            if !candidate.exists() {
                continue;
            }
            match probe_version(&candidate) {
                Ok(version) => discovered.push(DiscoveredService {
                    path: candidate.display().to_string(),
                    version,
                }),
                Err(e) => last_error = Some(e),
            }
        }

        if discovered.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        Ok(discovered)
    }
}

fn probe_version(path: &std::path::Path) -> Result<String, ServiceControlError> {
    let output = Command::new(path).arg("--version").output().map_err(|e| ServiceControlError::PlatformFailure {
        name: path.display().to_string(),
        message: format!("failed to probe version: {e}"),
    })?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text.trim().to_string())
}
