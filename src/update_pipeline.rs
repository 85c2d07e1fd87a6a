//! Update Pipeline: checks the control plane for a newer agent build,
//! downloads and verifies it, and hands it off to the helper-copy layer
//! for installation. Grounded on `checkForUpdates` in the original
//! `watchdog/updates.go`.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::api_client::ApiClient;
use crate::error::AppError;
use crate::helper_copy;
use crate::models::{UpdateDescriptor, Version};
use crate::service_discovery::ServiceDiscovery;

pub const UPDATES_SUBDIR: &str = "Updates";
const AGENT_PRODUCT: &str = "agent";

/// Runs one full update check-and-apply cycle. Errors are logged by the
/// caller's ticker rather than propagated, matching the original's
/// fire-and-forget `go func() { checkForUpdates() }()`.
pub async fn check_for_updates(
    base_dir: &Path,
    service_name: &str,
    api_client: &ApiClient,
    discovery: &dyn ServiceDiscovery,
    lifecycle_mutex: Arc<Mutex<()>>,
) -> Result<(), AppError> {
    let updates_dir = base_dir.join(UPDATES_SUBDIR);
    if updates_dir.exists() {
        tokio::fs::remove_dir_all(&updates_dir).await?;
    }

    let descriptor: UpdateDescriptor = api_client.get("/agent/version").await?;
    let latest = descriptor.version();

    let current = current_installed_version(service_name, discovery);
    info!(%current, %latest, "checked agent version against control plane");

    if !latest.is_newer_than(&current) {
        info!(%current, %latest, "no update needed");
        return Ok(());
    }

    info!(%latest, %current, "found newer agent version, downloading");
    tokio::fs::create_dir_all(&updates_dir).await?;
    let update_file_name = format!("{AGENT_PRODUCT}-{latest}");
    let update_path = updates_dir.join(&update_file_name);

    api_client.download(&descriptor.url, &update_path).await?;
    info!(path = %update_path.display(), "saved update file");

    verify_integrity(&update_path, &descriptor).await?;

    helper_copy::perform_command(
        base_dir,
        lifecycle_mutex,
        &["update", update_path.to_str().unwrap_or_default()],
    )
    .await
}

fn current_installed_version(service_name: &str, discovery: &dyn ServiceDiscovery) -> Version {
    match discovery.find_services(service_name) {
        Ok(services) => services
            .into_iter()
            .find_map(|s| Version::parse(&s.version).ok())
            .unwrap_or_else(Version::zero),
        Err(e) => {
            warn!(error = %e, "failed to discover current agent version, assuming none installed");
            Version::zero()
        }
    }
}

async fn verify_integrity(update_path: &Path, descriptor: &UpdateDescriptor) -> Result<(), AppError> {
    let bytes = tokio::fs::read(update_path).await?;
    let digest = md5::compute(&bytes);
    let actual = format!("{digest:x}");

    if actual != descriptor.md5 {
        error!(expected = %descriptor.md5, actual = %actual, "md5 mismatch, discarding update");
        let _ = tokio::fs::remove_file(update_path).await;
        return Err(AppError::IntegrityMismatch {
            path: update_path.display().to_string(),
            expected: descriptor.md5.clone(),
            actual,
        });
    }
    Ok(())
}
