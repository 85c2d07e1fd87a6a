//! Command Dispatcher: polls the control plane for the most recent
//! command targeted at this host and performs it at most once.
//! Grounded on `checkForCommand`/`performGetConfig` in the original
//! `watchdog/commands.go`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use urlencoding::encode;

use crate::api_client::ApiClient;
use crate::config::{self, AgentConfig};
use crate::error::AppError;
use crate::helper_copy;
use crate::models::{Command, CommandKind, LicenseData};
use crate::service_control::{ServiceControl, ServiceState, StartReason};

/// A command older than this relative to "now" is considered stale and
/// is silently ignored, so a host that was offline for a while doesn't
/// replay an out-of-date instruction the moment it reconnects.
const COMMAND_FRESHNESS_HORIZON: ChronoDuration = ChronoDuration::minutes(7);

/// License validity checks against a candidate config's endpoint get a
/// shorter timeout than ordinary requests (§5), so a candidate pointing
/// at a dead endpoint can't stall GET-CONFIG for a full 30s.
const LICENSE_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracks the most recently performed command so repeated polls of the
/// same still-current command are no-ops.
pub struct CommandDispatcher {
    last_performed: Mutex<Option<Command>>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self {
            last_performed: Mutex::new(None),
        }
    }

    /// Returns the kind of the most recently performed command, if any,
    /// so the Liveness Monitor can honor an operator-issued `stop`.
    pub async fn last_kind(&self) -> Option<CommandKind> {
        self.last_performed.lock().await.as_ref().map(|c| c.cmd.clone())
    }

    /// Polls for and, if fresh and not already performed, executes the
    /// most recent command for `hostname`.
    pub async fn check_for_command(
        &self,
        base_dir: &Path,
        hostname: &str,
        api_client: &ApiClient,
        service_control: &dyn ServiceControl,
        agent_service_name: &str,
        lifecycle_mutex: Arc<Mutex<()>>,
    ) -> Result<(), AppError> {
        let path = format!("/command?hostname={}", encode(hostname));
        let command: Command = api_client.get(&path).await?;
        debug!(?command, "recent command response");

        {
            let last = self.last_performed.lock().await;
            if last.as_ref() == Some(&command) {
                debug!(cmd = %command.cmd, "command has already been performed");
                return Ok(());
            }
        }

        if !is_fresh(&command.ts) {
            debug!(cmd = %command.cmd, ts = %command.ts, "command is not recent enough, ignoring");
            return Ok(());
        }

        self.perform(base_dir, hostname, api_client, service_control, agent_service_name, lifecycle_mutex, &command)
            .await?;

        *self.last_performed.lock().await = Some(command);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn perform(
        &self,
        base_dir: &Path,
        hostname: &str,
        api_client: &ApiClient,
        service_control: &dyn ServiceControl,
        agent_service_name: &str,
        lifecycle_mutex: Arc<Mutex<()>>,
        command: &Command,
    ) -> Result<(), AppError> {
        info!(cmd = %command.cmd, "performing command");
        match &command.cmd {
            CommandKind::Start => helper_copy::perform_command(base_dir, lifecycle_mutex, &["start"]).await,
            CommandKind::Stop => helper_copy::perform_command(base_dir, lifecycle_mutex, &["stop"]).await,
            CommandKind::GetConfig => {
                perform_get_config_then_put(base_dir, hostname, api_client, service_control, agent_service_name, lifecycle_mutex).await
            }
            CommandKind::PutConfig => perform_put_config(base_dir, hostname, api_client).await,
            CommandKind::Unknown(kind) => {
                error!(%kind, "unknown command received");
                Err(AppError::UnknownCommand { kind: kind.clone() })
            }
        }
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn is_fresh(ts: &str) -> bool {
    match DateTime::parse_from_rfc3339(ts) {
        Ok(parsed) => {
            let parsed: DateTime<Utc> = parsed.with_timezone(&Utc);
            parsed + COMMAND_FRESHNESS_HORIZON >= Utc::now()
        }
        Err(e) => {
            warn!(ts, error = %e, "failed to parse command timestamp, treating as stale");
            false
        }
    }
}

/// Runs GetConfigFlow, then unconditionally follows with PutConfigFlow
/// so the control plane's editor always reflects what is actually
/// applied on disk, and restarts the managed service under the
/// lifecycle mutex if it was running before the swap. The GET-CONFIG
/// outcome, not the PUT-CONFIG one, is what is reported to the caller.
async fn perform_get_config_then_put(
    base_dir: &Path,
    hostname: &str,
    api_client: &ApiClient,
    service_control: &dyn ServiceControl,
    agent_service_name: &str,
    lifecycle_mutex: Arc<Mutex<()>>,
) -> Result<(), AppError> {
    let was_running = matches!(service_control.query(agent_service_name), Ok(ServiceState::Running));

    let get_result = perform_get_config(base_dir, hostname, api_client).await;

    if let Err(e) = perform_put_config(base_dir, hostname, api_client).await {
        warn!(error = %e, "failed to re-upload config after GET-CONFIG");
    }

    if was_running {
        let _guard = lifecycle_mutex.lock().await;
        if let Err(e) = service_control.stop(agent_service_name) {
            warn!(service = agent_service_name, error = %e, "failed to stop service for config restart");
        }
        if let Err(e) = service_control.start(agent_service_name, StartReason::AutoStarted) {
            warn!(service = agent_service_name, error = %e, "failed to restart service after config swap");
        }
    }

    get_result
}

/// Downloads the control plane's current config, validates its license,
/// and atomically replaces the agent's own config file with it.
async fn perform_get_config(base_dir: &Path, hostname: &str, api_client: &ApiClient) -> Result<(), AppError> {
    info!("acquiring remote config");
    let incoming_dir = base_dir.join("incoming-config");
    let destination = incoming_dir.join("Config.yml");

    let path = format!("/config?hostname={}", encode(hostname));
    let result = download_and_apply(base_dir, api_client, &path, &destination).await;

    if let Err(e) = tokio::fs::remove_dir_all(&incoming_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, "failed to clean up incoming-config directory");
        }
    }
    result
}

async fn download_and_apply(base_dir: &Path, api_client: &ApiClient, path: &str, destination: &Path) -> Result<(), AppError> {
    api_client.download(path, destination).await?;

    let new_config = AgentConfig::load_from(destination)?;
    if !license_is_valid(&new_config).await? {
        error!(path = %destination.display(), "license is invalid in new config file");
        return Err(AppError::LicenseInvalid {
            endpoint: new_config.webservice.endpoint.clone(),
        });
    }

    let current_path = config::config_path(base_dir);
    config::atomically_replace(destination, &current_path)?;
    info!("successfully acquired and applied remote config file");
    Ok(())
}

/// Checks license validity against the *candidate* config's own
/// endpoint and license key, not the currently-applied one, so a
/// candidate pointing at a different (possibly invalid) control plane
/// is actually exercised rather than accepted on the strength of the
/// endpoint already in use.
async fn license_is_valid(candidate: &AgentConfig) -> Result<bool, AppError> {
    let candidate_client = ApiClient::with_timeout(
        candidate.webservice.endpoint.clone(),
        candidate.license_key.clone(),
        candidate.proxy_url(),
        LICENSE_CHECK_TIMEOUT,
    )
    .map_err(AppError::Api)?;
    let license: LicenseData = candidate_client.get("/license").await?;
    Ok(license.valid)
}

/// Uploads the agent's own current config file to the control plane.
async fn perform_put_config(base_dir: &Path, hostname: &str, api_client: &ApiClient) -> Result<(), AppError> {
    info!("uploading agent's config file");
    let current_path = config::config_path(base_dir);
    let path = format!("/config?hostname={}", encode(hostname));
    api_client.upload(&path, &current_path).await?;
    info!(path = %current_path.display(), "successfully uploaded agent's config file");
    Ok(())
}
