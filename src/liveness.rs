//! Liveness Monitor: restarts the managed service if it has stopped
//! and was not deliberately commanded to stop. Grounded on the
//! `tickAlive` branch of `Execute` in the original `watchdog/watchdog.go`.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::models::CommandKind;
use crate::service_control::{ServiceControl, ServiceState, StartReason};

/// Queries the managed service's state and restarts it if stopped,
/// unless `last_performed` was a deliberate `stop`.
pub async fn check_liveness(
    service_name: &str,
    service_control: &dyn ServiceControl,
    lifecycle_mutex: Arc<Mutex<()>>,
    last_performed: Option<&CommandKind>,
) {
    if matches!(last_performed, Some(CommandKind::Stop)) {
        info!(service = service_name, "skipped liveness check, service is commanded to be stopped");
        return;
    }

    let state = match service_control.query(service_name) {
        Ok(state) => state,
        Err(e) => {
            error!(service = service_name, error = %e, "failed to query service status");
            return;
        }
    };

    if state == ServiceState::Stopped {
        let _guard = lifecycle_mutex.lock().await;
        match service_control.start(service_name, StartReason::AutoStarted) {
            Ok(()) => warn!(service = service_name, "found service in stopped state, restarted it"),
            Err(e) => error!(service = service_name, error = %e, "failed to restart stopped service"),
        }
    } else {
        info!(service = service_name, ?state, "service is still alive");
    }
}
