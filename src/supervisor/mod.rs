//! Supervisor Loop: the watchdog's long-running core, combining three
//! independent tickers (update check, command check, liveness check)
//! behind a single cancellation-aware select loop. Grounded on
//! `Execute` in the original `watchdog/watchdog.go`, re-architected per
//! the design notes to replace package-level globals with a bundled
//! context struct.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api_client::ApiClient;
use crate::command_dispatcher::CommandDispatcher;
use crate::config::AgentConfig;
use crate::service_control::ServiceControl;
use crate::service_discovery::ServiceDiscovery;
use crate::{liveness, update_pipeline};

/// Matches the original's `updateTimer`.
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(3 * 60);
/// Matches the original's `commandTimer`.
pub const COMMAND_INTERVAL: Duration = Duration::from_secs(2 * 60);
/// Matches the original's `aliveTimer`.
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Upper bound on how long shutdown waits for an in-flight tick before
/// giving up; must stay well under [`crate::service_control::TRANSITION_TIMEOUT`]
/// so the service manager never sees the watchdog as hung.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Bundles everything the three tickers need, replacing the original's
/// package-level mutable globals (`baseFolder`, `agentSvcMutex`,
/// `pws.lastPerformedCommand`) with explicit shared state.
pub struct SupervisorContext {
    pub base_dir: PathBuf,
    pub hostname: String,
    pub api_client: ApiClient,
    pub service_control: Arc<dyn ServiceControl + Send + Sync>,
    pub service_discovery: Arc<dyn ServiceDiscovery + Send + Sync>,
    pub lifecycle_mutex: Arc<Mutex<()>>,
    pub dispatcher: Arc<CommandDispatcher>,
    update_busy: Arc<AtomicBool>,
    command_busy: Arc<AtomicBool>,
    liveness_busy: Arc<AtomicBool>,
}

impl SupervisorContext {
    pub fn new(
        base_dir: PathBuf,
        hostname: String,
        config: &AgentConfig,
        service_control: Arc<dyn ServiceControl + Send + Sync>,
        service_discovery: Arc<dyn ServiceDiscovery + Send + Sync>,
    ) -> Result<Self, crate::error::AppError> {
        let api_client = ApiClient::new(
            config.webservice.endpoint.clone(),
            config.license_key.clone(),
            config.proxy_url(),
        )
        .map_err(crate::error::AppError::Api)?;

        Ok(Self {
            base_dir,
            hostname,
            api_client,
            service_control,
            service_discovery,
            lifecycle_mutex: Arc::new(Mutex::new(())),
            dispatcher: Arc::new(CommandDispatcher::new()),
            update_busy: Arc::new(AtomicBool::new(false)),
            command_busy: Arc::new(AtomicBool::new(false)),
            liveness_busy: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Runs the supervisor loop until `shutdown` is cancelled, then waits
/// up to [`SHUTDOWN_GRACE`] for in-flight ticks to settle before
/// returning.
pub async fn run(ctx: Arc<SupervisorContext>, shutdown: CancellationToken) {
    let mut update_ticker = interval(UPDATE_INTERVAL);
    let mut command_ticker = interval(COMMAND_INTERVAL);
    let mut liveness_ticker = interval(LIVENESS_INTERVAL);

    info!("supervisor loop starting");

    loop {
        tokio::select! {
            _ = update_ticker.tick() => spawn_update_check(Arc::clone(&ctx)),
            _ = command_ticker.tick() => spawn_command_check(Arc::clone(&ctx)),
            _ = liveness_ticker.tick() => spawn_liveness_check(Arc::clone(&ctx)),
            _ = shutdown.cancelled() => {
                info!("shutdown requested, waiting up to {:?} for in-flight ticks", SHUTDOWN_GRACE);
                if !wait_for_idle(&ctx, SHUTDOWN_GRACE).await {
                    warn!("a tick was still running after the shutdown grace period, forcing exit");
                    std::process::exit(1);
                }
                break;
            }
        }
    }

    info!("supervisor loop stopped");
}

/// Polls the busy flags until all are clear or `grace` elapses. Returns
/// `true` if the supervisor went idle in time, `false` if the deadline
/// was hit with a tick still running. Callers must force-exit in that
/// case, since a stuck `spawn_blocking` task (e.g. a hung installer)
/// would otherwise block the runtime's shutdown indefinitely.
async fn wait_for_idle(ctx: &SupervisorContext, grace: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let idle = !ctx.update_busy.load(Ordering::SeqCst)
            && !ctx.command_busy.load(Ordering::SeqCst)
            && !ctx.liveness_busy.load(Ordering::SeqCst);
        if idle {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Spawns an update check, skipping it entirely if the previous one is
/// still running rather than queueing up a pile of overlapping checks.
fn spawn_update_check(ctx: Arc<SupervisorContext>) {
    if ctx.update_busy.swap(true, Ordering::SeqCst) {
        warn!("skipped update check tick, previous one still running");
        return;
    }
    tokio::spawn(async move {
        if let Err(e) = update_pipeline::check_for_updates(
            &ctx.base_dir,
            crate::AGENT_SVC_NAME,
            &ctx.api_client,
            ctx.service_discovery.as_ref(),
            Arc::clone(&ctx.lifecycle_mutex),
        )
        .await
        {
            warn!(error = %e, "update check failed");
        }
        ctx.update_busy.store(false, Ordering::SeqCst);
    });
}

fn spawn_command_check(ctx: Arc<SupervisorContext>) {
    if ctx.command_busy.swap(true, Ordering::SeqCst) {
        warn!("skipped command check tick, previous one still running");
        return;
    }
    tokio::spawn(async move {
        let dispatcher = Arc::clone(&ctx.dispatcher);
        match dispatcher
            .check_for_command(
                &ctx.base_dir,
                &ctx.hostname,
                &ctx.api_client,
                ctx.service_control.as_ref(),
                crate::AGENT_SVC_NAME,
                Arc::clone(&ctx.lifecycle_mutex),
            )
            .await
        {
            Ok(()) => {}
            Err(e) => warn!(error = %e, "command check failed"),
        }
        ctx.command_busy.store(false, Ordering::SeqCst);
    });
}

fn spawn_liveness_check(ctx: Arc<SupervisorContext>) {
    if ctx.liveness_busy.swap(true, Ordering::SeqCst) {
        warn!("skipped liveness check tick, previous one still running");
        return;
    }
    tokio::spawn(async move {
        let last_kind = ctx.dispatcher.last_kind().await;
        liveness::check_liveness(
            crate::AGENT_SVC_NAME,
            ctx.service_control.as_ref(),
            Arc::clone(&ctx.lifecycle_mutex),
            last_kind.as_ref(),
        )
        .await;
        ctx.liveness_busy.store(false, Ordering::SeqCst);
    });
}
