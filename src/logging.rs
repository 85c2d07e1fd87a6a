//! Logging setup: structured `tracing` output to stderr plus a
//! size-rotated file sink under `Logs/`, matching the rotation policy
//! (10MB per file, 10 backups) the original agent's `lumberjack`-backed
//! logger used. `tracing-appender`'s built-in rolling writer only
//! rotates by time, so the size policy is implemented directly here;
//! `tracing-appender::non_blocking` is still used to keep file writes
//! off the logging hot path.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::api_client::ApiClient;

const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_BACKUPS: u32 = 10;

/// Installs a global `tracing` subscriber writing to stderr and to a
/// size-rotating file under `logs_dir`. Returns a guard; dropping it
/// flushes buffered writes, matching the teacher's `main.rs` pattern of
/// holding a guard for the lifetime of `main`. The returned
/// [`RemoteLogLayer`] is registered but inert until [`RemoteLogLayer::activate`]
/// is called, so remote forwarding only starts once a license has been
/// confirmed valid.
pub fn init(logs_dir: &Path, log_file_name: &str, default_filter: &str) -> io::Result<(RotatingFileGuard, Arc<RemoteLogLayer>)> {
    std::fs::create_dir_all(logs_dir)?;
    let writer = RotatingWriter::new(logs_dir.join(log_file_name))?;
    let (non_blocking_writer, worker_guard) = tracing_appender::non_blocking(writer);
    let remote_layer = RemoteLogLayer::new();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking_writer).with_ansi(false))
        .with(Arc::clone(&remote_layer))
        .init();

    Ok((RotatingFileGuard(worker_guard), remote_layer))
}

/// Forwards log lines to the control plane once activated. Inert (a
/// pure no-op `on_event`) until a license has been confirmed valid,
/// mirroring the gated Splunk forwarder in the original's
/// `setupSplunkLogger`, generalized here to the same control plane the
/// rest of the agent already talks to rather than a vendor-specific
/// transport.
pub struct RemoteLogLayer {
    sender: Mutex<Option<tokio::sync::mpsc::UnboundedSender<String>>>,
}

impl RemoteLogLayer {
    fn new() -> Arc<Self> {
        Arc::new(Self { sender: Mutex::new(None) })
    }

    /// Starts forwarding subsequent log lines to `api_client`. Spawns a
    /// background task that batches and PUTs lines on a best-effort
    /// basis; forwarding failures are logged at `warn` and never
    /// propagate to the caller.
    pub fn activate(self: &Arc<Self>, api_client: ApiClient, owner: String) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        tokio::spawn(forward_loop(api_client, owner, rx));
    }
}

impl<S> tracing_subscriber::Layer<S> for RemoteLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let sender = self.sender.lock().unwrap();
        let Some(tx) = sender.as_ref() else { return };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = format!(
            "{} {} {}",
            event.metadata().level(),
            event.metadata().target(),
            visitor.message
        );
        let _ = tx.send(line);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

#[derive(serde::Serialize)]
struct LogBatch<'a> {
    owner: &'a str,
    lines: &'a [String],
}

const REMOTE_LOG_BATCH_SIZE: usize = 20;

async fn forward_loop(api_client: ApiClient, owner: String, mut rx: tokio::sync::mpsc::UnboundedReceiver<String>) {
    let mut batch = Vec::with_capacity(REMOTE_LOG_BATCH_SIZE);
    loop {
        let received = rx.recv().await;
        let Some(line) = received else { break };
        batch.push(line);
        while batch.len() < REMOTE_LOG_BATCH_SIZE {
            match rx.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }

        let payload = LogBatch { owner: &owner, lines: &batch };
        if let Err(e) = api_client.put_json("/logs", &payload).await {
            tracing::warn!(error = %e, "failed to forward log batch to control plane");
        }
        batch.clear();
    }
}

/// Holds the subscriber's file writer alive for the process lifetime.
pub struct RotatingFileGuard(#[allow(dead_code)] WorkerGuard);

#[derive(Clone)]
struct RotatingWriter {
    inner: std::sync::Arc<Mutex<RotatingWriterInner>>,
}

struct RotatingWriterInner {
    path: PathBuf,
    file: File,
    written: u64,
}

impl RotatingWriter {
    fn new(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            inner: std::sync::Arc::new(Mutex::new(RotatingWriterInner { path, file, written })),
        })
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        if inner.written + buf.len() as u64 > MAX_FILE_BYTES {
            inner.rotate()?;
        }
        let n = inner.file.write(buf)?;
        inner.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap().file.flush()
    }
}

impl RotatingWriterInner {
    fn rotate(&mut self) -> io::Result<()> {
        for index in (1..MAX_BACKUPS).rev() {
            let src = backup_path(&self.path, index);
            let dst = backup_path(&self.path, index + 1);
            if src.exists() {
                let _ = std::fs::rename(&src, &dst);
            }
        }
        if self.path.exists() {
            let _ = std::fs::rename(&self.path, backup_path(&self.path, 1));
        }
        self.file = OpenOptions::new().create(true).append(true).truncate(false).open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

fn backup_path(path: &Path, index: u32) -> PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("log");
    path.with_file_name(format!("{file_name}.{index}"))
}
