//! Process supervisor: starts, stops and watches service processes.
//!
//! Each spawned process is owned by a single watcher task. The watcher runs
//! the stability window race (timer vs. early exit), commits the resulting
//! status into the registry, and afterwards keeps waiting for the process to
//! exit or for a kill request. The registry record only holds a
//! [`ProcessHandle`], i.e. the pid plus the channel to that watcher, so no two
//! components ever kill or wait the same child.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{ExitReason, FleetError, Result};

use super::registry::ServiceRegistry;
use super::types::ServiceStatus;

/// Default stability window.
pub const DEFAULT_STABILITY_WINDOW: Duration = Duration::from_secs(2);

/// Default number of stdout/stderr bytes kept per process.
pub const DEFAULT_CAPTURE_BYTES: usize = 64 * 1024;

/// How long to wait for the output pipes to drain after an early exit.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// ETXTBSY: the freshly extracted executable is still open for writing in a
/// concurrently forked child.
#[cfg(unix)]
const TEXT_FILE_BUSY: i32 = 26;
const SPAWN_ATTEMPTS: u32 = 5;

type KillReply = oneshot::Sender<io::Result<()>>;

/// Sending side of a watcher's kill channel.
pub(crate) type ProcessControl = mpsc::Sender<KillReply>;

/// A live process as seen from its registry record.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    control: ProcessControl,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn control(&self) -> ProcessControl {
        self.control.clone()
    }
}

#[cfg(test)]
impl ProcessHandle {
    /// A handle whose watcher is already gone.
    pub(crate) fn detached(pid: u32) -> Self {
        let (control, _) = mpsc::channel(1);
        Self { pid, control }
    }
}

/// Starts and stops the processes of registered services.
#[derive(Debug, Clone)]
pub struct Supervisor {
    registry: ServiceRegistry,
    stability_window: Duration,
    capture_bytes: usize,
}

impl Supervisor {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry,
            stability_window: DEFAULT_STABILITY_WINDOW,
            capture_bytes: DEFAULT_CAPTURE_BYTES,
        }
    }

    pub fn with_stability_window(mut self, window: Duration) -> Self {
        self.stability_window = window;
        self
    }

    pub fn with_capture_bytes(mut self, bytes: usize) -> Self {
        self.capture_bytes = bytes;
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Start a service and block until its stability window resolves.
    ///
    /// Returns `Ok(())` once the process has stayed alive for the whole window
    /// (record is `Running`). Any exit inside the window, including a clean
    /// exit with code 0, fails with [`FleetError::UnstableStart`] and leaves the
    /// record `Failed`.
    pub async fn start(&self, id: &str) -> Result<()> {
        let (executable, run) = self.registry.begin_start(id).await?;

        // From here on the run is owned by its watcher task, so dropping this
        // future cannot leave the record stuck in `Starting`.
        let (ready_tx, ready_rx) = oneshot::channel();
        let watcher = Watcher {
            id: id.to_string(),
            run,
            registry: self.registry.clone(),
            stability_window: self.stability_window,
            capture_bytes: self.capture_bytes,
        };
        tokio::spawn(watcher.launch(executable, ready_tx));

        ready_rx.await.unwrap_or_else(|_| {
            Err(FleetError::Io(io::Error::other(format!(
                "watcher for service {} exited before reporting",
                id
            ))))
        })
    }

    /// Forcibly terminate a service's process.
    ///
    /// Fails with `NoProcess` when the record owns no live process. On success
    /// the record is `Stopped`.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let control = self.registry.process_control(id).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        if control.send(reply_tx).await.is_err() {
            // The watcher already observed the exit.
            return Err(FleetError::NoProcess(id.to_string()));
        }
        match reply_rx.await {
            Ok(Ok(())) => {
                info!(service_id = %id, "Service process stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(FleetError::Io(e)),
            Err(_) => Err(FleetError::NoProcess(id.to_string())),
        }
    }

    /// Stop every service that still owns a process.
    pub async fn stop_all(&self) {
        for id in self.registry.ids_with_process().await {
            match self.stop(&id).await {
                Ok(()) | Err(FleetError::NoProcess(_)) => {}
                Err(e) => error!(service_id = %id, error = %e, "Failed to stop service"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

struct Watcher {
    id: String,
    run: u64,
    registry: ServiceRegistry,
    stability_window: Duration,
    capture_bytes: usize,
}

impl Watcher {
    /// Spawn the process, hand it to the record, then watch it.
    async fn launch(self, executable: PathBuf, ready_tx: oneshot::Sender<Result<()>>) {
        let child = match spawn_service(&executable).await {
            Ok(child) => child,
            Err(e) => {
                error!(service_id = %self.id, error = %e, "Failed to spawn service process");
                self.registry
                    .finish_run(&self.id, self.run, ServiceStatus::Failed)
                    .await;
                let _ = ready_tx.send(Err(FleetError::SpawnFailure {
                    id: self.id.clone(),
                    source: e,
                }));
                return;
            }
        };

        let pid = child.id().unwrap_or(0);
        info!(service_id = %self.id, pid, path = %executable.display(), "Service process spawned");

        let (control, kill_rx) = mpsc::channel(1);
        self.registry
            .attach_process(&self.id, self.run, ProcessHandle { pid, control })
            .await;
        self.watch(child, kill_rx, ready_tx).await;
    }

    async fn watch(
        self,
        mut child: Child,
        mut kill_rx: mpsc::Receiver<KillReply>,
        ready_tx: oneshot::Sender<Result<()>>,
    ) {
        let stdout = OutputCapture::spawn(child.stdout.take(), self.capture_bytes);
        let stderr = OutputCapture::spawn(child.stderr.take(), self.capture_bytes);

        let window = tokio::time::sleep(self.stability_window);
        tokio::pin!(window);

        // Stability window: exactly one branch commits the outcome.
        tokio::select! {
            status = child.wait() => {
                let exit = exit_reason(status);
                self.registry
                    .finish_run(&self.id, self.run, ServiceStatus::Failed)
                    .await;
                let stdout = stdout.contents().await;
                let stderr = stderr.contents().await;
                warn!(service_id = %self.id, exit = %exit, "Service exited during stability window");
                let _ = ready_tx.send(Err(FleetError::UnstableStart {
                    id: self.id.clone(),
                    exit,
                    stdout,
                    stderr,
                }));
                return;
            }
            Some(reply) = kill_rx.recv() => {
                let result = child.kill().await;
                self.registry
                    .finish_run(&self.id, self.run, ServiceStatus::Stopped)
                    .await;
                let _ = reply.send(result);
                let _ = ready_tx.send(Err(FleetError::UnstableStart {
                    id: self.id.clone(),
                    exit: ExitReason::Other("stopped during stability window".to_string()),
                    stdout: stdout.contents().await,
                    stderr: stderr.contents().await,
                }));
                return;
            }
            _ = &mut window => {
                self.registry.promote_running(&self.id, self.run).await;
                info!(service_id = %self.id, "Service is running");
                let _ = ready_tx.send(Ok(()));
            }
        }

        // Past the window an exit is normal operation, not a failure.
        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => info!(service_id = %self.id, status = %status, "Service process exited"),
                    Err(e) => error!(service_id = %self.id, error = %e, "Failed waiting on service process"),
                }
                self.registry
                    .finish_run(&self.id, self.run, ServiceStatus::Stopped)
                    .await;
            }
            Some(reply) = kill_rx.recv() => {
                let result = child.kill().await;
                self.registry
                    .finish_run(&self.id, self.run, ServiceStatus::Stopped)
                    .await;
                let _ = reply.send(result);
            }
        }
    }
}

fn exit_reason(status: io::Result<ExitStatus>) -> ExitReason {
    match status {
        Ok(status) => match status.code() {
            Some(code) => ExitReason::Code(code),
            None => ExitReason::Other(format!("terminated: {}", status)),
        },
        Err(e) => ExitReason::Other(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Mark the staged artifact runnable by its owner.
fn make_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

async fn spawn_service(executable: &Path) -> io::Result<Child> {
    make_executable(executable)?;

    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut cmd = Command::new(executable);
        if let Some(dir) = executable.parent() {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match cmd.spawn() {
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(TEXT_FILE_BUSY) && attempt < SPAWN_ATTEMPTS => {
                tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
            }
            other => return other,
        }
    }
}

// ---------------------------------------------------------------------------
// Output capture
// ---------------------------------------------------------------------------

/// Drains one output pipe for the life of the process, keeping only the
/// first `limit` bytes.
struct OutputCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl OutputCapture {
    fn spawn<R>(reader: Option<R>, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let task = reader.map(|mut reader| {
            let buf = Arc::clone(&buf);
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match reader.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let mut guard = buf.lock().unwrap_or_else(|e| e.into_inner());
                            let room = limit.saturating_sub(guard.len());
                            guard.extend_from_slice(&chunk[..n.min(room)]);
                        }
                    }
                }
            })
        });
        Self { buf, task }
    }

    /// Captured text, after giving the pipe a short grace period to reach EOF.
    async fn contents(self) -> String {
        if let Some(task) = self.task {
            let _ = tokio::time::timeout(OUTPUT_DRAIN_GRACE, task).await;
        }
        let guard = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&guard).trim().to_string()
    }
}
