//! Process supervisor - keeps one worker process alive and relays file changes to it
//!
//! The supervisor runs as a single event loop. Worker output, file changes and
//! control requests arrive over channels; the debounce window and the restart
//! backoff are optional deadlines polled by the same loop, so cancelling either
//! is just clearing it.

pub mod classify;
pub mod ipc;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::application::errors::SupervisorError;
use crate::infrastructure::config::SupervisorConfig;

pub use classify::{ChangeClassifier, ChangeKind};
pub use ipc::{SupervisorMessage, WorkerMessage};

/// Lifecycle of the supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Restarting,
    ShuttingDown,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::ShuttingDown => "shutting down",
        };
        f.write_str(name)
    }
}

/// Something that happened to the worker of a given generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEvent {
    pub generation: u64,
    pub kind: WorkerEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEventKind {
    Message(WorkerMessage),
    /// Exit code, `None` when killed by a signal
    Exited(Option<i32>),
}

/// Control side of a running worker
#[async_trait]
pub trait WorkerHandle: Send {
    fn id(&self) -> Option<u32>;

    /// Write one instruction to the worker
    async fn send(&mut self, message: &SupervisorMessage) -> Result<(), SupervisorError>;

    /// Ask the worker to stop, killing it after `timeout`.
    ///
    /// Returns true when it stopped on its own.
    async fn terminate(&mut self, timeout: Duration) -> Result<bool, SupervisorError>;
}

/// Spawns worker processes
pub trait WorkerLauncher: Send + Sync {
    /// Start a worker; its messages and exit are reported on `events`
    fn launch(
        &self,
        generation: u64,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerHandle>, SupervisorError>;
}

/// Keeps a filesystem watch alive; dropping it stops the watch
pub type WatchGuard = Box<dyn Send>;

/// Produces changed paths
pub trait ChangeSource: Send + Sync {
    fn watch(&self, changes: mpsc::UnboundedSender<PathBuf>) -> Result<Vec<WatchGuard>, SupervisorError>;
}

/// Supervisor timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub debounce: Duration,
    pub restart_delay: Duration,
    pub kill_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            restart_delay: Duration::from_secs(5),
            kill_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&SupervisorConfig> for Timings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            debounce: config.debounce(),
            restart_delay: config.restart_delay(),
            kill_timeout: config.kill_timeout(),
        }
    }
}

enum Control {
    Shutdown,
}

/// Cloneable handle to a running supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    control: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<SupervisorState>,
}

impl SupervisorHandle {
    /// Request a graceful shutdown
    pub fn shutdown(&self) {
        if self.control.send(Control::Shutdown).is_err() {
            debug!("Supervisor already stopped");
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Wait until the supervisor reaches `state`
    pub async fn wait_for(&mut self, state: SupervisorState) {
        let _ = self.state.wait_for(|s| *s == state).await;
    }
}

pub struct Supervisor {
    launcher: Arc<dyn WorkerLauncher>,
    source: Arc<dyn ChangeSource>,
    classifier: ChangeClassifier,
    timings: Timings,

    state: watch::Sender<SupervisorState>,
    worker: Option<Box<dyn WorkerHandle>>,
    generation: u64,
    watchers: Vec<WatchGuard>,
    pending_change: Option<(Instant, PathBuf)>,
    restart_at: Option<Instant>,

    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    changes_tx: mpsc::UnboundedSender<PathBuf>,
    changes_rx: mpsc::UnboundedReceiver<PathBuf>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        source: Arc<dyn ChangeSource>,
        classifier: ChangeClassifier,
        timings: Timings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SupervisorState::Stopped);

        Self {
            launcher,
            source,
            classifier,
            timings,
            state,
            worker: None,
            generation: 0,
            watchers: Vec::new(),
            pending_change: None,
            restart_at: None,
            events_tx,
            events_rx,
            changes_tx,
            changes_rx,
            control_tx,
            control_rx,
        }
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            control: self.control_tx.clone(),
            state: self.state.subscribe(),
        }
    }

    fn current(&self) -> SupervisorState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SupervisorState) {
        if self.current() != state {
            debug!("Supervisor state: {} -> {}", self.current(), state);
            self.state.send_replace(state);
        }
    }

    /// Spawn the first worker and supervise until shutdown. Returns the process exit code.
    pub async fn run(mut self) -> i32 {
        info!(
            "Supervisor started (debounce {:?}, restart delay {:?})",
            self.timings.debounce, self.timings.restart_delay
        );
        self.spawn_worker().await;

        loop {
            let debounce_at = self.pending_change.as_ref().map(|(at, _)| *at);
            let restart_at = self.restart_at;

            tokio::select! {
                Some(control) = self.control_rx.recv() => match control {
                    Control::Shutdown => return self.shutdown().await,
                },
                Some(event) = self.events_rx.recv() => self.on_worker_event(event).await,
                Some(path) = self.changes_rx.recv() => self.on_change(path),
                _ = sleep_until_some(debounce_at) => self.on_debounce_elapsed().await,
                _ = sleep_until_some(restart_at) => {
                    self.restart_at = None;
                    info!("Restarting worker");
                    self.spawn_worker().await;
                }
            }
        }
    }

    /// Replace the worker. Dropped while a restart is already in progress.
    async fn start(&mut self) {
        match self.current() {
            SupervisorState::Restarting => {
                info!("Restart already in progress, ignoring start request");
                return;
            }
            SupervisorState::ShuttingDown => return,
            _ => {}
        }

        self.set_state(SupervisorState::Restarting);
        self.stop_worker().await;
        self.spawn_worker().await;
    }

    /// Terminate the current worker; its exit is ignored from here on
    async fn stop_worker(&mut self) -> bool {
        let Some(mut worker) = self.worker.take() else {
            return true;
        };
        // Supersede the old generation before its exit can be reported
        self.generation += 1;

        info!("Stopping worker (pid {:?})", worker.id());
        match worker.terminate(self.timings.kill_timeout).await {
            Ok(true) => true,
            Ok(false) => {
                warn!("Worker did not stop within {:?}, killed", self.timings.kill_timeout);
                false
            }
            Err(e) => {
                error!("Failed to stop worker: {}", e);
                false
            }
        }
    }

    async fn spawn_worker(&mut self) {
        self.generation += 1;
        self.set_state(SupervisorState::Starting);

        match self.launcher.launch(self.generation, self.events_tx.clone()) {
            Ok(worker) => {
                info!("Worker started (pid {:?}, generation {})", worker.id(), self.generation);
                self.worker = Some(worker);
            }
            Err(e) => {
                error!("Failed to start worker: {}", e);
                self.schedule_restart();
            }
        }
    }

    fn schedule_restart(&mut self) {
        info!("Restarting worker in {:?}", self.timings.restart_delay);
        self.set_state(SupervisorState::Restarting);
        self.restart_at = Some(Instant::now() + self.timings.restart_delay);
    }

    async fn on_worker_event(&mut self, event: WorkerEvent) {
        if event.generation != self.generation {
            debug!("Ignoring {:?} from superseded worker generation {}", event.kind, event.generation);
            return;
        }

        match event.kind {
            WorkerEventKind::Message(WorkerMessage::Ready) => {
                info!("Worker ready");
                self.set_state(SupervisorState::Running);
                self.ensure_watching();
            }
            WorkerEventKind::Message(WorkerMessage::Restart) => {
                warn!("Worker requested a restart");
                self.start().await;
            }
            WorkerEventKind::Exited(code) => {
                self.worker = None;
                match code {
                    Some(0) => {
                        info!("Worker exited cleanly, not restarting");
                        self.set_state(SupervisorState::Stopped);
                    }
                    _ if self.current() == SupervisorState::Restarting => {
                        debug!("Worker exited with {:?} during a restart", code);
                    }
                    _ => {
                        error!("Worker exited with {:?}", code);
                        self.schedule_restart();
                    }
                }
            }
        }
    }

    fn ensure_watching(&mut self) {
        if !self.watchers.is_empty() {
            return;
        }

        match self.source.watch(self.changes_tx.clone()) {
            Ok(guards) => {
                info!("Watching for changes ({} watch(es))", guards.len());
                self.watchers = guards;
            }
            Err(e) => warn!("File watching unavailable: {}", e),
        }
    }

    fn on_change(&mut self, path: PathBuf) {
        if self.current() == SupervisorState::ShuttingDown || self.classifier.is_ignored(&path) {
            return;
        }

        debug!("Change detected: {}", path.display());
        // Trailing edge: each event restarts the window and replaces the path
        self.pending_change = Some((Instant::now() + self.timings.debounce, path));
    }

    async fn on_debounce_elapsed(&mut self) {
        let Some((_, path)) = self.pending_change.take() else {
            return;
        };

        match self.classifier.classify(&path) {
            ChangeKind::Respawn => {
                info!("{} changed, respawning worker", path.display());
                self.start().await;
            }
            ChangeKind::ReloadPlugin(path) => {
                info!("Plugin changed: {}", path.display());
                self.forward(SupervisorMessage::ReloadPlugin { path }).await;
            }
            ChangeKind::FileChanged(path) => {
                debug!("File changed: {}", path.display());
                self.forward(SupervisorMessage::FileChanged { path }).await;
            }
        }
    }

    /// Send an instruction to the worker; dropped when no worker is connected
    async fn forward(&mut self, message: SupervisorMessage) {
        let Some(worker) = self.worker.as_mut() else {
            warn!("Worker not connected, dropping {:?}", message);
            return;
        };

        if let Err(e) = worker.send(&message).await {
            warn!("Dropping {:?}: {}", message, e);
        }
    }

    async fn shutdown(&mut self) -> i32 {
        info!("Shutting down supervisor");
        self.set_state(SupervisorState::ShuttingDown);
        self.pending_change = None;
        self.restart_at = None;
        self.watchers.clear();

        if self.stop_worker().await {
            info!("Worker stopped, exiting");
            0
        } else {
            1
        }
    }
}
