//! Worker runtime - loads plugins, connects the network client and dispatches messages

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::application::errors::BotError;
use crate::application::messaging::MessageParser;
use crate::application::supervisor::ipc::{self, SupervisorMessage, WorkerMessage};
use crate::domain::traits::{Connection, ConnectionEvent, NetworkClient};
use crate::infrastructure::config::Config;
use crate::infrastructure::plugins::{LoaderChain, ManifestLoader, NativeLoader, StaticLoader};
use crate::plugins::builtin::{self, BUILTIN_CATEGORY};
use crate::plugins::PluginManager;

type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Worker end of the supervisor channel
#[derive(Clone, Default)]
pub struct WorkerLink {
    out: Option<Arc<Mutex<Output>>>,
}

impl WorkerLink {
    /// Not supervised: every message is dropped
    pub fn detached() -> Self {
        Self { out: None }
    }

    pub fn new(out: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            out: Some(Arc::new(Mutex::new(Box::new(out)))),
        }
    }

    /// Report to the supervisor over stdout
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    pub fn is_connected(&self) -> bool {
        self.out.is_some()
    }

    /// Send a lifecycle message; dropped and logged when not connected
    pub async fn send(&self, message: WorkerMessage) {
        let Some(out) = &self.out else {
            debug!("Not supervised, dropping {:?}", message);
            return;
        };

        let line = match ipc::encode(&message) {
            Ok(line) => line,
            Err(e) => {
                error!("{}", e);
                return;
            }
        };

        let mut out = out.lock().await;
        if let Err(e) = out.write_all(line.as_bytes()).await {
            warn!("Failed to send {:?} to supervisor: {}", message, e);
            return;
        }
        if let Err(e) = out.flush().await {
            warn!("Failed to flush supervisor channel: {}", e);
        }
    }
}

/// Decode supervisor instructions from `input`. The receiver closes on EOF.
pub fn read_instructions(
    input: impl AsyncBufRead + Send + Unpin + 'static,
) -> mpsc::UnboundedReceiver<SupervisorMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = input.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match ipc::decode::<SupervisorMessage>(&line) {
                    Ok(message) => {
                        if tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read supervisor channel: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Build the plugin manager with the builtin, manifest and native loaders
pub fn build_plugin_manager(config: &Config) -> Result<PluginManager, BotError> {
    let builtins = StaticLoader::new();
    let locations = if config.plugins.builtin {
        builtin::register_all(&builtins)?
    } else {
        Vec::new()
    };

    let chain = LoaderChain::new()
        .with(Arc::new(builtins))
        .with(Arc::new(ManifestLoader::new()))
        .with(Arc::new(NativeLoader::new()));

    let prefix = config.bot.prefixes.first().cloned().unwrap_or_else(|| "/".to_string());
    let manager = PluginManager::new(Arc::new(chain), prefix);
    for location in locations {
        manager.register_location(location, Some(BUILTIN_CATEGORY.to_string()));
    }
    Ok(manager)
}

/// Why the worker loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The network closed the connection for good
    ConnectionClosed(String),
    /// The supervisor closed the channel
    Released,
}

pub struct WorkerService<C> {
    manager: PluginManager,
    parser: MessageParser,
    client: Arc<C>,
    link: WorkerLink,
    plugin_dir: PathBuf,
    reconnect_delay: Duration,
}

impl<C: NetworkClient + 'static> WorkerService<C> {
    pub fn new(manager: PluginManager, client: Arc<C>, config: &Config) -> Self {
        Self {
            manager,
            parser: MessageParser::new(config.bot.prefixes.iter().cloned()),
            client,
            link: WorkerLink::detached(),
            plugin_dir: config.plugins.directory.clone(),
            reconnect_delay: config.worker.reconnect_delay(),
        }
    }

    pub fn with_link(mut self, link: WorkerLink) -> Self {
        self.link = link;
        self
    }

    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    /// Discover and load plugins, then serve until the connection closes for
    /// good or the supervisor releases the worker.
    pub async fn run(
        self,
        mut instructions: Option<mpsc::UnboundedReceiver<SupervisorMessage>>,
    ) -> Result<WorkerExit, BotError> {
        self.manager.discover(&self.plugin_dir)?;
        let summary = self.manager.load_all().await;
        info!(
            "{} of {} plugin(s) ready, {} command token(s)",
            summary.loaded, summary.discovered, summary.commands
        );

        let conn: Arc<dyn Connection> = self.client.clone();
        let mut announced = false;

        loop {
            let mut events = match self.client.connect().await {
                Ok(events) => events,
                Err(e @ BotError::Auth(_)) => return Err(e),
                Err(e) => {
                    warn!("Failed to connect: {}, retrying in {:?}", e, self.reconnect_delay);
                    if let Some(exit) = self.pause(&mut instructions).await {
                        return Ok(exit);
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(ConnectionEvent::ConnectionOpen) => {
                            let bot = self.client.bot_info();
                            info!("Connection open as {} ({})", bot.name, bot.username);
                            if !announced {
                                announced = true;
                                self.link.send(WorkerMessage::Ready).await;
                            }
                        }
                        Some(ConnectionEvent::QrReady(code)) => {
                            info!("Pairing code available, scan to connect: {}", code);
                        }
                        Some(ConnectionEvent::Message(raw)) => {
                            if let Some(message) = self.parser.parse(raw) {
                                let manager = self.manager.clone();
                                let conn = conn.clone();
                                tokio::spawn(async move {
                                    let outcome = manager.dispatch(conn, message).await;
                                    debug!("Dispatch outcome: {:?}", outcome);
                                });
                            }
                        }
                        Some(ConnectionEvent::ConnectionClose { reason, should_reconnect }) => {
                            if !should_reconnect {
                                info!("Connection closed: {}", reason);
                                return Ok(WorkerExit::ConnectionClosed(reason));
                            }
                            warn!("Connection closed: {}, reconnecting in {:?}", reason, self.reconnect_delay);
                            break;
                        }
                        None => {
                            warn!("Event stream ended, reconnecting in {:?}", self.reconnect_delay);
                            break;
                        }
                    },
                    instruction = recv_instruction(&mut instructions) => match instruction {
                        Some(instruction) => self.handle_instruction(instruction).await,
                        None => {
                            info!("Supervisor closed the channel, stopping");
                            return Ok(WorkerExit::Released);
                        }
                    },
                }
            }

            if let Some(exit) = self.pause(&mut instructions).await {
                return Ok(exit);
            }
        }
    }

    /// Wait out the reconnect delay while still serving supervisor instructions
    async fn pause(
        &self,
        instructions: &mut Option<mpsc::UnboundedReceiver<SupervisorMessage>>,
    ) -> Option<WorkerExit> {
        let deadline = tokio::time::sleep(self.reconnect_delay);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return None,
                instruction = recv_instruction(instructions) => match instruction {
                    Some(instruction) => self.handle_instruction(instruction).await,
                    None => {
                        info!("Supervisor closed the channel, stopping");
                        return Some(WorkerExit::Released);
                    }
                },
            }
        }
    }

    async fn handle_instruction(&self, instruction: SupervisorMessage) {
        match instruction {
            SupervisorMessage::ReloadPlugin { path } => {
                info!("Reload requested for {}", path.display());
                if !self.manager.reload(&path).await {
                    warn!("Reload of {} failed", path.display());
                }
            }
            SupervisorMessage::FileChanged { path } => {
                info!("File changed: {}", path.display());
            }
        }
    }
}

/// Never resolves when there is no supervisor channel
async fn recv_instruction(
    instructions: &mut Option<mpsc::UnboundedReceiver<SupervisorMessage>>,
) -> Option<SupervisorMessage> {
    match instructions {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Run the worker to completion and map the result to a process exit code.
///
/// A failure or panic is logged, `"restart"` is sent when supervised, and the
/// code is 1 so the supervisor replaces the worker. Rejected credentials and bad
/// configuration exit 1 without `"restart"`: a fresh worker would fail the same
/// way, so the supervisor's backoff applies instead.
pub async fn run_worker<C: NetworkClient + 'static>(
    service: WorkerService<C>,
    instructions: Option<mpsc::UnboundedReceiver<SupervisorMessage>>,
) -> i32 {
    let link = service.link.clone();
    let task = tokio::spawn(service.run(instructions));

    let failure = match task.await {
        Ok(Ok(exit)) => {
            info!("Worker finished: {:?}", exit);
            return 0;
        }
        Ok(Err(e @ (BotError::Auth(_) | BotError::Config(_)))) => {
            error!("Worker cannot run: {}", e);
            return 1;
        }
        Ok(Err(e)) => format!("worker failed: {}", e),
        Err(e) => format!("worker panicked: {}", e),
    };

    error!("{}", failure);
    link.send(WorkerMessage::Restart).await;
    1
}
