//! Worker processes spawned with tokio::process

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

use crate::application::errors::SupervisorError;
use crate::application::supervisor::ipc::{self, SupervisorMessage, WorkerMessage, SUPERVISED_ENV};
use crate::application::supervisor::{WorkerEvent, WorkerEventKind, WorkerHandle, WorkerLauncher};

/// Grace period for a killed worker to be reaped
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Launches the worker as a child process with piped stdin/stdout
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            envs: Vec::new(),
        }
    }

    /// Extra environment for every worker
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Re-run the current executable with `args`
    pub fn current_exe(args: Vec<String>) -> Result<Self, SupervisorError> {
        let program = std::env::current_exe()
            .map_err(|e| SupervisorError::Spawn(format!("Cannot locate current executable: {}", e)))?;
        Ok(Self::new(program, args))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        generation: u64,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerHandle>, SupervisorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(SUPERVISED_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::Spawn(format!("{}: {}", self.program.display(), e)))?;

        let pid = child.id();
        let stdin = child.stdin.take();

        let reader = child.stdout.take().map(|stdout| {
            let events = events.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) if line.trim().is_empty() => {}
                        Ok(Some(line)) => match ipc::decode::<WorkerMessage>(&line) {
                            Ok(message) => {
                                let _ = events.send(WorkerEvent {
                                    generation,
                                    kind: WorkerEventKind::Message(message),
                                });
                            }
                            Err(_) => debug!("worker stdout: {}", line),
                        },
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Failed to read worker output: {}", e);
                            break;
                        }
                    }
                }
            })
        });

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill worker: {}", e);
                    }
                    child.wait().await
                }
            };

            // Report output the worker wrote before exiting first
            if let Some(reader) = reader {
                let _ = tokio::time::timeout(REAP_TIMEOUT, reader).await;
            }

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    error!("Failed to wait for worker: {}", e);
                    None
                }
            };
            let _ = exit_tx.send(Some(code));
            let _ = events.send(WorkerEvent {
                generation,
                kind: WorkerEventKind::Exited(code),
            });
        });

        Ok(Box::new(ProcessWorker {
            pid,
            stdin,
            exit: exit_rx,
            kill: Some(kill_tx),
        }))
    }
}

struct ProcessWorker {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    /// `Some(code)` once the process has been reaped
    exit: watch::Receiver<Option<Option<i32>>>,
    kill: Option<oneshot::Sender<()>>,
}

impl ProcessWorker {
    async fn wait_exit(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.exit.wait_for(Option::is_some)).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl WorkerHandle for ProcessWorker {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    async fn send(&mut self, message: &SupervisorMessage) -> Result<(), SupervisorError> {
        if self.exit.borrow().is_some() {
            return Err(SupervisorError::Disconnected);
        }
        let stdin = self.stdin.as_mut().ok_or(SupervisorError::Disconnected)?;
        let line = ipc::encode(message).map_err(|e| SupervisorError::Spawn(e.to_string()))?;

        stdin.write_all(line.as_bytes()).await.map_err(|_| SupervisorError::Disconnected)?;
        stdin.flush().await.map_err(|_| SupervisorError::Disconnected)?;
        Ok(())
    }

    async fn terminate(&mut self, timeout: Duration) -> Result<bool, SupervisorError> {
        // EOF on stdin asks the worker to exit
        drop(self.stdin.take());
        if self.wait_exit(timeout).await {
            return Ok(true);
        }

        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        if self.wait_exit(REAP_TIMEOUT).await {
            Ok(false)
        } else {
            Err(SupervisorError::Kill(format!("worker {:?} did not exit after kill", self.pid)))
        }
    }
}
