use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};

use super::client::Session;
use super::dialect::CliDialect;
use super::recording::SessionRecorder;
use super::{CommandKind, Output};
use crate::config::SessionSettings;
use crate::error::PollError;
use crate::model::ConnectionConfig;
use crate::resilience::RetryPolicy;
use crate::telemetry::Telemetry;
use crate::transport::Transport;

/// A job for the session worker.
enum Job {
    Connect {
        responder: oneshot::Sender<Result<(), PollError>>,
    },
    Run {
        commands: Vec<String>,
        kind: CommandKind,
        timeout: Option<Duration>,
        responder: oneshot::Sender<Result<Vec<Output>, PollError>>,
    },
    Close {
        responder: oneshot::Sender<Result<(), PollError>>,
    },
}

/// Handle to the worker that owns one device session.
///
/// Jobs are queued on an mpsc channel and executed strictly one after
/// another, so the commands of one batch are never interleaved with another
/// caller's. Dropping every handle stops the worker and closes the session.
#[derive(Clone)]
pub struct SessionManager {
    sender: mpsc::Sender<Job>,
    device_addr: String,
    deadline: Duration,
    connected: Arc<AtomicBool>,
}

struct Worker<T: Transport> {
    session: Session<T>,
    device_addr: String,
    retry: RetryPolicy,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    connected: Arc<AtomicBool>,
}

impl SessionManager {
    /// Spawns the session worker. Nothing is sent to the device until the
    /// first job arrives.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<T: Transport>(
        transport: T,
        config: ConnectionConfig,
        settings: SessionSettings,
        retry: RetryPolicy,
        telemetry: Telemetry,
        recorder: Option<SessionRecorder>,
    ) -> Result<Self, PollError> {
        let dialect = CliDialect::for_device_type(&config.device_type)?;
        let device_addr = config.device_addr();
        let deadline = settings.operation_deadline();
        let connected = Arc::new(AtomicBool::new(false));

        let session = Session::new(transport, config, dialect, &settings, telemetry, recorder);
        let worker = Worker {
            session,
            device_addr: device_addr.clone(),
            retry,
            max_consecutive_failures: settings.max_consecutive_failures.max(1),
            consecutive_failures: 0,
            connected: connected.clone(),
        };

        let (tx, rx) = mpsc::channel::<Job>(settings.queue_depth.max(1));
        tokio::spawn(worker.run(rx));

        Ok(Self {
            sender: tx,
            device_addr,
            deadline,
            connected,
        })
    }

    pub fn device_addr(&self) -> &str {
        &self.device_addr
    }

    /// Whether the worker currently holds an open session.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn submit<R>(
        &self,
        label: &str,
        build: impl FnOnce(oneshot::Sender<Result<R, PollError>>) -> Job,
    ) -> Result<R, PollError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| PollError::SessionClosed)?;

        match tokio::time::timeout(self.deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PollError::SessionClosed),
            Err(_) => {
                warn!(
                    "{} gave up waiting for '{label}' after {:?}",
                    self.device_addr, self.deadline
                );
                Err(PollError::Timeout {
                    command: label.to_string(),
                    elapsed: self.deadline,
                })
            }
        }
    }

    /// Opens the session now instead of on the first command.
    pub async fn connect(&self) -> Result<(), PollError> {
        self.submit("connect", |responder| Job::Connect { responder })
            .await
    }

    /// Runs a batch of commands as one uninterrupted job.
    pub async fn execute(
        &self,
        commands: Vec<String>,
        kind: CommandKind,
        timeout: Option<Duration>,
    ) -> Result<Vec<Output>, PollError> {
        let label = commands.join("; ");
        self.submit(&label, |responder| Job::Run {
            commands,
            kind,
            timeout,
            responder,
        })
        .await
    }

    /// Runs a single exec-mode command.
    pub async fn command(&self, command: &str) -> Result<Output, PollError> {
        let mut outputs = self
            .execute(vec![command.to_string()], CommandKind::Exec, None)
            .await?;
        outputs.pop().ok_or(PollError::SessionClosed)
    }

    /// Closes the session; a later job reconnects.
    pub async fn close(&self) -> Result<(), PollError> {
        self.submit("close", |responder| Job::Close { responder })
            .await
    }
}

impl<T: Transport> Worker<T> {
    async fn run(mut self, mut rx: mpsc::Receiver<Job>) {
        while let Some(job) = rx.recv().await {
            match job {
                Job::Connect { responder } => {
                    let result = self.ensure_open().await;
                    let _ = responder.send(result);
                }
                Job::Run {
                    commands,
                    kind,
                    timeout,
                    responder,
                } => {
                    // The caller hit its deadline while the job was queued.
                    if responder.is_closed() {
                        warn!(
                            "{} dropping abandoned job '{}'",
                            self.device_addr,
                            commands.join("; ")
                        );
                        continue;
                    }
                    let result = match self.ensure_open().await {
                        Ok(()) => self.session.run_batch(&commands, kind, timeout).await,
                        Err(err) => Err(err),
                    };
                    self.observe(&result).await;
                    if responder.send(result).is_err() {
                        debug!("{} caller left before the job finished", self.device_addr);
                    }
                }
                Job::Close { responder } => {
                    let result = self.session.close("close requested").await;
                    self.connected.store(false, Ordering::Release);
                    self.consecutive_failures = 0;
                    let _ = responder.send(result);
                }
            }
        }

        debug!("command channel closed for {}, stopping worker", self.device_addr);
        if self.session.is_open()
            && let Err(e) = self.session.close("manager dropped").await
        {
            debug!("{} close on shutdown failed: {e}", self.device_addr);
        }
        self.connected.store(false, Ordering::Release);
    }

    /// Opens the session if needed, retrying connection failures with the
    /// backoff of the retry policy.
    async fn ensure_open(&mut self) -> Result<(), PollError> {
        if self.session.is_open() {
            return Ok(());
        }
        self.connected.store(false, Ordering::Release);

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        let result = loop {
            match self.session.open().await {
                Ok(()) => break Ok(()),
                Err(err @ PollError::Connection { .. }) if attempt < max_attempts => {
                    let wait = self.retry.delay_after(attempt);
                    debug!(
                        "connect: attempt {attempt} failed, retrying in {:.1}s: {err}",
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => break Err(err),
            }
        };

        self.connected.store(result.is_ok(), Ordering::Release);
        if result.is_ok() {
            self.consecutive_failures = 0;
        }
        result
    }

    /// Tracks consecutive session-level failures and tears the session down
    /// once the limit is reached.
    async fn observe<R>(&mut self, result: &Result<R, PollError>) {
        match result {
            Ok(_) => self.consecutive_failures = 0,
            Err(err) if err.is_session_failure() => {
                self.consecutive_failures += 1;
                if !self.session.is_open() {
                    self.connected.store(false, Ordering::Release);
                    self.consecutive_failures = 0;
                } else if self.consecutive_failures >= self.max_consecutive_failures {
                    warn!(
                        "{} {} consecutive session failures, reconnecting on next job",
                        self.device_addr, self.consecutive_failures
                    );
                    if let Err(e) = self.session.close("consecutive failures").await {
                        debug!("{} teardown failed: {e}", self.device_addr);
                    }
                    self.connected.store(false, Ordering::Release);
                    self.consecutive_failures = 0;
                }
            }
            Err(_) => {}
        }
    }
}
