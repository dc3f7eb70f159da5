use std::time::Duration;

use log::{debug, info, trace, warn};
use regex::Regex;
use tokio::time::Instant;

use super::dialect::CliDialect;
use super::prompt::{
    PromptMatcher, PromptPlan, PromptStrategy, clean_output, echo_start, last_line,
};
use super::recording::{SessionEvent, SessionRecorder};
use super::{CommandKind, Output};
use crate::config::SessionSettings;
use crate::error::PollError;
use crate::model::ConnectionConfig;
use crate::telemetry::Telemetry;
use crate::transport::Transport;

/// One interactive CLI session over a transport.
///
/// The session owns its transport and connection config. It is reusable:
/// after [`close`](Self::close) (or a dropped channel) [`open`](Self::open)
/// reconnects with the same parameters.
pub struct Session<T: Transport> {
    transport: T,
    config: ConnectionConfig,
    dialect: CliDialect,
    plan: PromptPlan,
    hostname: Option<String>,
    exact_prompt: Option<Regex>,
    prompt: String,
    opened: bool,
    /// Set after an exchange ended without a prompt; its reply may still
    /// arrive ahead of the next command's.
    desynced: bool,
    telemetry: Telemetry,
    recorder: Option<SessionRecorder>,
}

/// Reads from `transport` into `buffer` until `done` accepts it or `window`
/// elapses. Paging markers are answered with a space and stripped.
async fn read_until<T, F>(
    transport: &mut T,
    dialect: &CliDialect,
    recorder: Option<&SessionRecorder>,
    buffer: &mut String,
    window: Duration,
    done: F,
) -> Result<bool, PollError>
where
    T: Transport,
    F: Fn(&str) -> bool,
{
    let deadline = Instant::now() + window;
    loop {
        if done(buffer) {
            return Ok(true);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        if let Some(chunk) = transport.read(remaining).await? {
            trace!("{chunk:?}");
            if let Some(recorder) = recorder {
                recorder.record_raw_chunk(chunk.as_str());
            }
            buffer.push_str(&chunk);
            if dialect.is_more(buffer) {
                let stripped = dialect.strip_more(buffer);
                *buffer = stripped;
                transport.write(" ").await?;
            }
        }
    }
}

/// The part of `buffer` that belongs to `command`. When `anchored`, that is
/// everything from the command's echo on, and nothing before the echo shows.
fn reply_part<'a>(buffer: &'a str, command: &str, anchored: bool) -> Option<&'a str> {
    if !anchored {
        return Some(buffer);
    }
    echo_start(buffer, command).map(|start| &buffer[start..])
}

impl<T: Transport> Session<T> {
    pub fn new(
        transport: T,
        config: ConnectionConfig,
        dialect: CliDialect,
        settings: &SessionSettings,
        telemetry: Telemetry,
        recorder: Option<SessionRecorder>,
    ) -> Self {
        let plan = PromptPlan::new(settings.command_timeout(), &settings.prompt_fallback_secs);
        Self {
            transport,
            config,
            dialect,
            plan,
            hostname: None,
            exact_prompt: None,
            prompt: String::new(),
            opened: false,
            desynced: false,
            telemetry,
            recorder,
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened && self.transport.is_connected()
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn dialect(&self) -> &CliDialect {
        &self.dialect
    }

    fn connection_error(&self, reason: impl Into<String>) -> PollError {
        PollError::Connection {
            host: self.config.host.clone(),
            port: self.config.port,
            reason: reason.into(),
        }
    }

    /// Connects, waits for the first prompt, elevates privilege and runs the
    /// dialect's setup commands.
    pub async fn open(&mut self) -> Result<(), PollError> {
        let result = self.try_open().await;
        self.telemetry.record_connection_attempt(result.is_ok());
        match &result {
            Ok(()) => {
                info!(
                    "{} session ready at prompt '{}'",
                    self.config.device_addr(),
                    self.prompt
                );
                if let Some(recorder) = self.recorder.as_ref() {
                    recorder.record_event(SessionEvent::ConnectionEstablished {
                        device_addr: self.config.device_addr(),
                        hostname: self.hostname.clone().unwrap_or_default(),
                        prompt: self.prompt.clone(),
                    });
                }
            }
            Err(err) => {
                warn!("{} session open failed: {err}", self.config.device_addr());
                if self.transport.is_connected()
                    && let Err(e) = self.transport.disconnect().await
                {
                    debug!("disconnect after failed open: {e}");
                }
            }
        }
        result
    }

    async fn try_open(&mut self) -> Result<(), PollError> {
        self.opened = false;
        self.desynced = false;
        self.transport.connect(&self.config).await?;
        debug!("{} transport connected", self.config.device_addr());

        let connect_timeout = self.config.connect_timeout();
        let mut buffer = String::new();
        let is_prompt = |b: &str| self.dialect.is_prompt(last_line(b));
        let mut found = read_until(
            &mut self.transport,
            &self.dialect,
            self.recorder.as_ref(),
            &mut buffer,
            connect_timeout,
            is_prompt,
        )
        .await?;
        if !found {
            debug!("{} no initial prompt, sending newline", self.config.device_addr());
            self.transport.write("\n").await?;
            found = read_until(
                &mut self.transport,
                &self.dialect,
                self.recorder.as_ref(),
                &mut buffer,
                connect_timeout,
                is_prompt,
            )
            .await?;
        }
        if !found {
            return Err(self.connection_error("no prompt after login"));
        }
        self.adopt_prompt(last_line(&buffer))?;

        if self.prompt.trim_end().ends_with('>') {
            if let Some(secret) = self.config.secret.clone() {
                self.elevate(&secret).await?;
            } else {
                debug!(
                    "{} unprivileged prompt and no secret configured",
                    self.config.device_addr()
                );
            }
        }

        self.opened = true;
        for command in self.dialect.setup_commands {
            if let Err(err) = self.send_command(command, None).await {
                warn!(
                    "{} setup command '{command}' failed: {err}",
                    self.config.device_addr()
                );
                if err.is_session_failure() {
                    self.opened = false;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn adopt_prompt(&mut self, line: &str) -> Result<(), PollError> {
        let line = line.trim().to_string();
        if let Some(hostname) = self.dialect.hostname_of(&line)
            && self.hostname.as_deref() != Some(hostname.as_str())
        {
            self.exact_prompt = Some(self.dialect.exact_prompt(&hostname)?);
            self.hostname = Some(hostname);
        }
        if line != self.prompt {
            if let Some(recorder) = self.recorder.as_ref() {
                recorder.record_event(SessionEvent::PromptChanged {
                    prompt: line.clone(),
                });
            }
            self.prompt = line;
        }
        Ok(())
    }

    async fn elevate(&mut self, secret: &str) -> Result<(), PollError> {
        let window = self.config.connect_timeout();
        self.transport
            .write(&format!("{}\n", self.dialect.enable_command))
            .await?;

        let mut buffer = String::new();
        let dialect = &self.dialect;
        let ready = read_until(
            &mut self.transport,
            dialect,
            self.recorder.as_ref(),
            &mut buffer,
            window,
            |b| dialect.is_password_prompt(b) || dialect.is_prompt(last_line(b)),
        )
        .await?;
        if !ready {
            return Err(self.connection_error("no response to enable"));
        }

        if self.dialect.is_password_prompt(&buffer) {
            self.transport.write(&format!("{secret}\n")).await?;
            buffer.clear();
            let dialect = &self.dialect;
            let ready = read_until(
                &mut self.transport,
                dialect,
                self.recorder.as_ref(),
                &mut buffer,
                window,
                |b| dialect.is_prompt(last_line(b)),
            )
            .await?;
            if !ready {
                return Err(self.connection_error("no prompt after enable secret"));
            }
        }

        if let Some(line) = self.dialect.error_line(&buffer) {
            return Err(self.connection_error(format!("privilege elevation failed: {line}")));
        }
        let prompt = last_line(&buffer).to_string();
        if !prompt.trim_end().ends_with('#') {
            return Err(self.connection_error("privilege elevation failed"));
        }
        self.adopt_prompt(&prompt)
    }

    /// Sends one command and returns its cleaned output.
    ///
    /// `timeout` overrides the window of the first prompt strategy.
    pub async fn send_command(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<Output, PollError> {
        if !self.is_open() {
            return Err(PollError::SessionClosed);
        }
        let prompt_before = self.prompt.clone();
        let started = Instant::now();
        let result = self.exchange(command, timeout, started).await;
        self.telemetry
            .record_operation(command, started.elapsed(), result.is_ok());

        if let Some(recorder) = self.recorder.as_ref() {
            let (success, content, all) = match &result {
                Ok(output) => (true, output.content.clone(), output.raw.clone()),
                Err(PollError::Command { output, .. }) => (false, output.clone(), output.clone()),
                Err(PollError::PromptNotDetected { partial, .. }) => {
                    (false, String::new(), partial.clone())
                }
                Err(_) => (false, String::new(), String::new()),
            };
            recorder.record_event(SessionEvent::CommandOutput {
                command: command.to_string(),
                prompt_before: Some(prompt_before),
                prompt_after: Some(self.prompt.clone()),
                success,
                content,
                all,
            });
        }
        result
    }

    async fn exchange(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        started: Instant,
    ) -> Result<Output, PollError> {
        // Discard anything left over from a previous exchange.
        while let Some(stale) = self.transport.read(Duration::ZERO).await? {
            trace!("discarding stale output {stale:?}");
        }

        self.transport.write(&format!("{command}\n")).await?;

        let stages = self.plan.stages().to_vec();
        let strategies: Vec<PromptStrategy> = stages.iter().map(|(s, _)| *s).collect();
        let mut buffer = String::new();

        for (idx, (strategy, window)) in stages.iter().enumerate() {
            let window = match (idx, timeout) {
                (0, Some(timeout)) => timeout,
                _ => *window,
            };
            if idx > 0 {
                debug!("'{command}': prompt not seen, trying {strategy:?} for {window:?}");
                if let Some(recorder) = self.recorder.as_ref() {
                    recorder.record_event(SessionEvent::PromptFallback {
                        command: command.to_string(),
                        strategy: *strategy,
                    });
                }
            }
            if *strategy == PromptStrategy::Nudge {
                self.transport.write("\n").await?;
            }

            let matcher = PromptMatcher::new(&self.dialect, self.exact_prompt.as_ref());
            let accepted = &strategies[..=idx];
            let resync = self.desynced;
            let found = read_until(
                &mut self.transport,
                &self.dialect,
                self.recorder.as_ref(),
                &mut buffer,
                window,
                |b| {
                    reply_part(b, command, resync)
                        .is_some_and(|reply| matcher.recognizes_any(accepted, reply))
                },
            )
            .await?;

            if found {
                if idx > 0 {
                    info!("'{command}': prompt recognized by {strategy:?} strategy");
                }
                if resync {
                    if let Some(start) = echo_start(&buffer, command)
                        && start > 0
                    {
                        let late: String = buffer.drain(..start).collect();
                        debug!("'{command}': discarded late output {late:?}");
                    }
                    self.desynced = false;
                }
                let prompt = last_line(&buffer).to_string();
                self.adopt_prompt(&prompt)?;
                return self.finish(command, buffer, started);
            }
        }

        self.desynced = true;
        let elapsed = started.elapsed();
        if buffer.trim().is_empty() {
            Err(PollError::Timeout {
                command: command.to_string(),
                elapsed,
            })
        } else {
            Err(PollError::PromptNotDetected {
                command: command.to_string(),
                strategies: stages.len(),
                elapsed,
                partial: buffer,
            })
        }
    }

    fn finish(&self, command: &str, raw: String, started: Instant) -> Result<Output, PollError> {
        let content = clean_output(&raw, command, &self.dialect);
        if let Some(line) = self.dialect.error_line(&content) {
            debug!("'{command}' rejected by device: {line}");
            return Err(PollError::command(command, content));
        }
        Ok(Output {
            command: command.to_string(),
            content,
            raw,
            elapsed: started.elapsed(),
        })
    }

    /// Runs commands back to back.
    ///
    /// `Config` batches are wrapped in the dialect's config enter/exit
    /// commands; the exit command is sent even when a command fails midway.
    pub async fn run_batch(
        &mut self,
        commands: &[String],
        kind: CommandKind,
        timeout: Option<Duration>,
    ) -> Result<Vec<Output>, PollError> {
        match kind {
            CommandKind::Exec => {
                let mut outputs = Vec::with_capacity(commands.len());
                for command in commands {
                    outputs.push(self.send_command(command, timeout).await?);
                }
                Ok(outputs)
            }
            CommandKind::Config => {
                let enter = self.dialect.config_enter;
                self.send_command(enter, timeout).await?;

                let mut outputs = Vec::with_capacity(commands.len());
                let mut failure = None;
                for command in commands {
                    match self.send_command(command, timeout).await {
                        Ok(output) => outputs.push(output),
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }

                let exit = self.dialect.config_exit;
                let exited = self.send_command(exit, timeout).await;
                match (failure, exited) {
                    (Some(err), exited) => {
                        if let Err(exit_err) = exited {
                            warn!("leaving config mode after failure: {exit_err}");
                        }
                        Err(err)
                    }
                    (None, Err(err)) => Err(err),
                    (None, Ok(_)) => Ok(outputs),
                }
            }
        }
    }

    /// Disconnects the transport. The session can be opened again.
    pub async fn close(&mut self, reason: &str) -> Result<(), PollError> {
        if let Some(recorder) = self.recorder.as_ref() {
            recorder.record_event(SessionEvent::ConnectionClosed {
                reason: reason.to_string(),
                prompt_before: Some(self.prompt.clone()),
            });
        }
        debug!("{} closing session: {reason}", self.config.device_addr());
        self.opened = false;
        self.transport.disconnect().await
    }
}
