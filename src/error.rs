//! Error types for session, polling and device operations.
//!
//! [`PollError`] is the root-cause taxonomy produced by the session and parser
//! layers. [`OperationFailure`] is what the outbound API hands to callers: the
//! untouched root cause plus how many attempts were made and how long they took.

use std::time::Duration;

use thiserror::Error;

/// Root causes of a failed device interaction.
#[derive(Error, Debug)]
pub enum PollError {
    /// A session could not be established (TCP, authentication, initial prompt
    /// or privilege elevation).
    #[error("connection to {host}:{port} failed: {reason}")]
    Connection {
        host: String,
        port: u16,
        reason: String,
    },

    /// Output arrived but none of the prompt detection strategies recognized
    /// the end of it.
    ///
    /// `partial` holds whatever was received so callers can diagnose odd prompts.
    #[error("prompt not detected after '{command}' ({strategies} strategies, {elapsed:?})")]
    PromptNotDetected {
        command: String,
        strategies: usize,
        elapsed: Duration,
        partial: String,
    },

    /// The device answered but rejected or failed the command.
    #[error("command '{command}' failed: {output}")]
    Command { command: String, output: String },

    /// Nothing at all was received within the allowed time.
    #[error("no response to '{command}' within {elapsed:?}")]
    Timeout { command: String, elapsed: Duration },

    /// The underlying channel was closed by the peer or the session worker.
    #[error("session closed")]
    SessionClosed,

    /// The device-type tag has no known CLI dialect.
    #[error("unsupported device type '{0}'")]
    UnsupportedDevice(String),

    /// Device output did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid configuration values.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An I/O error while loading or saving configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON encode/decode error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PollError {
    /// Returns true for failures that may succeed when the exchange is repeated.
    ///
    /// Device rejections are never transient: repeating a rejected write is
    /// not safe and repeating a rejected read gives the same answer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PollError::Connection { .. }
                | PollError::PromptNotDetected { .. }
                | PollError::Timeout { .. }
                | PollError::SessionClosed
        )
    }

    /// Returns true for failures that indicate the session itself is unhealthy.
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            PollError::PromptNotDetected { .. } | PollError::Timeout { .. } | PollError::SessionClosed
        )
    }

    pub(crate) fn command(command: impl Into<String>, output: impl Into<String>) -> Self {
        PollError::Command {
            command: command.into(),
            output: output.into(),
        }
    }
}

/// A failed outbound operation.
///
/// The root cause is kept as-is so callers can match on it; retries never
/// replace it with a generic error.
#[derive(Error, Debug)]
#[error("{operation} failed after {attempts} attempt(s) in {elapsed:?}: {cause}")]
pub struct OperationFailure {
    pub operation: &'static str,
    pub attempts: u32,
    pub elapsed: Duration,
    #[source]
    pub cause: PollError,
}

impl OperationFailure {
    pub fn new(
        operation: &'static str,
        attempts: u32,
        elapsed: Duration,
        cause: PollError,
    ) -> Self {
        Self {
            operation,
            attempts,
            elapsed,
            cause,
        }
    }
}
