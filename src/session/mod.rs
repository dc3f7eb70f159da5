//! Interactive CLI sessions.
//!
//! - [`Session`] drives one transport: login prompt, privilege elevation,
//!   paging setup, command/prompt exchanges with escalating prompt detection.
//! - [`SessionManager`] is a cloneable handle to a worker task that owns a
//!   `Session` and executes queued command batches one at a time.
//! - [`SessionRecorder`] optionally captures what happened for diagnostics.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod client;
mod dialect;
mod manager;
mod prompt;
mod recording;

pub use client::Session;
pub use dialect::CliDialect;
pub use manager::SessionManager;
pub use prompt::{PromptPlan, PromptStrategy, clean_output};
pub use recording::{
    NormalizeOptions, SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder,
};

/// How a batch of commands is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Commands run at the exec prompt.
    Exec,
    /// Commands run inside configuration mode.
    Config,
}

/// The output of one command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub command: String,
    /// Output without the echo and the trailing prompt.
    pub content: String,
    /// Everything received during the exchange.
    pub raw: String,
    pub elapsed: Duration,
}
