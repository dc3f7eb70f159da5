//! Byte-level access to a device CLI.
//!
//! The session layer only needs four operations from a transport: connect,
//! write text, read whatever text arrives within a timeout, and disconnect.
//! [`SshTransport`] drives a PTY shell over SSH; [`ScriptedTransport`] is an
//! in-memory Cisco-like device for tests and demos.

use std::future::Future;
use std::time::Duration;

use crate::error::PollError;
use crate::model::ConnectionConfig;

mod scripted;
mod security;
mod ssh;

pub use scripted::{ScriptedPort, ScriptedTransport, TranscriptEntry};
pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use ssh::SshTransport;

/// A CLI text channel to one device.
pub trait Transport: Send + 'static {
    /// Opens and authenticates the channel.
    fn connect(
        &mut self,
        config: &ConnectionConfig,
    ) -> impl Future<Output = Result<(), PollError>> + Send;

    /// Writes raw text; callers append their own line endings.
    fn write(&mut self, text: &str) -> impl Future<Output = Result<(), PollError>> + Send;

    /// Waits up to `timeout` for output.
    ///
    /// Returns `Ok(None)` when nothing arrived in time and
    /// `Err(PollError::SessionClosed)` when the channel is gone.
    fn read(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<String>, PollError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), PollError>> + Send;

    fn is_connected(&self) -> bool;
}
