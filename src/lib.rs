//! # portwatch - Resilient CLI polling for network switches
//!
//! `portwatch` keeps one interactive CLI session open to a switch, runs `show`
//! commands through it with retries and result caching, parses the output into
//! typed records, and turns successive interface tables into change events.
//!
//! ## Features
//!
//! - **Serialized Sessions**: One worker task owns the session; command batches
//!   queue instead of interleaving
//! - **Escalating Prompt Detection**: Exact, generic, nudge and loose prompt
//!   matching, each with a longer timeout than the last
//! - **Retry and Caching**: Exponential backoff for transient failures and TTL
//!   caches for expensive reads
//! - **Change Tracking**: Link, VLAN and description changes, discovered and
//!   removed interfaces, and new MAC addresses on freshly linked ports
//! - **Telemetry**: Lock-free counters for commands, cache hits and connections
//! - **Async/Await**: Built on Tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use portwatch::config::PollerConfig;
//! use portwatch::device::SwitchManager;
//! use portwatch::model::ConnectionConfig;
//! use portwatch::reconciler::StateReconciler;
//! use portwatch::resilience::Freshness;
//! use portwatch::transport::SshTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PollerConfig::default();
//!     let connection = ConnectionConfig::new("192.168.1.1", "admin", "password")
//!         .with_secret("enable-secret");
//!     let switch = SwitchManager::new(SshTransport::default(), connection, &config)?;
//!
//!     for interface in switch.list_interfaces(Freshness::Cached).await? {
//!         println!("{} {} vlan {}", interface.name, interface.status, interface.vlan);
//!     }
//!
//!     let mut events = switch.subscribe();
//!     let reconciler = Arc::new(StateReconciler::new(
//!         switch.clone(),
//!         switch.events().clone(),
//!         config.poll.clone(),
//!     ));
//!     let cancel = CancellationToken::new();
//!     let task = reconciler.spawn_default(cancel.clone());
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{event}");
//!     }
//!
//!     cancel.cancel();
//!     task.await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`device::SwitchManager`] - Outbound operations on one switch
//! - [`reconciler::StateReconciler`] - Polls and diffs interface snapshots
//! - [`session::SessionManager`] - Worker-owned CLI session
//! - [`resilience`] - Retry, TTL cache and timing wrappers
//! - [`transport::Transport`] - SSH and scripted device channels
//! - [`error::PollError`] - Root causes; [`error::OperationFailure`] adds attempts and timing

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod model;
pub mod parser;
pub mod reconciler;
pub mod resilience;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use device::SwitchManager;
pub use error::{OperationFailure, PollError};
pub use events::{ChangeEvent, ManualAction};
pub use reconciler::StateReconciler;
pub use resilience::Freshness;
