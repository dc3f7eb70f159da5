//! The device-facing facade.
//!
//! [`SwitchManager`] combines the session worker, the retry policy, the TTL
//! caches, the CLI parsers and the event feed into the operations an
//! application calls: read the interface table, flip a port, save the config.
//!
//! Reads are retried on transient failures and may be served from cache.
//! Writes are attempted once. Any write attempt drops the cached interface
//! table, since even a failed batch may have partly applied; a successful one
//! is announced as [`ChangeEvent::ManualActionAcknowledged`].

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::PollerConfig;
use crate::error::{OperationFailure, PollError};
use crate::events::{ChangeEvent, EventFeed, ManualAction, Notification};
use crate::model::{
    ArpEntry, ConnectionConfig, DeviceIdentity, HealthReport, InterfaceState, MacEntry,
    TelemetrySnapshot,
};
use crate::parser::{self, normalize_interface_name};
use crate::reconciler::InterfaceSource;
use crate::resilience::{CacheKey, Freshness, RetryPolicy, TtlCache, timed};
use crate::session::{CommandKind, SessionManager, SessionRecorder};
use crate::telemetry::Telemetry;
use crate::transport::Transport;

const MAX_DESCRIPTION_LEN: usize = 240;

type InterfaceParser = fn(&str) -> Vec<InterfaceState>;

/// Listing commands in the order they are tried.
const INTERFACE_LISTINGS: [(&str, InterfaceParser); 3] = [
    ("show interfaces status", parser::parse_interfaces_status),
    ("show ip interface brief", parser::parse_ip_interface_brief),
    (
        "show interfaces | include line protocol",
        parser::parse_line_protocol,
    ),
];

/// High-level operations on one switch.
///
/// Cloning is cheap; clones share the session worker, caches and event feed.
#[derive(Clone)]
pub struct SwitchManager {
    session: SessionManager,
    retry: RetryPolicy,
    interfaces: TtlCache<Vec<InterfaceState>>,
    identity: TtlCache<DeviceIdentity>,
    macs: TtlCache<Vec<MacEntry>>,
    telemetry: Telemetry,
    events: EventFeed,
    last_error: Arc<Mutex<Option<String>>>,
}

impl SwitchManager {
    /// Spawns the session worker for `connection`. No I/O happens until the
    /// first operation.
    pub fn new<T: Transport>(
        transport: T,
        connection: ConnectionConfig,
        config: &PollerConfig,
    ) -> Result<Self, PollError> {
        Self::with_recorder(transport, connection, config, None)
    }

    /// Like [`SwitchManager::new`], recording session events into `recorder`.
    pub fn with_recorder<T: Transport>(
        transport: T,
        connection: ConnectionConfig,
        config: &PollerConfig,
        recorder: Option<SessionRecorder>,
    ) -> Result<Self, PollError> {
        config.validate()?;
        let telemetry = Telemetry::new();
        let session = SessionManager::spawn(
            transport,
            connection,
            config.session.clone(),
            config.retry.clone(),
            telemetry.clone(),
            recorder,
        )?;

        let cache = &config.cache;
        Ok(Self {
            session,
            retry: config.retry.clone(),
            interfaces: TtlCache::new(
                "interfaces",
                Duration::from_secs(cache.interface_ttl_secs),
                cache.max_entries,
                telemetry.clone(),
            ),
            identity: TtlCache::new(
                "identity",
                Duration::from_secs(cache.identity_ttl_secs),
                cache.max_entries,
                telemetry.clone(),
            ),
            macs: TtlCache::new(
                "mac_table",
                Duration::from_secs(cache.mac_ttl_secs),
                cache.max_entries,
                telemetry.clone(),
            ),
            telemetry,
            events: EventFeed::new(&config.notifications),
            last_error: Arc::new(Mutex::new(None)),
        })
    }

    pub fn device_addr(&self) -> &str {
        self.session.device_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// The feed shared with reconcilers built on this manager.
    pub fn events(&self) -> &EventFeed {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.events.notifications()
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    pub fn last_error(&self) -> Option<String> {
        match self.last_error.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn remember(&self, failure: &OperationFailure) {
        let text = failure.to_string();
        match self.last_error.lock() {
            Ok(mut guard) => *guard = Some(text),
            Err(poisoned) => *poisoned.into_inner() = Some(text),
        }
    }

    fn fail(
        &self,
        operation: &'static str,
        attempts: u32,
        started: Instant,
        cause: PollError,
    ) -> OperationFailure {
        let failure = OperationFailure::new(operation, attempts, started.elapsed(), cause);
        warn!("{}: {failure}", self.device_addr());
        self.remember(&failure);
        failure
    }

    /// Opens the session now. Connection failures have already been retried
    /// by the session worker when this returns an error.
    pub async fn connect(&self) -> Result<(), OperationFailure> {
        let started = Instant::now();
        match self.session.connect().await {
            Ok(()) => {
                info!("connected to {}", self.device_addr());
                Ok(())
            }
            Err(err) => {
                let attempts = match err {
                    PollError::Connection { .. } => self.retry.max_attempts.max(1),
                    _ => 1,
                };
                Err(self.fail("connect", attempts, started, err))
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), OperationFailure> {
        let started = Instant::now();
        self.session
            .close()
            .await
            .map_err(|err| self.fail("disconnect", 1, started, err))
    }

    /// Runs a read-only operation with the retry policy.
    ///
    /// Connection errors are not repeated here; the session worker has
    /// already retried them.
    async fn query<V, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<V, OperationFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, PollError>>,
    {
        let started = Instant::now();
        let mut attempts = 0;
        let result = timed(
            operation,
            self.retry.run(
                operation,
                |err: &PollError| err.is_transient() && !matches!(err, PollError::Connection { .. }),
                |attempt| {
                    attempts = attempt;
                    op()
                },
            ),
        )
        .await;
        result.map_err(|err| self.fail(operation, attempts, started, err))
    }

    /// Runs a configuration batch once and announces it on success.
    ///
    /// The interface cache is dropped either way.
    async fn mutate(
        &self,
        operation: &'static str,
        commands: Vec<String>,
        action: ManualAction,
    ) -> Result<(), OperationFailure> {
        let started = Instant::now();
        let result = timed(
            operation,
            self.session.execute(commands, CommandKind::Config, None),
        )
        .await;
        match result {
            Ok(_) => {
                self.interfaces.clear().await;
                self.events
                    .publish(ChangeEvent::ManualActionAcknowledged(action));
                Ok(())
            }
            Err(err) => {
                // Part of the batch may have reached the device.
                self.interfaces.clear().await;
                Err(self.fail(operation, 1, started, err))
            }
        }
    }

    pub async fn device_identity(
        &self,
        freshness: Freshness,
    ) -> Result<DeviceIdentity, OperationFailure> {
        self.identity
            .get_or_try_insert(CacheKey::new("device_identity"), freshness, || {
                self.query("device_identity", || async {
                    let output = self.session.command("show version").await?;
                    parser::parse_version(&output.content)
                })
            })
            .await
    }

    /// Interfaces in device order.
    pub async fn list_interfaces(
        &self,
        freshness: Freshness,
    ) -> Result<Vec<InterfaceState>, OperationFailure> {
        self.interfaces
            .get_or_try_insert(CacheKey::new("list_interfaces"), freshness, || {
                self.query("list_interfaces", || self.fetch_interfaces())
            })
            .await
    }

    async fn fetch_interfaces(&self) -> Result<Vec<InterfaceState>, PollError> {
        let mut rejection = None;
        for (command, parse) in INTERFACE_LISTINGS {
            match self.session.command(command).await {
                Ok(output) => {
                    let interfaces = parse(&output.content);
                    if !interfaces.is_empty() {
                        return Ok(interfaces);
                    }
                    debug!("'{command}' listed no interfaces, trying the next listing");
                }
                Err(err @ PollError::Command { .. }) => {
                    debug!("'{command}' rejected, trying the next listing: {err}");
                    rejection = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        match rejection {
            Some(err) => Err(err),
            None => Ok(Vec::new()),
        }
    }

    pub async fn mac_address_table(
        &self,
        freshness: Freshness,
    ) -> Result<Vec<MacEntry>, OperationFailure> {
        self.macs
            .get_or_try_insert(CacheKey::new("mac_address_table"), freshness, || {
                self.query("mac_address_table", || async {
                    let output = self.session.command("show mac address-table").await?;
                    Ok(parser::parse_mac_table(&output.content))
                })
            })
            .await
    }

    pub async fn arp_table(&self) -> Result<Vec<ArpEntry>, OperationFailure> {
        self.query("arp_table", || async {
            let output = self.session.command("show arp").await?;
            Ok(parser::parse_arp_table(&output.content))
        })
        .await
    }

    pub async fn set_interface_enabled(
        &self,
        name: &str,
        enabled: bool,
    ) -> Result<(), OperationFailure> {
        let interface = checked_interface("set_interface_enabled", name)?;
        let action = if enabled { "no shutdown" } else { "shutdown" };
        self.mutate(
            "set_interface_enabled",
            vec![format!("interface {interface}"), action.to_string()],
            ManualAction::SetEnabled { interface, enabled },
        )
        .await
    }

    pub async fn set_interface_vlan(&self, name: &str, vlan: u16) -> Result<(), OperationFailure> {
        let interface = checked_interface("set_interface_vlan", name)?;
        if !(1..=4094).contains(&vlan) {
            return Err(rejected(
                "set_interface_vlan",
                format!("switchport access vlan {vlan}"),
                "VLAN id must be between 1 and 4094",
            ));
        }
        self.mutate(
            "set_interface_vlan",
            vec![
                format!("interface {interface}"),
                "switchport mode access".to_string(),
                format!("switchport access vlan {vlan}"),
            ],
            ManualAction::SetVlan { interface, vlan },
        )
        .await
    }

    /// Sets the port description; an empty text removes it.
    pub async fn set_interface_description(
        &self,
        name: &str,
        description: &str,
    ) -> Result<(), OperationFailure> {
        let interface = checked_interface("set_interface_description", name)?;
        let description = description.trim();
        if description.chars().any(char::is_control) {
            return Err(rejected(
                "set_interface_description",
                "description",
                "description must be a single line",
            ));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(rejected(
                "set_interface_description",
                "description",
                format!("description is longer than {MAX_DESCRIPTION_LEN} characters"),
            ));
        }

        let line = if description.is_empty() {
            "no description".to_string()
        } else {
            format!("description {description}")
        };
        self.mutate(
            "set_interface_description",
            vec![format!("interface {interface}"), line],
            ManualAction::SetDescription {
                interface,
                description: description.to_string(),
            },
        )
        .await
    }

    /// Writes the running configuration to startup.
    pub async fn save_configuration(&self) -> Result<(), OperationFailure> {
        let started = Instant::now();
        let result = timed("save_configuration", async {
            let output = self.session.command("write memory").await?;
            let text = output.content.to_ascii_lowercase();
            if text.contains("[ok]") || text.contains("success") {
                Ok(())
            } else {
                Err(PollError::command("write memory", output.content))
            }
        })
        .await;
        match result {
            Ok(()) => {
                self.events.publish(ChangeEvent::ManualActionAcknowledged(
                    ManualAction::SaveConfiguration,
                ));
                Ok(())
            }
            Err(err) => Err(self.fail("save_configuration", 1, started, err)),
        }
    }

    /// Runs `show clock` once and reports the session state.
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let connectivity_test_passed = match self.session.command("show clock").await {
            Ok(output) => {
                debug!("{} clock: {}", self.device_addr(), output.content.trim());
                true
            }
            Err(err) => {
                self.fail("health_check", 1, started, err);
                false
            }
        };
        HealthReport {
            connected: self.session.is_connected(),
            connectivity_test_passed,
            last_error: self.last_error(),
            telemetry: self.telemetry.snapshot(),
        }
    }

    pub async fn clear_caches(&self) {
        self.interfaces.clear().await;
        self.identity.clear().await;
        self.macs.clear().await;
        debug!("{} caches cleared", self.device_addr());
    }
}

impl InterfaceSource for SwitchManager {
    async fn interfaces(
        &self,
        freshness: Freshness,
    ) -> Result<Vec<InterfaceState>, OperationFailure> {
        self.list_interfaces(freshness).await
    }

    async fn mac_entries(&self, freshness: Freshness) -> Result<Vec<MacEntry>, OperationFailure> {
        self.mac_address_table(freshness).await
    }
}

fn rejected(
    operation: &'static str,
    command: impl Into<String>,
    reason: impl Into<String>,
) -> OperationFailure {
    OperationFailure::new(operation, 0, Duration::ZERO, PollError::command(command, reason))
}

/// Validates an interface name and returns its short form.
fn checked_interface(operation: &'static str, name: &str) -> Result<String, OperationFailure> {
    let name = name.trim();
    if name.is_empty() {
        return Err(rejected(operation, "interface", "interface name is empty"));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(rejected(
            operation,
            format!("interface {name}"),
            "interface name contains whitespace or control characters",
        ));
    }
    Ok(normalize_interface_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_names_are_validated_and_shortened() {
        assert_eq!(
            checked_interface("op", "GigabitEthernet1/0/3").expect("valid"),
            "Gi1/0/3"
        );
        assert_eq!(checked_interface("op", " Gi1/0/3 ").expect("valid"), "Gi1/0/3");

        for bad in ["", "   ", "Gi1/0/1 ; reload", "Gi1/0/1\nreload"] {
            let failure = checked_interface("op", bad).expect_err("invalid");
            assert_eq!(failure.attempts, 0);
            assert!(matches!(failure.cause, PollError::Command { .. }));
        }
    }

    #[test]
    fn listings_are_tried_in_order() {
        let commands: Vec<&str> = INTERFACE_LISTINGS.iter().map(|(c, _)| *c).collect();
        assert_eq!(
            commands,
            [
                "show interfaces status",
                "show ip interface brief",
                "show interfaces | include line protocol"
            ]
        );
    }
}
