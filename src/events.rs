//! Change events and the notification log.
//!
//! Every event goes out on a tokio broadcast channel for live subscribers and
//! is also rendered into a short text line kept in a bounded ring buffer.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use log::{debug, info, warn};
use tokio::sync::broadcast;

use crate::config::NotificationSettings;
use crate::error::OperationFailure;
use crate::model::{LinkStatus, Vlan};

/// A failure shared between every subscriber of one `PollFailed` event.
///
/// Two values are equal when they point at the same failure.
#[derive(Debug, Clone)]
pub struct SharedFailure(pub Arc<OperationFailure>);

impl PartialEq for SharedFailure {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for SharedFailure {
    type Target = OperationFailure;

    fn deref(&self) -> &OperationFailure {
        &self.0
    }
}

/// A user-triggered change that the device accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualAction {
    SetEnabled { interface: String, enabled: bool },
    SetVlan { interface: String, vlan: u16 },
    SetDescription { interface: String, description: String },
    SaveConfiguration,
}

impl fmt::Display for ManualAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualAction::SetEnabled {
                interface,
                enabled: true,
            } => write!(f, "{interface} enabled"),
            ManualAction::SetEnabled {
                interface,
                enabled: false,
            } => write!(f, "{interface} disabled"),
            ManualAction::SetVlan { interface, vlan } => {
                write!(f, "{interface} moved to VLAN {vlan}")
            }
            ManualAction::SetDescription {
                interface,
                description,
            } => write!(f, "{interface} description set to '{description}'"),
            ManualAction::SaveConfiguration => f.write_str("configuration saved"),
        }
    }
}

/// A change observed on the device.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    InterfaceDiscovered {
        interface: String,
        status: LinkStatus,
        vlan: Vlan,
    },
    LinkUp {
        interface: String,
    },
    LinkDown {
        interface: String,
    },
    VlanChanged {
        interface: String,
        from: Vlan,
        to: Vlan,
    },
    DescriptionChanged {
        interface: String,
        from: String,
        to: String,
    },
    InterfaceRemoved {
        interface: String,
    },
    NewMacSeen {
        interface: String,
        mac: String,
        vlan: String,
    },
    ManualActionAcknowledged(ManualAction),
    /// A poll cycle failed; the previous snapshot is still current.
    PollFailed(SharedFailure),
}

impl ChangeEvent {
    /// The interface the event is about, if any.
    pub fn interface(&self) -> Option<&str> {
        match self {
            ChangeEvent::InterfaceDiscovered { interface, .. }
            | ChangeEvent::LinkUp { interface }
            | ChangeEvent::LinkDown { interface }
            | ChangeEvent::VlanChanged { interface, .. }
            | ChangeEvent::DescriptionChanged { interface, .. }
            | ChangeEvent::InterfaceRemoved { interface }
            | ChangeEvent::NewMacSeen { interface, .. } => Some(interface),
            ChangeEvent::ManualActionAcknowledged(
                ManualAction::SetEnabled { interface, .. }
                | ManualAction::SetVlan { interface, .. }
                | ManualAction::SetDescription { interface, .. },
            ) => Some(interface),
            ChangeEvent::ManualActionAcknowledged(ManualAction::SaveConfiguration)
            | ChangeEvent::PollFailed(_) => None,
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeEvent::InterfaceDiscovered {
                interface,
                status,
                vlan,
            } => write!(f, "{interface} discovered ({status}, vlan {vlan})"),
            ChangeEvent::LinkUp { interface } => write!(f, "{interface} link up"),
            ChangeEvent::LinkDown { interface } => write!(f, "{interface} link down"),
            ChangeEvent::VlanChanged {
                interface,
                from,
                to,
            } => write!(f, "{interface} vlan {from} -> {to}"),
            ChangeEvent::DescriptionChanged { interface, to, .. } => {
                write!(f, "{interface} description changed to '{to}'")
            }
            ChangeEvent::InterfaceRemoved { interface } => write!(f, "{interface} removed"),
            ChangeEvent::NewMacSeen {
                interface,
                mac,
                vlan,
            } => write!(f, "new device {mac} on {interface} (vlan {vlan})"),
            ChangeEvent::ManualActionAcknowledged(action) => write!(f, "{action}"),
            ChangeEvent::PollFailed(failure) => write!(f, "poll failed: {}", failure.0),
        }
    }
}

/// One human-readable line in the notification log.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub at: SystemTime,
    pub message: String,
}

/// Bounded log of notifications; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct NotificationLog {
    limit: usize,
    entries: VecDeque<Notification>,
}

impl NotificationLog {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            entries: VecDeque::with_capacity(limit),
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(Notification {
            at: SystemTime::now(),
            message: message.into(),
        });
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Broadcast feed of change events plus the notification log.
#[derive(Debug, Clone)]
pub struct EventFeed {
    sender: broadcast::Sender<ChangeEvent>,
    log: Arc<Mutex<NotificationLog>>,
}

impl EventFeed {
    pub fn new(settings: &NotificationSettings) -> Self {
        let (sender, _) = broadcast::channel(settings.channel_capacity.max(1));
        Self {
            sender,
            log: Arc::new(Mutex::new(NotificationLog::new(settings.limit))),
        }
    }

    fn log(&self) -> MutexGuard<'_, NotificationLog> {
        match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Records and broadcasts an event. Having no subscribers is fine.
    pub fn publish(&self, event: ChangeEvent) {
        let message = event.to_string();
        match &event {
            ChangeEvent::PollFailed(_) => warn!("{message}"),
            _ => info!("{message}"),
        }
        self.log().push(message);
        if self.sender.send(event).is_err() {
            debug!("no event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Copy of the notification log, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.log().iter().cloned().collect()
    }

    pub fn clear_notifications(&self) {
        self.log().clear();
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new(&NotificationSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_evicts_oldest_first() {
        let mut log = NotificationLog::new(50);
        for i in 0..60 {
            log.push(format!("event {i}"));
        }
        assert_eq!(log.len(), 50);
        let messages: Vec<&str> = log.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages.first(), Some(&"event 10"));
        assert_eq!(messages.last(), Some(&"event 59"));
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let feed = EventFeed::default();
        let mut rx = feed.subscribe();

        feed.publish(ChangeEvent::LinkUp {
            interface: "Gi1/0/1".to_string(),
        });

        let event = rx.recv().await.expect("event");
        assert_eq!(event.interface(), Some("Gi1/0/1"));
        assert_eq!(feed.notifications()[0].message, "Gi1/0/1 link up");
    }

    #[test]
    fn publishing_without_subscribers_still_logs() {
        let feed = EventFeed::new(&NotificationSettings {
            limit: 2,
            channel_capacity: 4,
        });
        for vlan in [10, 20, 30] {
            feed.publish(ChangeEvent::ManualActionAcknowledged(ManualAction::SetVlan {
                interface: "Gi1/0/2".to_string(),
                vlan,
            }));
        }
        let notes = feed.notifications();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1].message, "Gi1/0/2 moved to VLAN 30");
    }

    #[test]
    fn vlan_change_text() {
        let event = ChangeEvent::VlanChanged {
            interface: "eth1".to_string(),
            from: Vlan::Access(10),
            to: Vlan::Trunk,
        };
        assert_eq!(event.to_string(), "eth1 vlan 10 -> trunk");
    }
}
