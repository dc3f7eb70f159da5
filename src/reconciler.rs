//! Interface state tracking across polls.
//!
//! A [`StateReconciler`] fetches the interface table, compares it with the
//! previous snapshot and publishes the differences as [`ChangeEvent`]s. The
//! first successful poll only establishes a baseline. A failed poll publishes
//! `PollFailed` and leaves the snapshot alone: no answer is not evidence that
//! an interface went away.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, warn};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::PollSettings;
use crate::error::OperationFailure;
use crate::events::{ChangeEvent, EventFeed, SharedFailure};
use crate::model::{InterfaceState, LinkStatus, MacEntry};
use crate::resilience::Freshness;

/// Interfaces keyed by name, in device order.
pub type Snapshot = IndexMap<String, InterfaceState>;

/// Where a reconciler reads device state from.
pub trait InterfaceSource: Send + Sync + 'static {
    fn interfaces(
        &self,
        freshness: Freshness,
    ) -> impl Future<Output = Result<Vec<InterfaceState>, OperationFailure>> + Send;

    fn mac_entries(
        &self,
        freshness: Freshness,
    ) -> impl Future<Output = Result<Vec<MacEntry>, OperationFailure>> + Send;
}

/// Builds a snapshot, keeping the first row when a name repeats.
pub fn snapshot_of(interfaces: Vec<InterfaceState>) -> Snapshot {
    let mut snapshot = Snapshot::with_capacity(interfaces.len());
    for interface in interfaces {
        snapshot.entry(interface.name.clone()).or_insert(interface);
    }
    snapshot
}

fn link_change(name: &str, before: LinkStatus, after: LinkStatus) -> Option<ChangeEvent> {
    match (before, after) {
        (LinkStatus::Up, LinkStatus::Up) => None,
        (_, LinkStatus::Up) => Some(ChangeEvent::LinkUp {
            interface: name.to_string(),
        }),
        (LinkStatus::Up, LinkStatus::Down) => Some(ChangeEvent::LinkDown {
            interface: name.to_string(),
        }),
        _ => None,
    }
}

/// Events that turn `previous` into `next`.
///
/// Changes to known interfaces come first (device order), then removals,
/// then discoveries. A discovered interface that is up is followed by its
/// `LinkUp`.
pub fn diff(previous: &Snapshot, next: &Snapshot) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    for (name, after) in next {
        let Some(before) = previous.get(name) else {
            continue;
        };
        events.extend(link_change(name, before.status, after.status));
        if before.vlan != after.vlan {
            events.push(ChangeEvent::VlanChanged {
                interface: name.clone(),
                from: before.vlan,
                to: after.vlan,
            });
        }
        if before.description != after.description {
            events.push(ChangeEvent::DescriptionChanged {
                interface: name.clone(),
                from: before.description.clone(),
                to: after.description.clone(),
            });
        }
    }

    events.extend(
        previous
            .keys()
            .filter(|name| !next.contains_key(*name))
            .map(|name| ChangeEvent::InterfaceRemoved {
                interface: name.clone(),
            }),
    );

    for (name, after) in next.iter().filter(|(name, _)| !previous.contains_key(*name)) {
        events.push(ChangeEvent::InterfaceDiscovered {
            interface: name.clone(),
            status: after.status,
            vlan: after.vlan,
        });
        if after.status == LinkStatus::Up {
            events.push(ChangeEvent::LinkUp {
                interface: name.clone(),
            });
        }
    }

    events
}

struct Tracked {
    snapshot: Arc<Snapshot>,
    baseline: bool,
}

/// Polls a source and publishes what changed.
pub struct StateReconciler<S> {
    source: S,
    events: EventFeed,
    settings: PollSettings,
    tracked: RwLock<Tracked>,
    seen_macs: Mutex<HashSet<String>>,
    /// Held for a whole poll cycle so overlapping polls apply in call order.
    cycle: AsyncMutex<()>,
}

impl<S: InterfaceSource> StateReconciler<S> {
    pub fn new(source: S, events: EventFeed, settings: PollSettings) -> Self {
        Self {
            source,
            events,
            settings,
            tracked: RwLock::new(Tracked {
                snapshot: Arc::new(Snapshot::new()),
                baseline: false,
            }),
            seen_macs: Mutex::new(HashSet::new()),
            cycle: AsyncMutex::new(()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The current snapshot. Empty until the first successful poll.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        match self.tracked.read() {
            Ok(tracked) => tracked.snapshot.clone(),
            Err(poisoned) => poisoned.into_inner().snapshot.clone(),
        }
    }

    /// Whether a baseline has been established.
    pub fn has_baseline(&self) -> bool {
        match self.tracked.read() {
            Ok(tracked) => tracked.baseline,
            Err(poisoned) => poisoned.into_inner().baseline,
        }
    }

    /// Runs one poll cycle and returns the events it published.
    ///
    /// On failure `PollFailed` is published and the failure returned; the
    /// snapshot is not touched. A poll started while another is running waits
    /// for it.
    pub async fn poll_once(
        &self,
        freshness: Freshness,
    ) -> Result<Vec<ChangeEvent>, SharedFailure> {
        let _cycle = self.cycle.lock().await;
        let interfaces = match self.source.interfaces(freshness).await {
            Ok(interfaces) => interfaces,
            Err(failure) => {
                let failure = SharedFailure(Arc::new(failure));
                self.events.publish(ChangeEvent::PollFailed(failure.clone()));
                return Err(failure);
            }
        };
        let next = Arc::new(snapshot_of(interfaces));

        let mut events = {
            let mut tracked = match self.tracked.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let events = if tracked.baseline {
                diff(&tracked.snapshot, &next)
            } else {
                tracked.baseline = true;
                next.values()
                    .map(|i| ChangeEvent::InterfaceDiscovered {
                        interface: i.name.clone(),
                        status: i.status,
                        vlan: i.vlan,
                    })
                    .collect()
            };
            tracked.snapshot = next;
            events
        };

        if self.settings.track_new_macs {
            let came_up: Vec<String> = events
                .iter()
                .filter_map(|e| match e {
                    ChangeEvent::LinkUp { interface } => Some(interface.clone()),
                    _ => None,
                })
                .collect();
            if !came_up.is_empty() {
                events.extend(self.new_macs(&came_up).await);
            }
        }

        debug!("poll produced {} change(s)", events.len());
        for event in &events {
            self.events.publish(event.clone());
        }
        Ok(events)
    }

    async fn new_macs(&self, ports: &[String]) -> Vec<ChangeEvent> {
        let entries = match self.source.mac_entries(Freshness::Fresh).await {
            Ok(entries) => entries,
            Err(failure) => {
                warn!("MAC table lookup after link up failed: {failure}");
                return Vec::new();
            }
        };

        let mut seen = match self.seen_macs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut events = Vec::new();
        for port in ports {
            for entry in entries.iter().filter(|e| e.is_on_port(port)) {
                if seen.insert(entry.mac.clone()) {
                    events.push(ChangeEvent::NewMacSeen {
                        interface: port.clone(),
                        mac: entry.mac.clone(),
                        vlan: entry.vlan.clone(),
                    });
                }
            }
        }
        events
    }

    /// Polls every `interval` until `cancel` fires. The first poll runs
    /// immediately.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let freshness = self.settings.freshness;

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(failure) = self.poll_once(freshness).await {
                            debug!("poll failed, retrying next tick: {}", failure.0);
                        }
                    }
                }
            }
            debug!("reconciler stopped");
        })
    }

    /// [`StateReconciler::spawn`] with the configured interval.
    pub fn spawn_default(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.settings.interval();
        self.spawn(interval, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationSettings;
    use crate::error::PollError;
    use crate::model::Vlan;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct FakeSource {
        polls: Mutex<VecDeque<(Duration, Result<Vec<InterfaceState>, OperationFailure>)>>,
        macs: Mutex<Vec<MacEntry>>,
    }

    impl FakeSource {
        fn push(&self, result: Result<Vec<InterfaceState>, OperationFailure>) {
            self.push_slow(Duration::ZERO, result);
        }

        /// Answers the fetch only after `delay`.
        fn push_slow(&self, delay: Duration, result: Result<Vec<InterfaceState>, OperationFailure>) {
            self.polls.lock().unwrap().push_back((delay, result));
        }
    }

    impl InterfaceSource for FakeSource {
        async fn interfaces(
            &self,
            _freshness: Freshness,
        ) -> Result<Vec<InterfaceState>, OperationFailure> {
            let next = self.polls.lock().unwrap().pop_front();
            match next {
                Some((delay, result)) => {
                    tokio::time::sleep(delay).await;
                    result
                }
                None => Ok(Vec::new()),
            }
        }

        async fn mac_entries(
            &self,
            _freshness: Freshness,
        ) -> Result<Vec<MacEntry>, OperationFailure> {
            Ok(self.macs.lock().unwrap().clone())
        }
    }

    fn up(name: &str, vlan: u16) -> InterfaceState {
        InterfaceState::new(name, LinkStatus::Up).with_vlan(Vlan::Access(vlan))
    }

    fn down(name: &str) -> InterfaceState {
        InterfaceState::new(name, LinkStatus::Down).with_vlan(Vlan::Access(1))
    }

    fn timeout_failure() -> OperationFailure {
        OperationFailure::new(
            "list_interfaces",
            3,
            Duration::from_secs(3),
            PollError::Timeout {
                command: "show interfaces status".to_string(),
                elapsed: Duration::from_secs(30),
            },
        )
    }

    fn reconciler(source: FakeSource) -> StateReconciler<FakeSource> {
        StateReconciler::new(
            source,
            EventFeed::new(&NotificationSettings::default()),
            PollSettings::default(),
        )
    }

    #[test]
    fn diff_reports_exact_changes() {
        let a = snapshot_of(vec![up("eth1", 10), down("eth2")]);
        let b = snapshot_of(vec![up("eth1", 20), up("eth3", 1)]);

        assert_eq!(
            diff(&a, &b),
            vec![
                ChangeEvent::VlanChanged {
                    interface: "eth1".to_string(),
                    from: Vlan::Access(10),
                    to: Vlan::Access(20),
                },
                ChangeEvent::InterfaceRemoved {
                    interface: "eth2".to_string(),
                },
                ChangeEvent::InterfaceDiscovered {
                    interface: "eth3".to_string(),
                    status: LinkStatus::Up,
                    vlan: Vlan::Access(1),
                },
                ChangeEvent::LinkUp {
                    interface: "eth3".to_string(),
                },
            ]
        );
    }

    #[test]
    fn link_transitions() {
        let a = snapshot_of(vec![down("Gi1/0/1"), up("Gi1/0/2", 1)]);
        let b = snapshot_of(vec![up("Gi1/0/1", 1), down("Gi1/0/2")]);
        let events = diff(&a, &b);
        assert_eq!(
            events,
            vec![
                ChangeEvent::LinkUp {
                    interface: "Gi1/0/1".to_string()
                },
                ChangeEvent::LinkDown {
                    interface: "Gi1/0/2".to_string()
                },
            ]
        );

        let unknown = snapshot_of(vec![InterfaceState::new("Gi1/0/2", LinkStatus::Unknown)
            .with_vlan(Vlan::Access(1))]);
        assert!(diff(&unknown, &snapshot_of(vec![down("Gi1/0/2")])).is_empty());
    }

    #[test]
    fn description_change_is_reported() {
        let a = snapshot_of(vec![down("Gi1/0/4").with_description("printer")]);
        let b = snapshot_of(vec![down("Gi1/0/4").with_description("camera")]);
        assert_eq!(
            diff(&a, &b),
            vec![ChangeEvent::DescriptionChanged {
                interface: "Gi1/0/4".to_string(),
                from: "printer".to_string(),
                to: "camera".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn first_poll_is_a_baseline_and_repeats_are_quiet() {
        let source = FakeSource::default();
        source.push(Ok(vec![up("eth1", 10), down("eth2")]));
        source.push(Ok(vec![up("eth1", 10), down("eth2")]));
        let reconciler = reconciler(source);

        let first = reconciler.poll_once(Freshness::Fresh).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(
            first
                .iter()
                .all(|e| matches!(e, ChangeEvent::InterfaceDiscovered { .. }))
        );

        let second = reconciler.poll_once(Freshness::Fresh).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(reconciler.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn failed_poll_keeps_snapshot_and_publishes_failure() {
        let source = FakeSource::default();
        source.push(Ok(vec![up("eth1", 10), down("eth2")]));
        source.push(Err(timeout_failure()));
        source.push(Ok(vec![up("eth1", 10), down("eth2")]));
        let reconciler = reconciler(source);
        let mut rx = reconciler.events.subscribe();

        reconciler.poll_once(Freshness::Fresh).await.unwrap();
        let before = reconciler.snapshot();

        let failure = reconciler
            .poll_once(Freshness::Fresh)
            .await
            .expect_err("poll fails");
        assert_eq!(failure.attempts, 3);
        assert!(matches!(failure.cause, PollError::Timeout { .. }));
        assert!(Arc::ptr_eq(&before, &reconciler.snapshot()));

        let after = reconciler.poll_once(Freshness::Fresh).await.unwrap();
        assert!(after.is_empty());

        let mut published = Vec::new();
        while let Ok(event) = rx.try_recv() {
            published.push(event);
        }
        assert_eq!(published.len(), 3);
        assert_eq!(published[2], ChangeEvent::PollFailed(failure));
    }

    #[tokio::test]
    async fn macs_on_new_links_are_reported_once() {
        let source = FakeSource::default();
        source.push(Ok(vec![down("Gi1/0/1")]));
        source.push(Ok(vec![up("Gi1/0/1", 1)]));
        source.push(Ok(vec![down("Gi1/0/1")]));
        source.push(Ok(vec![up("Gi1/0/1", 1)]));
        *source.macs.lock().unwrap() = vec![MacEntry {
            vlan: "1".to_string(),
            mac: "0011.2233.4455".to_string(),
            entry_type: "DYNAMIC".to_string(),
            ports: "Gi1/0/1".to_string(),
        }];
        let reconciler = reconciler(source);
        let link_up = ChangeEvent::LinkUp {
            interface: "Gi1/0/1".to_string(),
        };

        reconciler.poll_once(Freshness::Fresh).await.unwrap();
        let came_up = reconciler.poll_once(Freshness::Fresh).await.unwrap();
        assert_eq!(
            came_up,
            vec![
                link_up.clone(),
                ChangeEvent::NewMacSeen {
                    interface: "Gi1/0/1".to_string(),
                    mac: "0011.2233.4455".to_string(),
                    vlan: "1".to_string(),
                },
            ]
        );

        let went_down = reconciler.poll_once(Freshness::Fresh).await.unwrap();
        assert_eq!(
            went_down,
            vec![ChangeEvent::LinkDown {
                interface: "Gi1/0/1".to_string()
            }]
        );
        let again = reconciler.poll_once(Freshness::Fresh).await.unwrap();
        assert_eq!(again, vec![link_up]);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_polls_apply_in_call_order() {
        let source = FakeSource::default();
        source.push(Ok(vec![up("eth1", 10)]));
        source.push_slow(Duration::from_secs(5), Ok(vec![down("eth1")]));
        source.push(Ok(vec![up("eth1", 1)]));
        let reconciler = reconciler(source);
        reconciler.poll_once(Freshness::Fresh).await.unwrap();

        let (slow, quick) = tokio::join!(
            reconciler.poll_once(Freshness::Fresh),
            reconciler.poll_once(Freshness::Fresh)
        );

        assert_eq!(
            slow.unwrap(),
            vec![
                ChangeEvent::LinkDown {
                    interface: "eth1".to_string()
                },
                ChangeEvent::VlanChanged {
                    interface: "eth1".to_string(),
                    from: Vlan::Access(10),
                    to: Vlan::Access(1),
                },
            ]
        );
        assert_eq!(
            quick.unwrap(),
            vec![ChangeEvent::LinkUp {
                interface: "eth1".to_string()
            }]
        );
        assert_eq!(reconciler.snapshot()["eth1"].status, LinkStatus::Up);
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_stops_on_cancel() {
        let source = FakeSource::default();
        for _ in 0..10 {
            source.push(Ok(vec![up("eth1", 10)]));
        }
        let reconciler = Arc::new(reconciler(source));
        let cancel = CancellationToken::new();

        let handle = reconciler
            .clone()
            .spawn(Duration::from_secs(2), cancel.clone());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(reconciler.has_baseline());
        assert_eq!(reconciler.snapshot().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
