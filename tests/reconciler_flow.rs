use std::sync::Arc;
use std::time::Duration;

use portwatch::config::{PollSettings, PollerConfig};
use portwatch::device::SwitchManager;
use portwatch::events::ChangeEvent;
use portwatch::model::{ConnectionConfig, LinkStatus, Vlan};
use portwatch::reconciler::StateReconciler;
use portwatch::resilience::Freshness;
use portwatch::transport::{ScriptedPort, ScriptedTransport};
use tokio_util::sync::CancellationToken;

fn setup() -> (ScriptedTransport, StateReconciler<SwitchManager>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = ScriptedTransport::new("access-sw")
        .privileged()
        .with_port(ScriptedPort::new("Gi1/0/1").up().vlan(Vlan::Access(10)))
        .with_port(ScriptedPort::new("Gi1/0/2"))
        .with_port(ScriptedPort::new("Gi1/0/3").up().vlan(Vlan::Access(20)));
    let connection = ConnectionConfig::new("10.0.0.2", "admin", "pw");
    let switch =
        SwitchManager::new(device.clone(), connection, &PollerConfig::default()).expect("spawn");
    let events = switch.events().clone();
    let reconciler = StateReconciler::new(switch, events, PollSettings::default());
    (device, reconciler)
}

#[tokio::test(start_paused = true)]
async fn poll_cycle_reports_device_changes() {
    let (device, reconciler) = setup();

    let baseline = reconciler.poll_once(Freshness::Fresh).await.expect("baseline");
    assert_eq!(baseline.len(), 3);
    assert!(
        baseline
            .iter()
            .all(|e| matches!(e, ChangeEvent::InterfaceDiscovered { .. }))
    );

    device.set_link("Gi1/0/2", true);
    device.learn_mac(1, "aabb.cc00.0102", "Gi1/0/2");
    device.set_vlan("Gi1/0/3", Vlan::Access(30));
    device.remove_port("Gi1/0/1");

    let changes = reconciler.poll_once(Freshness::Fresh).await.expect("poll");
    assert_eq!(
        changes,
        vec![
            ChangeEvent::LinkUp {
                interface: "Gi1/0/2".to_string()
            },
            ChangeEvent::VlanChanged {
                interface: "Gi1/0/3".to_string(),
                from: Vlan::Access(20),
                to: Vlan::Access(30),
            },
            ChangeEvent::InterfaceRemoved {
                interface: "Gi1/0/1".to_string()
            },
            ChangeEvent::NewMacSeen {
                interface: "Gi1/0/2".to_string(),
                mac: "aabb.cc00.0102".to_string(),
                vlan: "1".to_string(),
            },
        ]
    );

    let quiet = reconciler.poll_once(Freshness::Fresh).await.expect("poll");
    assert!(quiet.is_empty());

    let snapshot = reconciler.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot["Gi1/0/2"].status, LinkStatus::Up);
}

#[tokio::test(start_paused = true)]
async fn unreachable_device_is_no_information() {
    let (device, reconciler) = setup();
    reconciler.poll_once(Freshness::Fresh).await.expect("baseline");
    let mut events = reconciler.source().subscribe();

    device.drop_connection();
    device.fail_next_connects(100);

    let failure = reconciler
        .poll_once(Freshness::Fresh)
        .await
        .expect_err("device down");
    assert_eq!(failure.operation, "list_interfaces");
    assert_eq!(reconciler.snapshot().len(), 3);
    assert!(matches!(
        events.recv().await.expect("event"),
        ChangeEvent::PollFailed(_)
    ));

    device.fail_next_connects(0);
    let recovered = reconciler.poll_once(Freshness::Fresh).await.expect("poll");
    assert!(recovered.is_empty());
}

#[tokio::test(start_paused = true)]
async fn background_polling_publishes_until_cancelled() {
    let (device, reconciler) = setup();
    let reconciler = Arc::new(reconciler);
    let mut events = reconciler.source().subscribe();
    let cancel = CancellationToken::new();

    let task = reconciler
        .clone()
        .spawn(Duration::from_secs(2), cancel.clone());

    for _ in 0..3 {
        let event = events.recv().await.expect("discovered");
        assert!(matches!(event, ChangeEvent::InterfaceDiscovered { .. }));
    }

    device.set_link("Gi1/0/1", false);
    let event = events.recv().await.expect("link down");
    assert_eq!(
        event,
        ChangeEvent::LinkDown {
            interface: "Gi1/0/1".to_string()
        }
    );

    cancel.cancel();
    task.await.expect("task");
    assert_eq!(reconciler.source().notifications().len(), 4);
}
