use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use portwatch::config::PollerConfig;
use portwatch::device::SwitchManager;
use portwatch::model::{ConnectionConfig, Vlan};
use portwatch::reconciler::StateReconciler;
use portwatch::resilience::Freshness;
use portwatch::transport::{
    ConnectionSecurityOptions, ScriptedPort, ScriptedTransport, SshTransport, Transport,
};
use tokio_util::sync::CancellationToken;

fn print_usage() {
    eprintln!(
        "Usage: cargo run --example watch_switch -- [--scripted] [--legacy] [--config <poller.json>] [--schema]\n\
         Without --scripted the switch is read from PORTWATCH_HOST, PORTWATCH_USER,\n\
         PORTWATCH_PASSWORD and optionally PORTWATCH_SECRET."
    );
}

fn connection_from_env() -> anyhow::Result<ConnectionConfig> {
    let host = env::var("PORTWATCH_HOST").context("PORTWATCH_HOST is not set")?;
    let user = env::var("PORTWATCH_USER").unwrap_or_else(|_| "admin".to_string());
    let password = env::var("PORTWATCH_PASSWORD").context("PORTWATCH_PASSWORD is not set")?;
    let mut connection = ConnectionConfig::new(host, user, password);
    if let Ok(secret) = env::var("PORTWATCH_SECRET") {
        connection = connection.with_secret(secret);
    }
    Ok(connection)
}

fn scripted_switch() -> ScriptedTransport {
    ScriptedTransport::new("lab-sw1")
        .with_secret("lab")
        .with_port(
            ScriptedPort::new("Gi1/0/1")
                .up()
                .vlan(Vlan::Access(10))
                .description("uplink"),
        )
        .with_port(ScriptedPort::new("Gi1/0/2").vlan(Vlan::Access(20)))
        .with_port(ScriptedPort::new("Gi1/0/3").up().vlan(Vlan::Trunk))
}

/// Flips a few ports on the scripted switch so the watcher has something to report.
async fn simulate_activity(device: ScriptedTransport, cancel: CancellationToken) {
    let steps: [(&str, fn(&ScriptedTransport)); 3] = [
        ("printer plugged into Gi1/0/2", |d| {
            d.learn_mac(20, "0050.56c0.0008", "Gi1/0/2");
            d.set_link("Gi1/0/2", true);
        }),
        ("Gi1/0/1 moved to VLAN 30", |d| d.set_vlan("Gi1/0/1", Vlan::Access(30))),
        ("Gi1/0/3 unplugged", |d| d.set_link("Gi1/0/3", false)),
    ];
    for (label, step) in steps {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(Duration::from_secs(5)) => {
                println!("[sim] {label}");
                step(&device);
            }
        }
    }
}

async fn watch<T: Transport>(
    transport: T,
    connection: ConnectionConfig,
    config: PollerConfig,
    run_for: Option<Duration>,
) -> anyhow::Result<()> {
    let switch = SwitchManager::new(transport, connection, &config)?;

    let identity = switch.device_identity(Freshness::Cached).await?;
    println!(
        "{} {} (serial {}, version {}), up {}",
        identity.hostname, identity.model, identity.serial, identity.version, identity.uptime
    );
    for interface in switch.list_interfaces(Freshness::Fresh).await? {
        println!(
            "  {:<12} {:<8} vlan {:<6} {}",
            interface.name, interface.status, interface.vlan, interface.description
        );
    }

    let mut events = switch.subscribe();
    let reconciler = Arc::new(StateReconciler::new(
        switch.clone(),
        switch.events().clone(),
        config.poll.clone(),
    ));
    let cancel = CancellationToken::new();
    let poller = reconciler.spawn_default(cancel.clone());

    let stop = async {
        match run_for {
            Some(limit) => tokio::time::sleep(limit).await,
            None => {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    eprintln!("ctrl-c handler failed: {err}");
                }
            }
        }
    };
    tokio::pin!(stop);

    loop {
        tokio::select! {
            () = &mut stop => break,
            event = events.recv() => match event {
                Ok(event) => println!("event: {event}"),
                Err(err) => {
                    eprintln!("event feed: {err}");
                    if matches!(err, tokio::sync::broadcast::error::RecvError::Closed) {
                        break;
                    }
                }
            },
        }
    }

    cancel.cancel();
    poller.await?;

    let health = switch.health_check().await;
    let telemetry = health.telemetry;
    println!(
        "connected={} test_passed={} commands={} cache_hit_ratio={:.1}% avg_response={:.3}s errors={}",
        health.connected,
        health.connectivity_test_passed,
        telemetry.commands_executed,
        telemetry.cache_hit_ratio(),
        telemetry.avg_response_time,
        telemetry.errors
    );
    if let Some(err) = health.last_error {
        println!("last error: {err}");
    }
    switch.disconnect().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut scripted = false;
    let mut legacy = false;
    let mut config = PollerConfig::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--scripted" => scripted = true,
            "--legacy" => legacy = true,
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                config = PollerConfig::load(path)
                    .with_context(|| format!("loading poller config from '{path}'"))?;
            }
            "--schema" => {
                println!("{}", PollerConfig::json_schema()?);
                return Ok(());
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            unknown => {
                print_usage();
                bail!("unknown flag: {unknown}");
            }
        }
    }

    if scripted {
        let device = scripted_switch();
        let connection = ConnectionConfig::new("lab-sw1", "admin", "lab").with_secret("lab");
        let cancel = CancellationToken::new();
        let simulator = tokio::spawn(simulate_activity(device.clone(), cancel.clone()));
        let result = watch(device, connection, config, Some(Duration::from_secs(20))).await;
        cancel.cancel();
        simulator.await?;
        return result;
    }

    let security = if legacy {
        ConnectionSecurityOptions::legacy_compatible()
    } else {
        ConnectionSecurityOptions::default()
    };
    watch(
        SshTransport::new(security),
        connection_from_env()?,
        config,
        None,
    )
    .await
}
