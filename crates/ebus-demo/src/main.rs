//! # Ebus Demo
//!
//! Four nodes on one bus, each on its own task.
//!
//! ```text
//!                ┌────────┐
//!                │ Node4  │ every interval: notify / broadcast / indicate
//!                └───┬────┘
//!        ┌───────────┼───────────┐
//!        ↓           ↓           ↓
//!   ┌────────┐  ┌────────┐  ┌────────┐
//!   │ Node1  │  │ Node2  │  │ Node3  │  answer indications with the same
//!   └────────┘  └────────┘  └────────┘  event id, payload and sequence
//! ```
//!
//! Every node polls its mailbox on a short period and dispatches what it
//! finds. Ctrl+C prints the bus snapshot, stops the tasks and tears the bus
//! down.

mod config;

use std::time::Duration;

use anyhow::{Context, Result};
use ebus::{handler_fn, Bus, BusConfig, Envelope, Node, NodeEvent, NodeHandler};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{DemoConfig, LogConfig, Scenario};

/// Event ids used by the demo traffic.
mod events {
    pub const BROADCAST: u16 = 0x8001;
    pub const P2P: u16 = 0x8002;
    pub const ASYNC: u16 = 0x8004;
}

const RESPONDERS: [&str; 3] = ["Node1", "Node2", "Node3"];
const DRIVER: &str = "Node4";

/// Logs deliveries and answers indications by echoing them back.
fn echo_handler() -> impl NodeHandler {
    handler_fn(|node: &Node, event: NodeEvent<'_>| match event {
        NodeEvent::Received(message) => info!(
            node = node.name(),
            kind = %message.kind(),
            evt = message.event_id(),
            src = message.source(),
            seq = message.sequence(),
            payload = ?message.payload(),
            "Message received"
        ),
        NodeEvent::IndicationReceived { message, requester } => {
            info!(
                node = node.name(),
                from = requester.name(),
                evt = message.event_id(),
                seq = message.sequence(),
                "Indication received"
            );
            let reply = Envelope::reply_to(message, message.payload())
                .and_then(|reply| node.respond(&requester, reply));
            match reply {
                Ok(sent) => debug!(node = node.name(), seq = sent.sequence(), "Response sent"),
                Err(e) => warn!(node = node.name(), error = %e, "Response failed"),
            }
        }
        NodeEvent::IndicationAcknowledged(message) => info!(
            node = node.name(),
            src = message.source(),
            evt = message.event_id(),
            seq = message.sequence(),
            payload = ?message.payload(),
            "Indication acknowledged"
        ),
    })
}

/// Polls a node's mailbox until shutdown, then deregisters it.
async fn run_node(mut node: Node, poll: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(poll);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("[{}] Shutdown signal received", node.name());
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = node.drain().await {
                    error!(node = node.name(), error = %e, "Receive failed, stopping node");
                    break;
                }
            }
        }
    }
    node.deregister();
}

/// One round of traffic from the driver node.
fn send_round(node: &Node, scenario: Scenario, round: u32) -> ebus::Result<Envelope> {
    let payload = round.to_le_bytes();
    match scenario {
        Scenario::Broadcast if round % 2 == 0 => {
            node.notify(RESPONDERS[0], Envelope::new(events::P2P, &payload)?)
        }
        Scenario::Broadcast => node.broadcast(Envelope::new(events::BROADCAST, &payload)?),
        Scenario::Indication => {
            let target = RESPONDERS[round as usize % RESPONDERS.len()];
            node.indicate_async(target, Envelope::new(events::ASYNC, &payload)?)
        }
    }
}

/// Gives up on indications nobody answered in time.
fn reap_stale(node: &Node) {
    for wait in node.stale_waits() {
        warn!(
            node = node.name(),
            seq = wait.sequence,
            dst = wait.destination,
            state = %wait.state,
            "Indication unanswered, releasing wait row"
        );
        node.release_wait(wait.sequence);
    }
}

/// Drives traffic from Node4 and consumes its responses.
async fn drive(mut node: Node, config: DemoConfig, mut shutdown: watch::Receiver<bool>) {
    let mut send_tick = tokio::time::interval(config.interval);
    let mut poll_tick = tokio::time::interval(config.poll);
    let mut round: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("[{}] Shutdown signal received", node.name());
                break;
            }
            _ = send_tick.tick() => {
                match send_round(&node, config.scenario, round) {
                    Ok(sent) => debug!(
                        kind = %sent.kind(),
                        seq = sent.sequence(),
                        round,
                        "Round sent"
                    ),
                    Err(e) if e.is_backpressure() => {
                        warn!(round, error = %e, "Bus saturated, round skipped");
                    }
                    Err(e) => error!(round, error = %e, "Round failed"),
                }
                round = round.wrapping_add(1);
            }
            _ = poll_tick.tick() => {
                if let Err(e) = node.drain().await {
                    error!(node = node.name(), error = %e, "Receive failed, stopping driver");
                    break;
                }
                reap_stale(&node);
            }
        }
    }
    node.deregister();
}

fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .with_context(|| format!("invalid log filter {:?}", config.filter))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&LogConfig::from_env())?;

    let bus_config = BusConfig::from_env();
    let demo = DemoConfig::from_env();
    info!(?bus_config, ?demo, "Starting ebus demo");

    let bus = Bus::new(bus_config).context("invalid bus configuration")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();
    for name in RESPONDERS {
        let node = bus
            .register(name, echo_handler())
            .with_context(|| format!("failed to register {name}"))?;
        tasks.push(tokio::spawn(run_node(node, demo.poll, shutdown_rx.clone())));
    }
    let driver = bus
        .register(DRIVER, echo_handler())
        .with_context(|| format!("failed to register {DRIVER}"))?;
    tasks.push(tokio::spawn(drive(driver, demo, shutdown_rx)));

    info!(nodes = bus.node_count(), "Bus is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    println!("{}", bus.snapshot());

    info!("Initiating graceful shutdown...");
    if let Err(e) = shutdown_tx.send(true) {
        error!("Failed to send shutdown signal: {}", e);
    }
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Node task panicked");
        }
    }

    let remaining = bus.shutdown();
    info!(remaining, "Shutdown complete");
    Ok(())
}
