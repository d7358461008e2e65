// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `subscribe` command.

use std::collections::HashMap;

use strand_opcua::{
    ChannelSink, MonitoredItemDefinition, MonitoredItemSettings, NodeId, OpcUaClient,
    SubscriptionEvent, SubscriptionSettings,
};
use tracing::{info, warn};

use super::read::format_value;
use super::{load_config, parse_nodes};
use crate::cli::{Cli, OutputFormat, SubscribeArgs};
use crate::error::BinResult;
use crate::shutdown::ShutdownCoordinator;

/// Subscribes to the given nodes and prints data changes until interrupted.
pub async fn subscribe(cli: &Cli, args: SubscribeArgs) -> BinResult<()> {
    let nodes = parse_nodes(&args.nodes)?;
    let config = load_config(cli)?;

    let settings = SubscriptionSettings::with_interval(args.interval)
        .keepalive_count(args.keepalive_count);
    settings.validate()?;
    let item_settings =
        MonitoredItemSettings::with_sampling_interval(args.sampling.unwrap_or(args.interval))
            .with_queue(args.queue_size, true);

    // Client handles are 1-based positions in the node list.
    let by_handle: HashMap<u32, NodeId> = (1u32..).zip(nodes.iter().cloned()).collect();
    let items = by_handle
        .iter()
        .map(|(handle, node)| MonitoredItemDefinition::value(*handle, node.clone(), item_settings.clone()))
        .collect();

    let client = OpcUaClient::connect(config).await?;
    let (sink, mut events) = ChannelSink::new();
    let (handle, results) = client.subscribe(settings, items, sink).await?;
    for result in results.iter().filter(|r| r.status_code.is_bad()) {
        let node = by_handle.get(&result.client_handle);
        warn!(
            node_id = ?node,
            status = %result.status_code,
            "Monitored item rejected"
        );
    }
    info!(subscription = handle, items = results.len(), "Subscribed");

    let shutdown = ShutdownCoordinator::new();
    let signal = shutdown.clone();
    let signal_task = tokio::spawn(async move { signal.wait_for_shutdown().await });
    let mut status = client.watch_status();

    loop {
        tokio::select! {
            _ = shutdown.initiated() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!(status = %current, "Connection status changed");
                if current == strand_opcua::ConnectionStatus::Disconnected {
                    warn!("Connection lost and recovery abandoned");
                    break;
                }
            }
            event = events.recv() => match event {
                Some(event) => print_event(&event, &by_handle, args.format)?,
                None => break,
            },
        }
    }

    signal_task.abort();
    client.disconnect().await?;
    Ok(())
}

fn print_event(
    event: &SubscriptionEvent,
    by_handle: &HashMap<u32, NodeId>,
    format: OutputFormat,
) -> BinResult<()> {
    match event {
        SubscriptionEvent::DataChange { values, .. } => {
            for item in values {
                let Some(node) = by_handle.get(&item.client_handle) else {
                    continue;
                };
                println!("{}", format_value(node, &item.value, format)?);
            }
        }
        SubscriptionEvent::Gap { from, to, .. } => {
            warn!(from, to, "Notifications lost");
        }
        SubscriptionEvent::Discontinuity {
            old_subscription_id,
            new_subscription_id,
            ..
        } => {
            warn!(
                old_subscription_id,
                new_subscription_id, "Subscription recreated, values in between are lost"
            );
        }
        SubscriptionEvent::StatusChange { status, .. } => {
            warn!(status = %status, "Subscription status changed");
        }
        SubscriptionEvent::StateChanged { from, to, .. } => {
            info!(from = %from, to = %to, "Subscription state changed");
        }
        SubscriptionEvent::Events { events, .. } => {
            info!(count = events.len(), "Events received");
        }
    }
    Ok(())
}
