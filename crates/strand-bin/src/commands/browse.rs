// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `browse` command.

use strand_opcua::OpcUaClient;

use super::{load_config, parse_nodes};
use crate::cli::{BrowseArgs, Cli, OutputFormat};
use crate::error::BinResult;

/// Lists the children of a node.
pub async fn browse(cli: &Cli, args: BrowseArgs) -> BinResult<()> {
    let node = parse_nodes(std::slice::from_ref(&args.node))?.remove(0);
    let config = load_config(cli)?;

    let client = OpcUaClient::connect(config).await?;
    let result = client.browse(&node).await;
    if let Err(e) = client.disconnect().await {
        tracing::debug!(error = %e, "Disconnect failed");
    }

    for reference in result? {
        let name = reference.display_name.text.clone().unwrap_or_default();
        match args.format {
            OutputFormat::Text => println!(
                "{}\t{:?}\t{}",
                reference.node_id, reference.node_class, name
            ),
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({
                    "node": reference.node_id.to_string(),
                    "class": format!("{:?}", reference.node_class),
                    "browse_name": reference.browse_name.name,
                    "display_name": name,
                })
            ),
        }
    }
    Ok(())
}
