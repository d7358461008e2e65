// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `read` command.

use strand_opcua::codec::JsonEncodable;
use strand_opcua::{DataValue, NodeId, OpcUaClient};

use super::{load_config, parse_nodes};
use crate::cli::{Cli, OutputFormat, ReadArgs};
use crate::error::{BinError, BinResult};

/// Reads the given nodes once and prints their values.
pub async fn read(cli: &Cli, args: ReadArgs) -> BinResult<()> {
    let nodes = parse_nodes(&args.nodes)?;
    let config = load_config(cli)?;

    let client = OpcUaClient::connect(config).await?;
    let result = client.read(&nodes).await;
    if let Err(e) = client.disconnect().await {
        tracing::debug!(error = %e, "Disconnect failed");
    }

    for (node, value) in nodes.iter().zip(result?) {
        println!("{}", format_value(node, &value, args.format)?);
    }
    Ok(())
}

/// Formats one value for output.
pub(crate) fn format_value(
    node: &NodeId,
    value: &DataValue,
    format: OutputFormat,
) -> BinResult<String> {
    match format {
        OutputFormat::Text => {
            let timestamp = value
                .source_timestamp
                .or(value.server_timestamp)
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string());
            Ok(format!(
                "{}\t{:?}\t{}\t{}",
                node,
                value.value,
                value.status(),
                timestamp
            ))
        }
        OutputFormat::Json => {
            let body = value
                .to_json()
                .map_err(|e| BinError::Client(e.into()))?;
            Ok(serde_json::json!({ "node": node.to_string(), "value": body }).to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_text() {
        let node = NodeId::numeric(0, 2258);
        let line = format_value(&node, &DataValue::new(42i32), OutputFormat::Text).unwrap();
        assert!(line.starts_with("i=2258\t"));
        assert!(line.ends_with("\t-"));
    }

    #[test]
    fn test_format_json() {
        let node = NodeId::string(2, "Temp");
        let line = format_value(&node, &DataValue::new(1.5f64), OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["node"], "ns=2;s=Temp");
        assert!(parsed["value"].is_object());
    }
}
