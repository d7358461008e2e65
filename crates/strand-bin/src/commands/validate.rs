// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use strand_opcua::ClientConfig;

use super::load_config;
use crate::cli::{Cli, ValidateArgs};
use crate::error::{BinError, BinResult};

/// Validates the configuration and prints a summary.
pub fn validate(cli: &Cli, args: ValidateArgs) -> BinResult<()> {
    let config = load_config(cli)?;

    println!("✓ Configuration is valid");
    println!();
    println!("Summary:");
    println!("  Endpoint:         {}", config.endpoint);
    println!("  Security:         {} / {}", config.security_mode, config.security_policy);
    println!(
        "  Session timeout:  {}",
        humantime::format_duration(config.session_timeout)
    );
    println!(
        "  Publish interval: {}",
        humantime::format_duration(config.subscription.publishing_interval)
    );
    println!("  Max outstanding:  {}", config.publish.max_outstanding);

    let warnings = collect_warnings(&config);
    if !warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &warnings {
            println!("  ⚠ {}", warning);
        }
    }

    if args.show_config {
        let text = serde_json::to_string_pretty(&config)
            .map_err(|e| BinError::config(e.to_string()))?;
        println!();
        println!("Parsed configuration:");
        println!("{}", text);
    }
    Ok(())
}

fn collect_warnings(config: &ClientConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.security_mode.is_none() && !config.identity.is_anonymous() {
        warnings.push("User credentials are sent without message security".to_string());
    }
    if config.keepalive_interval >= config.session_timeout {
        warnings.push(format!(
            "Keep-alive interval {} is not shorter than the session timeout {}",
            humantime::format_duration(config.keepalive_interval),
            humantime::format_duration(config.session_timeout)
        ));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_warnings() {
        let config = ClientConfig::new("opc.tcp://localhost:4840");
        assert!(collect_warnings(&config).is_empty());

        let mut config = ClientConfig::new("opc.tcp://localhost:4840");
        config.keepalive_interval = config.session_timeout + Duration::from_secs(1);
        assert_eq!(collect_warnings(&config).len(), 1);
    }
}
