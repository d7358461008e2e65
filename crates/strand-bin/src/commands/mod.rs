// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.

mod browse;
mod read;
mod subscribe;
mod validate;
mod version;

pub use browse::browse;
pub use read::read;
pub use subscribe::subscribe;
pub use validate::validate;
pub use version::version;

use std::str::FromStr;

use strand_opcua::{ClientConfig, NodeId};

use crate::cli::{Cli, Commands};
use crate::error::{BinError, BinResult};

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match cli.command.clone() {
        Commands::Read(args) => read::read(&cli, args).await,
        Commands::Subscribe(args) => subscribe::subscribe(&cli, args).await,
        Commands::Browse(args) => browse::browse(&cli, args).await,
        Commands::Validate(args) => validate::validate(&cli, args),
        Commands::Version => version::version(&cli),
    }
}

/// Prefix of environment variables overriding configuration values, e.g.
/// `STRAND_REQUEST_TIMEOUT=5s` or `STRAND_RECONNECT__MAX_ATTEMPTS=10`.
const ENV_PREFIX: &str = "STRAND";

/// Builds the client configuration from the config file, `STRAND_*`
/// environment variables and CLI overrides, in increasing precedence.
pub fn load_config(cli: &Cli) -> BinResult<ClientConfig> {
    load_layered(cli, None)
}

/// Layered loader; `env` replaces the process environment when given.
fn load_layered(cli: &Cli, env: Option<config::Map<String, String>>) -> BinResult<ClientConfig> {
    let context = match &cli.config {
        Some(path) => format!("loading {}", path.display()),
        None => "loading configuration".to_string(),
    };
    let mut builder = config::Config::builder();

    if let Some(path) = &cli.config {
        if !path.is_file() {
            return Err(BinError::io(format!("{} not found", path.display())));
        }
        // Format follows the extension: .yaml/.yml, .toml or .json.
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env),
    );

    if let Some(endpoint) = &cli.endpoint {
        builder = builder
            .set_override("endpoint", endpoint.as_str())
            .map_err(|e| BinError::config(e.to_string()))?;
    }

    let settings = builder
        .build()
        .map_err(|e| BinError::config(e.to_string()).with_context(context.clone()))?;
    if settings.get_string("endpoint").is_err() {
        return Err(BinError::config(
            "no endpoint given; pass --endpoint or --config",
        ));
    }
    let config: ClientConfig = settings
        .try_deserialize()
        .map_err(|e| BinError::config(e.to_string()).with_context(context))?;

    config
        .validate()
        .map_err(|e| BinError::config(e.to_string()))?;
    Ok(config)
}

/// Parses node ids given on the command line.
pub fn parse_nodes(nodes: &[String]) -> BinResult<Vec<NodeId>> {
    nodes
        .iter()
        .map(|text| {
            NodeId::from_str(text)
                .map_err(|e| BinError::argument(format!("'{}': {}", text, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn config_file(suffix: &str, body: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_nodes() {
        let nodes = parse_nodes(&["i=2258".to_string(), "ns=2;s=Temp".to_string()]).unwrap();
        assert_eq!(nodes[0], NodeId::numeric(0, 2258));
        assert_eq!(nodes[1], NodeId::string(2, "Temp"));

        let err = parse_nodes(&["ns=;x".to_string()]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_load_config_from_endpoint() {
        let cli = Cli::parse_from(["strand", "-e", "opc.tcp://localhost:4840", "version"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.endpoint, "opc.tcp://localhost:4840");
    }

    #[test]
    fn test_load_config_requires_endpoint() {
        let cli = Cli::parse_from(["strand", "version"]);
        assert!(matches!(load_config(&cli), Err(BinError::Configuration(_))));
    }

    #[test]
    fn test_load_config_rejects_bad_endpoint() {
        let cli = Cli::parse_from(["strand", "-e", "http://localhost", "version"]);
        assert!(matches!(load_config(&cli), Err(BinError::Configuration(_))));
    }

    #[test]
    fn test_load_config_from_yaml() {
        let file = config_file(
            ".yaml",
            "endpoint: opc.tcp://plc:4840\napplication_name: Line 3\nrequest_timeout: 4s\n",
        );
        let path = file.path().to_str().unwrap();
        let cli = Cli::parse_from(["strand", "-c", path, "version"]);
        let config = load_layered(&cli, Some(config::Map::new())).unwrap();
        assert_eq!(config.endpoint, "opc.tcp://plc:4840");
        assert_eq!(config.application_name, "Line 3");
        assert_eq!(config.request_timeout, Duration::from_secs(4));
    }

    #[test]
    fn test_load_config_from_toml_with_cli_endpoint() {
        let file = config_file(".toml", "endpoint = \"opc.tcp://plc:4840\"\n");
        let path = file.path().to_str().unwrap();
        let cli = Cli::parse_from(["strand", "-c", path, "-e", "opc.tcp://backup:4841", "version"]);
        let config = load_layered(&cli, Some(config::Map::new())).unwrap();
        assert_eq!(config.endpoint, "opc.tcp://backup:4841");
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = config_file(
            ".json",
            r#"{"endpoint": "opc.tcp://plc:4840", "request_timeout": "4s"}"#,
        );
        let path = file.path().to_str().unwrap();
        let cli = Cli::parse_from(["strand", "-c", path, "version"]);
        let mut env = config::Map::new();
        env.insert("STRAND_REQUEST_TIMEOUT".to_string(), "9s".to_string());
        env.insert("STRAND_APPLICATION_NAME".to_string(), "from-env".to_string());

        let config = load_layered(&cli, Some(env)).unwrap();
        assert_eq!(config.endpoint, "opc.tcp://plc:4840");
        assert_eq!(config.request_timeout, Duration::from_secs(9));
        assert_eq!(config.application_name, "from-env");
    }

    #[test]
    fn test_endpoint_from_environment_only() {
        let cli = Cli::parse_from(["strand", "version"]);
        let mut env = config::Map::new();
        env.insert("STRAND_ENDPOINT".to_string(), "opc.tcp://env-host:4840".to_string());
        let config = load_layered(&cli, Some(env)).unwrap();
        assert_eq!(config.endpoint, "opc.tcp://env-host:4840");
    }

    #[test]
    fn test_missing_config_file() {
        let cli = Cli::parse_from(["strand", "-c", "/nonexistent/strand.yaml", "version"]);
        assert!(matches!(
            load_layered(&cli, Some(config::Map::new())),
            Err(BinError::Io(_))
        ));
    }
}
