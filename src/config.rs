// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Server settings. Sources are layered: built-in defaults, then an
/// optional config file, then `REGOSERVE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,

    /// Directory holding `<id>.rego` policy files.
    #[serde(default)]
    pub policy_dir: Option<PathBuf>,

    /// Write policy changes back to `policy_dir`.
    #[serde(default)]
    pub persist_policies: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8181)),
            policy_dir: None,
            persist_policies: false,
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl ServerConfig {
    pub fn load(path: Option<&str>) -> Result<ServerConfig, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&ServerConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("REGOSERVE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
