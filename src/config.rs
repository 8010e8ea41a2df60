// OpenFlowLab: OpenFlow Counter-Prediction Testbed written in Rust
// Copyright (C) 2022-2023 Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! This module contains the code for reading the configuration.

use lazy_static::lazy_static;
use serde::{Deserialize, Deserializer};

macro_rules! expect {
    ($result:expr, $($rest:tt)*) => {
        $result.unwrap_or_else(|e| {
            eprintln!("Error: {}: {}\n", format!($($rest)*), e);
            panic!()
        })
    };
}

lazy_static! {
    pub static ref CONFIG_DIR: String = {
        if cfg!(test) {
            concat!(env!("OUT_DIR"), "/.config").to_string()
        } else {
            expect!(
                std::env::var("OPENFLOW_LAB_CONFIG"),
                "Environment variable 'OPENFLOW_LAB_CONFIG' is not defined!"
            )
        }
    };
    pub static ref CONFIG: Config = {
        let config_str = expect!(
            std::fs::read_to_string(format!("{}/config.toml", *CONFIG_DIR)),
            "Cannot read '{}/config.toml'",
            *CONFIG_DIR
        );
        expect!(
            toml::from_str(&config_str),
            "Cannot parse '{}/config.toml'",
            *CONFIG_DIR
        )
    };
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub controller: ControllerConfig,
    pub engine: EngineConfig,
    pub emulation: EmulationConfig,
    pub query: QueryConfig,
}

/// Configuration for the SDN controller process and its stats interface.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// The command used to launch the controller (resolved via `PATH`).
    pub command: String,
    /// Additional arguments passed before the application list (e.g., `--observe-links`).
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// The controller applications to load.
    pub apps: Vec<String>,
    /// The port on which the controller listens for OpenFlow connections.
    pub openflow_port: u16,
    /// The host on which the stats REST interface is reachable.
    pub rest_host: String,
    /// The port of the stats REST interface.
    pub rest_port: u16,
    /// Directory in which to place the controller log. When `None`, controller output is
    /// discarded.
    #[serde(default)]
    pub log_dir: Option<String>,
}

/// Configuration for the prediction-engine process.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Path to the engine executable. Must point to an executable file.
    pub path: String,
    /// Arguments passed to the engine.
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory in which to place the engine log. When `None`, engine output is discarded.
    #[serde(default)]
    pub log_dir: Option<String>,
}

/// Configuration for the emulated network.
#[derive(Debug, Clone, Deserialize)]
pub struct EmulationConfig {
    /// Seconds to wait after startup until rule installation has stabilized.
    pub settle_time_secs: u64,
    /// The OpenFlow protocol version passed to the switches and the dump CLI.
    pub openflow_protocol: String,
    /// First port used for generated iperf3 flows. Each flow gets a fresh port.
    pub iperf_base_port: u16,
}

/// Configuration for network-facing queries.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Maximum number of invocations for a transiently failing query.
    #[serde(deserialize_with = "deserialize_tries")]
    pub tries: usize,
    /// Base delay between two attempts, in milliseconds.
    pub delay_ms: u64,
    /// Upper bound of the random jitter added to the delay, in milliseconds.
    pub jitter_ms: u64,
}

fn deserialize_tries<'de, D>(de: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let x = usize::deserialize(de)?;
    if x == 0 {
        return Err(serde::de::Error::custom(
            "query tries must be at least 1, but was 0",
        ));
    }
    Ok(x)
}
