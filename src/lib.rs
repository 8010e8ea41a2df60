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

//! # OpenFlowLab
//!
//! This library manages a verification testbed for an OpenFlow counter-prediction engine. It
//! boots an emulated network (Mininet with Open vSwitch), an SDN controller, and the engine
//! under test, generates background traffic, and measures every forwarding rule twice: the
//! *real* counters straight from the switch's flow table, and the *predicted* counters as
//! reported by the engine through the controller's flow-stats interface.
//!
//! The testbed is a typestate: [`Testbed<Inactive>`] can only be configured and started, and
//! [`Testbed<Active>`] exposes the measurement operations. [`Testbed::start`] consumes the
//! inactive testbed and returns the active one; [`Testbed::stop`] does the reverse.
//!
//! The environment variable `OPENFLOW_LAB_CONFIG` must point to a directory containing
//! `config.toml` (see [`config`]).
//!
//! ## Example
//!
//! ```no_run
//! use openflow_lab::{Testbed, Topology};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut testbed = Testbed::new(Topology::Linear { switches: 2 })?
//!         .start()
//!         .await?;
//!
//!     testbed.add_flow((1_000_000, 10_000_000)).await?;
//!     for rule in testbed.rules().await? {
//!         let counter = testbed.get_counter(&rule).await?;
//!         println!("{rule}\n  real: {:?}, predicted: {:?}", counter.real, counter.predicted);
//!     }
//!
//!     testbed.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod dpctl;
pub mod net;
pub mod query;
pub mod reconcile;
pub mod retry;
pub mod rule;
pub mod supervisor;
pub mod traffic;

#[cfg(test)]
mod test;

use std::time::Duration;

use thiserror::Error;

use config::CONFIG;
use controller::StatsClient;
use dpctl::Dpctl;
use net::{Emulation, MininetNetwork, NetError};
use query::QueryError;
use reconcile::Reconciler;
use retry::RetryPolicy;
use rule::{CounterPair, Rule};
use supervisor::{timestamped_log, ManagedProcess, SupervisorError};
use traffic::{Bandwidth, Flow, TrafficError, TrafficManager};

pub use net::Topology;

/// State of a testbed that is not yet (or no longer) running.
pub struct Inactive;

/// State of a running testbed, holding the handles built from the live network.
pub struct Active {
    dpctl: Dpctl,
    stats: StatsClient,
    traffic: TrafficManager,
}

/// The verification testbed. See the crate documentation for an overview.
pub struct Testbed<S = Inactive> {
    network: Box<dyn Emulation>,
    controller: ManagedProcess,
    engine: Option<ManagedProcess>,
    retry: RetryPolicy,
    state: S,
}

impl Testbed<Inactive> {
    /// Create a testbed for the given topology, including the prediction engine. The engine
    /// executable is checked here, so a misconfigured path fails before anything is booted.
    pub fn new(topo: Topology) -> Result<Self, TestbedError> {
        let mut engine =
            ManagedProcess::new("engine", &CONFIG.engine.path, CONFIG.engine.args.clone())?;
        if let Some(dir) = &CONFIG.engine.log_dir {
            engine = engine.with_log_file(timestamped_log(dir, "engine")?);
        }
        Ok(Self::build(topo, Some(engine)))
    }

    /// Create a testbed without the prediction engine, for debugging the testbed itself against
    /// a plain controller/switch setup.
    pub fn debug(topo: Topology) -> Result<Self, TestbedError> {
        Ok(Self::build(topo, None))
    }

    fn build(topo: Topology, engine: Option<ManagedProcess>) -> Self {
        let cfg = &CONFIG.controller;
        let mut args = cfg.extra_args.clone();
        args.push("--ofp-tcp-listen-port".to_string());
        args.push(cfg.openflow_port.to_string());
        args.push("--wsapi-host".to_string());
        args.push(cfg.rest_host.clone());
        args.push("--wsapi-port".to_string());
        args.push(cfg.rest_port.to_string());
        args.extend(cfg.apps.iter().cloned());
        let controller = ManagedProcess::from_command("controller", &cfg.command, args);

        let retry = RetryPolicy::new(CONFIG.query.tries)
            .with_delay(Duration::from_millis(CONFIG.query.delay_ms))
            .with_jitter(Duration::from_millis(CONFIG.query.jitter_ms));

        Self {
            network: Box::new(MininetNetwork::new(topo)),
            controller,
            engine,
            retry,
            state: Inactive,
        }
    }

    /// Replace the emulation backend (used by tests to inject a mock network).
    pub fn with_network(mut self, network: impl Emulation + 'static) -> Self {
        self.network = Box::new(network);
        self
    }

    /// Boot everything, in dependency order: controller first (the switches connect to it on
    /// startup), then the emulated network, then the engine; finally wait for the configured
    /// settle time so that rule installation has stabilized.
    pub async fn start(mut self) -> Result<Testbed<Active>, TestbedError> {
        if let Some(dir) = &CONFIG.controller.log_dir {
            self.controller = self.controller.with_log_file(timestamped_log(dir, "controller")?);
        }
        self.controller.start()?;
        self.network.start().await?;

        let dpctl = Dpctl::new(self.network.switches());
        let traffic = TrafficManager::new(self.network.hosts());
        let stats = StatsClient::from_config();

        if let Some(engine) = &mut self.engine {
            engine.start()?;
        }
        tokio::time::sleep(Duration::from_secs(CONFIG.emulation.settle_time_secs)).await;

        log::info!("Testbed is up");
        Ok(Testbed {
            network: self.network,
            controller: self.controller,
            engine: self.engine,
            retry: self.retry,
            state: Active {
                dpctl,
                stats,
                traffic,
            },
        })
    }
}

impl Testbed<Active> {
    /// Tear everything down, in reverse boot order. Active traffic is stopped first so that no
    /// orphaned traffic processes survive the network.
    pub async fn stop(mut self) -> Result<Testbed<Inactive>, TestbedError> {
        self.state.traffic.delete_all_flows().await?;
        if let Some(engine) = &mut self.engine {
            engine.stop().await?;
        }
        self.network.stop().await?;
        self.controller.stop().await?;

        log::info!("Testbed is down");
        Ok(Testbed {
            network: self.network,
            controller: self.controller,
            engine: self.engine,
            retry: self.retry,
            state: Inactive,
        })
    }

    /// Number of switches in the emulated network.
    pub fn switch_num(&self) -> usize {
        self.state.dpctl.switch_num()
    }

    /// Total number of forwarding rules across all switches, excluding the engine's reserved
    /// table 0.
    pub async fn rule_num(&self) -> Result<usize, TestbedError> {
        Ok(self
            .retry
            .run(|| self.state.dpctl.rule_count(false))
            .await?)
    }

    /// All forwarding rules of all switches, excluding the engine's reserved table 0.
    pub async fn rules(&self) -> Result<Vec<Rule>, TestbedError> {
        let rules = self.retry.run(|| self.state.dpctl.dump_all()).await?;
        Ok(rules.into_iter().filter(|r| r.table_id != 0).collect())
    }

    /// Measure one rule: real counters from the switch, predicted counters through the
    /// controller. Transient failures (races with rule installation) are retried up to the
    /// configured bound.
    pub async fn get_counter(&self, rule: &Rule) -> Result<CounterPair, TestbedError> {
        let reconciler = Reconciler::new(&self.state.dpctl, &self.state.stats);
        Ok(self.retry.run(|| reconciler.get_counter(rule)).await?)
    }

    /// Start a background flow between two random hosts.
    pub async fn add_flow(&mut self, bandwidth: impl Into<Bandwidth>) -> Result<Flow, TestbedError> {
        Ok(self
            .state
            .traffic
            .add_random_flow(bandwidth)
            .await?
            .clone())
    }

    /// Stop the background flow with the given ID.
    pub async fn delete_flow(&mut self, id: u64) -> Result<Flow, TestbedError> {
        Ok(self.state.traffic.delete_flow(id).await?)
    }

    /// Stop a random background flow.
    pub async fn delete_random_flow(&mut self) -> Result<Flow, TestbedError> {
        Ok(self.state.traffic.delete_random_flow().await?)
    }

    /// Number of active background flows.
    pub fn flow_num(&self) -> usize {
        self.state.traffic.flow_num()
    }

    /// Total target bandwidth of all active background flows, in bits per second.
    pub fn network_load(&self) -> u64 {
        self.state.traffic.network_load()
    }

    /// Start the prediction engine if it is not running.
    pub fn start_engine(&mut self) -> Result<(), TestbedError> {
        match &mut self.engine {
            Some(engine) => Ok(engine.start()?),
            None => Err(TestbedError::NoEngine),
        }
    }

    /// Stop the prediction engine if it is running.
    pub async fn stop_engine(&mut self) -> Result<(), TestbedError> {
        match &mut self.engine {
            Some(engine) => Ok(engine.stop().await?),
            None => Err(TestbedError::NoEngine),
        }
    }
}

/// Any error of the testbed.
#[derive(Debug, Error)]
pub enum TestbedError {
    /// Error while interacting with the emulated network.
    #[error("{0}")]
    Net(#[from] NetError),
    /// Error while supervising an external process.
    #[error("{0}")]
    Supervisor(#[from] SupervisorError),
    /// A rule query failed (past the retry bound, or non-transiently).
    #[error("{0}")]
    Query(#[from] QueryError),
    /// Error while managing background traffic.
    #[error("{0}")]
    Traffic(#[from] TrafficError),
    /// I/O Error
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    /// The testbed was built without the prediction engine.
    #[error("This testbed has no prediction engine")]
    NoEngine,
}
