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

//! Generation of background traffic between emulated hosts with `iperf3`.
//!
//! Each flow is one server/client pair running detached inside the two hosts' namespaces. The
//! manager remembers the process IDs it got acknowledged at spawn time, so that a flow can be
//! torn down precisely without touching any other flow.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::seq::IteratorRandom;
use rand::Rng;
use thiserror::Error;

use crate::config::CONFIG;
use crate::net::{HostHandle, NetError};

/// Target bandwidth of one flow, in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    /// Exactly this rate.
    Fixed(u64),
    /// A rate drawn uniformly from the (inclusive) range when the flow is created.
    Range(u64, u64),
}

impl Bandwidth {
    /// The concrete rate for one new flow.
    fn resolve(&self, rng: &mut impl Rng) -> u64 {
        match *self {
            Bandwidth::Fixed(x) => x,
            Bandwidth::Range(lo, hi) => rng.gen_range(lo..=hi),
        }
    }
}

impl From<u64> for Bandwidth {
    fn from(x: u64) -> Self {
        Bandwidth::Fixed(x)
    }
}

impl From<(u64, u64)> for Bandwidth {
    fn from((lo, hi): (u64, u64)) -> Self {
        Bandwidth::Range(lo, hi)
    }
}

/// Description of one active flow.
#[derive(Debug, Clone)]
pub struct Flow {
    /// Manager-assigned flow ID.
    pub id: u64,
    /// Name of the sending host.
    pub src: String,
    /// Name of the receiving host.
    pub dst: String,
    /// Server port on the receiving host.
    pub port: u16,
    /// Resolved bandwidth in bits per second.
    pub bandwidth: u64,
    /// PID of the client process (on `src`).
    pub src_pid: u32,
    /// PID of the server process (on `dst`).
    pub dst_pid: u32,
}

struct FlowEntry {
    flow: Flow,
    src: Arc<dyn HostHandle>,
    dst: Arc<dyn HostHandle>,
}

/// Manager of all background traffic in the emulated network.
pub struct TrafficManager {
    hosts: Vec<Arc<dyn HostHandle>>,
    flows: BTreeMap<u64, FlowEntry>,
    next_id: u64,
    next_port: u16,
}

impl TrafficManager {
    pub fn new(hosts: Vec<Arc<dyn HostHandle>>) -> Self {
        Self {
            hosts,
            flows: BTreeMap::new(),
            next_id: 0,
            next_port: CONFIG.emulation.iperf_base_port,
        }
    }

    /// Number of active flows.
    pub fn flow_num(&self) -> usize {
        self.flows.len()
    }

    /// Sum of the target bandwidths of all active flows, in bits per second.
    pub fn network_load(&self) -> u64 {
        self.flows.values().map(|e| e.flow.bandwidth).sum()
    }

    /// All active flows, in creation order.
    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values().map(|e| &e.flow)
    }

    /// Start a new flow between two distinct, randomly chosen hosts.
    ///
    /// The server is started first on the destination, then the client on the source, both
    /// detached from their spawning shell. Each spawn must acknowledge the PID of the detached
    /// process; a flow that fails acknowledgment is not recorded.
    pub async fn add_random_flow(
        &mut self,
        bandwidth: impl Into<Bandwidth>,
    ) -> Result<&Flow, TrafficError> {
        if self.hosts.len() < 2 {
            return Err(TrafficError::NotEnoughHosts(self.hosts.len()));
        }

        // rng is not Send, so all random choices happen before the first await.
        let (src, dst, bandwidth) = {
            let mut rng = rand::thread_rng();
            let mut picked = self.hosts.iter().choose_multiple(&mut rng, 2);
            let dst = picked.pop().ok_or(TrafficError::NotEnoughHosts(0))?.clone();
            let src = picked.pop().ok_or(TrafficError::NotEnoughHosts(1))?.clone();
            (src, dst, bandwidth.into().resolve(&mut rng))
        };

        let id = self.next_id;
        let port = self.next_port;
        self.next_id += 1;
        self.next_port += 1;

        let dst_pid = spawn_acked(
            &*dst,
            &format!("iperf3 -s -B {} -p {port} >/dev/null 2>&1 & echo $!", dst.ip()),
        )
        .await?;
        // if the client side fails, the already acknowledged server must not leak
        let src_pid = match spawn_acked(
            &*src,
            &format!(
                "iperf3 -c {} -p {port} -b {bandwidth} -t 86400 >/dev/null 2>&1 & echo $!",
                dst.ip()
            ),
        )
        .await
        {
            Ok(pid) => pid,
            Err(e) => {
                kill_quiet(&*dst, dst.name(), dst_pid).await;
                return Err(e);
            }
        };

        let flow = Flow {
            id,
            src: src.name().to_string(),
            dst: dst.name().to_string(),
            port,
            bandwidth,
            src_pid,
            dst_pid,
        };
        log::debug!(
            "[traffic] flow {id}: {} -> {}:{port} at {bandwidth} bps",
            flow.src,
            flow.dst
        );
        let entry = self.flows.entry(id).or_insert(FlowEntry { flow, src, dst });
        Ok(&entry.flow)
    }

    /// Stop the flow with the given ID and remove it.
    pub async fn delete_flow(&mut self, id: u64) -> Result<Flow, TrafficError> {
        let entry = self.flows.remove(&id).ok_or(TrafficError::UnknownFlow(id))?;
        kill_quiet(&*entry.src, &entry.flow.src, entry.flow.src_pid).await;
        kill_quiet(&*entry.dst, &entry.flow.dst, entry.flow.dst_pid).await;
        log::debug!("[traffic] removed flow {id}");
        Ok(entry.flow)
    }

    /// Stop a uniformly chosen active flow.
    pub async fn delete_random_flow(&mut self) -> Result<Flow, TrafficError> {
        let id = {
            let mut rng = rand::thread_rng();
            self.flows.keys().copied().choose(&mut rng)
        }
        .ok_or(TrafficError::NoFlows)?;
        self.delete_flow(id).await
    }

    /// Stop all active flows.
    pub async fn delete_all_flows(&mut self) -> Result<(), TrafficError> {
        while let Some(id) = self.flows.keys().next().copied() {
            self.delete_flow(id).await?;
        }
        Ok(())
    }
}

/// Spawn a detached command on a host and parse the acknowledged PID from its output.
async fn spawn_acked(host: &dyn HostHandle, command: &str) -> Result<u32, TrafficError> {
    let out = host.cmd(command).await?;
    out.trim()
        .lines()
        .last()
        .and_then(|l| l.trim().parse().ok())
        .ok_or_else(|| TrafficError::Acknowledgment(out))
}

/// Kill a traffic process. Failure here is expected (the process may have exited on its own)
/// and only logged.
async fn kill_quiet(host: &dyn HostHandle, name: &str, pid: u32) {
    if let Err(e) = host.cmd(&format!("kill -9 {pid}")).await {
        log::warn!("[traffic] could not kill pid {pid} on {name}: {e}");
    }
}

/// Error while managing background traffic.
#[derive(Debug, Error)]
pub enum TrafficError {
    /// A spawned traffic process did not acknowledge its PID.
    #[error("Traffic process did not acknowledge its PID; got: {0:?}")]
    Acknowledgment(String),
    /// A flow needs two distinct hosts.
    #[error("Need at least two hosts to create a flow, got {0}")]
    NotEnoughHosts(usize),
    /// No active flow to delete.
    #[error("No active flow")]
    NoFlows,
    /// The given flow ID is not active.
    #[error("Unknown flow ID {0}")]
    UnknownFlow(u64),
    /// Error while talking to the emulated network.
    #[error("{0}")]
    Net(#[from] NetError),
}
