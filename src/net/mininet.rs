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

//! Mininet-backed implementation of the emulation interface. The `mn` CLI is kept running as a
//! child process for the lifetime of the network; its interactive prompt is used to synchronize
//! startup, and teardown happens by asking it to `exit` (with a kill fallback).

use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;

use crate::config::CONFIG;

use super::{execute_cmd_stdout, Emulation, HostHandle, NetError, SwitchHandle};

const PROMPT: &[u8] = b"mininet> ";
const START_TIMEOUT: Duration = Duration::from_secs(60);
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Shape of the emulated network. Host and switch names (and datapath IDs) follow Mininet's
/// standard naming: hosts `h1..hN` with addresses `10.0.0.N`, switches `s1..sM` with `dpid = M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// One switch with `hosts` hosts attached.
    Single { hosts: usize },
    /// A chain of `switches` switches, one host per switch.
    Linear { switches: usize },
    /// A complete tree of the given depth and fanout. Hosts are the leaves.
    Tree { depth: u32, fanout: u32 },
}

impl Topology {
    /// The value passed to `mn --topo`.
    pub(crate) fn mn_arg(&self) -> String {
        match self {
            Topology::Single { hosts } => format!("single,{hosts}"),
            Topology::Linear { switches } => format!("linear,{switches}"),
            Topology::Tree { depth, fanout } => format!("tree,depth={depth},fanout={fanout}"),
        }
    }

    pub(crate) fn host_count(&self) -> usize {
        match self {
            Topology::Single { hosts } => *hosts,
            Topology::Linear { switches } => *switches,
            Topology::Tree { depth, fanout } => fanout.pow(*depth) as usize,
        }
    }

    pub(crate) fn switch_count(&self) -> usize {
        match self {
            Topology::Single { .. } => 1,
            Topology::Linear { switches } => *switches,
            Topology::Tree { depth, fanout } => {
                if *fanout <= 1 {
                    *depth as usize
                } else {
                    ((fanout.pow(*depth) - 1) / (fanout - 1)) as usize
                }
            }
        }
    }
}

/// The emulated network, managed through a long-lived `mn` child process.
pub struct MininetNetwork {
    topo: Topology,
    child: Option<Child>,
    hosts: Vec<Arc<MininetHost>>,
    switches: Vec<Arc<MininetSwitch>>,
}

impl MininetNetwork {
    pub fn new(topo: Topology) -> Self {
        Self {
            topo,
            child: None,
            hosts: Vec::new(),
            switches: Vec::new(),
        }
    }

    /// Disable IPv6 on all hosts, so that no unexpected (neighbor-discovery) flow entries show
    /// up in the measurements.
    async fn disable_ipv6(&self) -> Result<(), NetError> {
        for host in &self.hosts {
            for intf in ["all", "default", "lo"] {
                host.cmd(&format!(
                    "sysctl -w net.ipv6.conf.{intf}.disable_ipv6=1"
                ))
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Emulation for MininetNetwork {
    async fn start(&mut self) -> Result<(), NetError> {
        if self.child.is_some() {
            return Ok(());
        }

        let cmd_str = format!(
            "mn --topo {} --switch ovs,protocols={} --controller remote,ip=127.0.0.1,port={} --mac",
            self.topo.mn_arg(),
            CONFIG.emulation.openflow_protocol,
            CONFIG.controller.openflow_port,
        );
        log::debug!("[mininet] {cmd_str}");

        let mut child = Command::new("mn")
            .arg("--topo")
            .arg(self.topo.mn_arg())
            .arg("--switch")
            .arg(format!(
                "ovs,protocols={}",
                CONFIG.emulation.openflow_protocol
            ))
            .arg("--controller")
            .arg(format!(
                "remote,ip=127.0.0.1,port={}",
                CONFIG.controller.openflow_port
            ))
            .arg("--mac")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child.stdout.take().unwrap();
        let banner = wait_prompt(&mut stdout, START_TIMEOUT, PROMPT)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::TimedOut => NetError::Timeout(cmd_str.clone()),
                _ => NetError::Io(e),
            })?;
        log::trace!("[mininet] startup output:\n{}", String::from_utf8_lossy(&banner));

        child.stdout = Some(stdout);
        self.child = Some(child);

        self.hosts = (1..=self.topo.host_count())
            .map(|i| {
                Arc::new(MininetHost {
                    name: format!("h{i}"),
                    ip: Ipv4Addr::new(10, 0, 0, i as u8),
                })
            })
            .collect();
        self.switches = (1..=self.topo.switch_count())
            .map(|i| {
                Arc::new(MininetSwitch {
                    name: format!("s{i}"),
                    dpid: i as u64,
                })
            })
            .collect();

        self.disable_ipv6().await?;

        log::debug!(
            "[mininet] network is up ({} hosts, {} switches)",
            self.hosts.len(),
            self.switches.len()
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), NetError> {
        let mut child = self.child.take().ok_or(NetError::NotStarted)?;
        self.hosts.clear();
        self.switches.clear();

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"exit\n").await;
            let _ = stdin.shutdown().await;
        }
        match timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(status) => {
                log::debug!("[mininet] exited with {:?}", status?);
            }
            Err(_) => {
                log::warn!("[mininet] did not exit in time; killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }

    fn hosts(&self) -> Vec<Arc<dyn HostHandle>> {
        self.hosts.iter().map(|h| h.clone() as _).collect()
    }

    fn switches(&self) -> Vec<Arc<dyn SwitchHandle>> {
        self.switches.iter().map(|s| s.clone() as _).collect()
    }
}

/// One Mininet host. Commands run inside the host's network namespace by attaching to the
/// namespace of the `mininet:<name>` shell process.
pub struct MininetHost {
    name: String,
    ip: Ipv4Addr,
}

#[async_trait::async_trait]
impl HostHandle for MininetHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    async fn cmd(&self, command: &str) -> Result<String, NetError> {
        let pattern = format!("mininet:{}$", self.name);
        let pid_out = execute_cmd_stdout("pgrep", &["-f", &pattern])
            .await
            .map_err(|_| NetError::HostNotFound(self.name.clone()))?;
        let pid: u32 = pid_out
            .lines()
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| NetError::HostNotFound(self.name.clone()))?;

        log::trace!("[{}] `{}`", self.name, command);
        execute_cmd_stdout("mnexec", &["-a", &pid.to_string(), "sh", "-c", command]).await
    }
}

/// One Mininet switch. The flow-dump CLI runs in the root namespace, where Open vSwitch lives.
pub struct MininetSwitch {
    name: String,
    dpid: u64,
}

#[async_trait::async_trait]
impl SwitchHandle for MininetSwitch {
    fn name(&self) -> &str {
        &self.name
    }

    fn dpid(&self) -> u64 {
        self.dpid
    }

    async fn dpctl(&self, cmd: &str, args: &[&str]) -> Result<String, NetError> {
        let mut all_args = vec![cmd, self.name.as_str()];
        all_args.extend_from_slice(args);
        all_args.push("-O");
        all_args.push(CONFIG.emulation.openflow_protocol.as_str());
        execute_cmd_stdout("ovs-ofctl", &all_args).await
    }
}

/// Wait on the stdout until we get the next prompt. If the timeout triggers before we read the
/// prompt, return a `TimedOut` error.
async fn wait_prompt(
    stdout: &mut ChildStdout,
    duration: Duration,
    prompt: impl AsRef<[u8]>,
) -> Result<Vec<u8>, std::io::Error> {
    timeout(duration, wait_prompt_no_timeout(stdout, prompt))
        .await
        .map_err(|_| {
            log::warn!("Timeout occurred while waiting for the prompt!");
            std::io::Error::new(
                ErrorKind::TimedOut,
                "Timeout occurred while waiting for a prompt!",
            )
        })?
}

/// Wait on the stdout until we get the next prompt.
async fn wait_prompt_no_timeout(
    stdout: &mut ChildStdout,
    prompt: impl AsRef<[u8]>,
) -> Result<Vec<u8>, std::io::Error> {
    let mut buffer = Vec::new();
    let mut counter_zero = 0;
    let prompt = prompt.as_ref();
    while !buffer.ends_with(prompt) {
        let num = stdout.read_buf(&mut buffer).await?;
        if num == 0 {
            counter_zero += 1;
            if counter_zero >= 10 {
                return Err(std::io::Error::new(
                    ErrorKind::ConnectionRefused,
                    "Unexpected EOF while expecting a prompt!",
                ));
            }
        }
    }

    buffer.truncate(buffer.len() - prompt.len());
    Ok(buffer)
}
