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

//! Interfaces to the network emulation platform. The testbed core only depends on the traits in
//! this module; the Mininet-backed implementation lives in [`mininet`], and tests inject mocks.

use std::net::Ipv4Addr;
use std::string::FromUtf8Error;
use std::sync::Arc;

use itertools::Itertools;
use thiserror::Error;
use tokio::process::Command;

pub mod mininet;
pub use mininet::{MininetNetwork, Topology};

/// Handle to the emulated network as a whole.
#[async_trait::async_trait]
pub trait Emulation: Send {
    /// Boot the emulated network and wait until it is ready to accept commands.
    async fn start(&mut self) -> Result<(), NetError>;

    /// Tear the emulated network down. Must be callable exactly once after `start`.
    async fn stop(&mut self) -> Result<(), NetError>;

    /// All emulated hosts. Empty before `start`.
    fn hosts(&self) -> Vec<Arc<dyn HostHandle>>;

    /// All emulated switches. Empty before `start`.
    fn switches(&self) -> Vec<Arc<dyn SwitchHandle>>;
}

/// Handle to one emulated host.
#[async_trait::async_trait]
pub trait HostHandle: Send + Sync {
    /// Name of the host (e.g. `h1`).
    fn name(&self) -> &str;

    /// The host's primary IPv4 address.
    fn ip(&self) -> Ipv4Addr;

    /// Execute a shell command inside the host's namespace, returning its stdout.
    async fn cmd(&self, command: &str) -> Result<String, NetError>;
}

/// Handle to one emulated switch.
#[async_trait::async_trait]
pub trait SwitchHandle: Send + Sync {
    /// Name of the switch (e.g. `s1`).
    fn name(&self) -> &str;

    /// The switch's stable OpenFlow datapath ID.
    fn dpid(&self) -> u64;

    /// Run a flow-dump CLI command (e.g. `dump-flows`, `dump-aggregate`) against this switch and
    /// return its stdout.
    async fn dpctl(&self, cmd: &str, args: &[&str]) -> Result<String, NetError>;
}

/// Execute a local command, check its exit status, and return the parsed stdout.
pub(crate) async fn execute_cmd_stdout(
    program: &str,
    args: &[&str],
) -> Result<String, NetError> {
    let cmd_str = || std::iter::once(program).chain(args.iter().copied()).join(" ");
    log::trace!("[local] `{}`", cmd_str());

    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await?;

    if output.status.success() {
        Ok(String::from_utf8(output.stdout)?)
    } else {
        log::error!(
            "[local] {} exited with exit code {}{}{}",
            cmd_str(),
            output.status.code().unwrap_or_default(),
            if !output.stdout.is_empty() {
                format!("\nSTDOUT:\n{}", String::from_utf8_lossy(&output.stdout))
            } else {
                String::new()
            },
            if !output.stderr.is_empty() {
                format!("\nSTDERR:\n{}", String::from_utf8_lossy(&output.stderr))
            } else {
                String::new()
            }
        );
        Err(NetError::CommandError(
            cmd_str(),
            output.status.code().unwrap_or_default(),
        ))
    }
}

/// Error while interacting with the emulated network.
#[derive(Debug, Error)]
pub enum NetError {
    /// I/O Error
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
    /// A command exited with a non-zero status.
    #[error("Non-zero exit code of command `{0}`: {1}")]
    CommandError(String, i32),
    /// Cannot parse command output as UTF-8.
    #[error("Cannot parse output as UTF-8: {0}")]
    FromUtf8(#[from] FromUtf8Error),
    /// The emulator did not present its prompt in time.
    #[error("Timeout while waiting for the emulator: {0}")]
    Timeout(String),
    /// A host's namespace process could not be located.
    #[error("Cannot find the namespace process of host {0}")]
    HostNotFound(String),
    /// The network is not started.
    #[error("The emulated network is not running")]
    NotStarted,
}
