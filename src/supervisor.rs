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

//! Supervision of the long-running external processes of the testbed (the controller and the
//! prediction engine). Start is idempotent, stop is idempotent, and a dropped supervisor kills
//! its child.

use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use time::format_description;
use time::OffsetDateTime;
use tokio::process::{Child, Command};

/// One supervised external process.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    program: String,
    args: Vec<String>,
    log_file: Option<PathBuf>,
    child: Option<Child>,
}

impl ManagedProcess {
    /// Supervise the executable at `path` (with `~` expanded to the home directory). The path
    /// must point to an executable file; a missing engine binary should surface when the testbed
    /// is built, not minutes later when it is started.
    pub fn new(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        args: Vec<String>,
    ) -> Result<Self, SupervisorError> {
        let path = expand_home(path.as_ref());
        let meta = path
            .metadata()
            .map_err(|_| SupervisorError::ExecutableNotFound(path.clone()))?;
        if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
            return Err(SupervisorError::ExecutableNotFound(path));
        }
        Ok(Self {
            name: name.into(),
            program: path.to_string_lossy().into_owned(),
            args,
            log_file: None,
            child: None,
        })
    }

    /// Supervise a command resolved through `PATH` (e.g. an installed controller launcher). The
    /// existence check is deferred to [`ManagedProcess::start`].
    pub fn from_command(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: command.into(),
            args,
            log_file: None,
            child: None,
        }
    }

    /// Append the process's stdout and stderr to the given file instead of discarding them.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Start the process. Does nothing if it is already running.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if self.is_running() {
            return Ok(());
        }

        let (stdout, stderr) = match &self.log_file {
            Some(path) => {
                let f = File::options().create(true).append(true).open(path)?;
                (Stdio::from(f.try_clone()?), Stdio::from(f))
            }
            None => (Stdio::null(), Stdio::null()),
        };

        log::debug!("[{}] starting `{} {}`", self.name, self.program, self.args.join(" "));
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SupervisorError::ExecutableNotFound(PathBuf::from(&self.program))
                }
                _ => SupervisorError::Io(e),
            })?;
        self.child = Some(child);
        Ok(())
    }

    /// Stop the process. Does nothing if it is not running.
    pub async fn stop(&mut self) -> Result<(), SupervisorError> {
        if let Some(mut child) = self.child.take() {
            log::debug!("[{}] stopping", self.name);
            child.kill().await?;
        }
        Ok(())
    }

    /// Whether the process is running right now. A child that exited on its own is reaped here.
    pub fn is_running(&mut self) -> bool {
        match &mut self.child {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    log::warn!("[{}] exited on its own with {status}", self.name);
                    self.child = None;
                    false
                }
                Err(_) => false,
            },
            None => false,
        }
    }
}

/// Build a timestamped log filename `<dir>/<name>_<date>_<time>.log`, creating `dir` if needed.
pub fn timestamped_log(dir: impl AsRef<Path>, name: &str) -> Result<PathBuf, SupervisorError> {
    let dir = expand_home(dir.as_ref());
    std::fs::create_dir_all(&dir)?;
    let format =
        format_description::parse("[year]-[month]-[day]_[hour]-[minute]-[second]").unwrap();
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let timestamp = now.format(&format).unwrap();
    Ok(dir.join(format!("{name}_{timestamp}.log")))
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var("HOME") {
            Ok(home) => PathBuf::from(home).join(rest),
            Err(_) => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Error while supervising an external process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The configured path does not point to an executable file.
    #[error("Not an executable file: {0}")]
    ExecutableNotFound(PathBuf),
    /// I/O Error
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
}
