// CC-COMPETE: Orchestrated Competition Experiments between TCP Congestion-Control Algorithms
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Handles on the measurement processes of an experiment.
//!
//! Flows, probes and the queue sampler all implement [`MeasurementHandle`], such that the
//! coordinator can stop every one of them the same way: `terminate` all, then `wait` with a
//! bounded grace period, then `kill` whatever is left.

use std::{io, process::ExitStatus};

use tokio::process::Child;

use crate::error::CaptureError;

#[async_trait::async_trait]
pub trait MeasurementHandle: Send {
    /// Human-readable name used in logs and diagnostics.
    fn label(&self) -> &str;

    /// Check without blocking whether the measurement has completed on its own.
    fn is_finished(&mut self) -> bool;

    /// Wait until the measurement exits. Returns the exit status of the main process, or `None`
    /// if there is no process (or it was never started).
    async fn wait(&mut self) -> Result<Option<ExitStatus>, CaptureError>;

    /// Ask the measurement to stop. Calling this multiple times, or after the measurement has
    /// completed, has no further effect.
    fn terminate(&mut self) -> Result<(), CaptureError>;

    /// Stop the measurement forcefully and reap it.
    async fn kill(&mut self) -> Result<(), CaptureError>;
}

/// A single child process spawned on one of the emulated hosts.
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    child: Child,
    status: Option<ExitStatus>,
    signalled: bool,
    signals_sent: usize,
}

impl ProcessHandle {
    pub fn new(label: impl Into<String>, child: Child) -> Self {
        Self {
            label: label.into(),
            child,
            status: None,
            signalled: false,
            signals_sent: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The exit status, if the process has exited. Never blocks.
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>, CaptureError> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus, CaptureError> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.status = Some(status);
        Ok(status)
    }

    /// Send `SIGTERM`, unless the process already exited or was already signalled.
    pub fn terminate(&mut self) -> Result<(), CaptureError> {
        if self.signalled || self.try_status()?.is_some() {
            return Ok(());
        }
        if let Some(pid) = self.child.id() {
            log::trace!("[{}] sending SIGTERM to {pid}", self.label);
            send_signal(pid, libc::SIGTERM)?;
            self.signals_sent += 1;
        }
        self.signalled = true;
        Ok(())
    }

    /// Send `SIGKILL` and reap the process.
    pub async fn kill(&mut self) -> Result<(), CaptureError> {
        if self.try_status()?.is_some() {
            return Ok(());
        }
        self.child.kill().await?;
        self.status = self.child.try_wait()?;
        Ok(())
    }

    /// Number of termination signals actually delivered.
    pub fn signals_sent(&self) -> usize {
        self.signals_sent
    }
}

#[async_trait::async_trait]
impl MeasurementHandle for ProcessHandle {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_finished(&mut self) -> bool {
        matches!(self.try_status(), Ok(Some(_)))
    }

    async fn wait(&mut self) -> Result<Option<ExitStatus>, CaptureError> {
        ProcessHandle::wait(self).await.map(Some)
    }

    fn terminate(&mut self) -> Result<(), CaptureError> {
        ProcessHandle::terminate(self)
    }

    async fn kill(&mut self) -> Result<(), CaptureError> {
        ProcessHandle::kill(self).await
    }
}

fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: `kill` has no memory-safety requirements; the pid belongs to our own child which
    // has not been reaped yet (`Child::id` returns `None` after that).
    let ret = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if ret == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    // the process exited in the meantime
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}
