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
//! Error taxonomy of an experiment run.
//!
//! Only a [`TopologyError`] raised before the measurement starts aborts a run. Everything else is
//! recorded in the [`Diagnostics`] of the final result.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::FlowId;

/// Invalid experiment parameter or an algorithm that the sender's TCP stack does not offer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Congestion control `{algorithm}` is not supported on {host} (available: {available})")]
    UnsupportedAlgorithm {
        host: String,
        algorithm: String,
        available: String,
    },
    #[error("Invalid value for {name}: {value}")]
    InvalidParameter { name: String, value: String },
    #[error("No flows configured")]
    NoFlows,
    #[error("Flow id {0} is used twice")]
    DuplicateFlow(FlowId),
    #[error("Port {0} is used by two flows")]
    DuplicatePort(u16),
    #[error("Unknown flow: {0}")]
    UnknownFlow(FlowId),
    #[error("Start offset {offset}s of {flow} is not within the experiment duration of {duration}s")]
    OffsetTooLarge {
        flow: FlowId,
        offset: u64,
        duration: u64,
    },
}

/// Failure of the emulated topology. Fatal while provisioning.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Command `{cmd}` failed: {stderr}")]
    Command { cmd: String, stderr: String },
    #[error("Unknown host: {0}")]
    UnknownHost(String),
    #[error("{to} is not reachable from {from}")]
    Unreachable { from: String, to: String },
    #[error("Topology is not provisioned")]
    NotProvisioned,
    #[error("Could not provision the topology: {0}")]
    Provision(String),
}

/// A measurement process could not be started, or exited unexpectedly.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Topology Error: {0}")]
    Topology(#[from] TopologyError),
    #[error("Configuration Error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Cannot read the backlog of {iface}: {reason}")]
    Backlog { iface: String, reason: String },
    #[error("{label} exited unexpectedly with {status}")]
    Exited { label: String, status: String },
    #[error("Join Error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A process that did not exit within its grace period and was killed.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TeardownWarning {
    pub label: String,
    /// Grace period in seconds that was exceeded
    pub grace: f64,
}

impl TeardownWarning {
    pub fn new(label: impl Into<String>, grace: Duration) -> Self {
        Self {
            label: label.into(),
            grace: grace.as_secs_f64(),
        }
    }
}

/// Malformed lines found while parsing a captured report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ParseWarning {
    /// The report that was parsed
    pub source: String,
    /// Number of skipped lines
    pub skipped: usize,
}

/// A flow that could not be measured.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FlowFailure {
    pub flow: FlowId,
    pub reason: String,
}

/// Everything that went wrong during a run without aborting it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Diagnostics {
    /// Flows that failed to start or to capture data
    #[serde(default)]
    pub flow_failures: Vec<FlowFailure>,
    /// Processes that exited unexpectedly, or outputs that could not be read
    #[serde(default)]
    pub capture_errors: Vec<String>,
    #[serde(default)]
    pub teardown_warnings: Vec<TeardownWarning>,
    #[serde(default)]
    pub parse_warnings: Vec<ParseWarning>,
    /// Number of sampler ticks for which the backlog could not be read
    #[serde(default)]
    pub sampler_gaps: usize,
    /// Whether the run was aborted by the operator before the duration elapsed
    #[serde(default)]
    pub aborted: bool,
}

impl Diagnostics {
    pub fn flow_failed(&mut self, flow: FlowId, reason: impl ToString) {
        let reason = reason.to_string();
        log::error!("[{flow}] {reason}");
        self.flow_failures.push(FlowFailure { flow, reason });
    }

    pub fn capture_error(&mut self, error: impl ToString) {
        let error = error.to_string();
        log::warn!("Capture error: {error}");
        self.capture_errors.push(error);
    }

    pub fn teardown_warning(&mut self, warning: TeardownWarning) {
        log::warn!(
            "{} did not exit within {:.1}s and was killed",
            warning.label,
            warning.grace
        );
        self.teardown_warnings.push(warning);
    }

    pub fn parse_warning(&mut self, source: impl Into<String>, skipped: usize) {
        if skipped > 0 {
            let source = source.into();
            log::debug!("Skipped {skipped} malformed lines in {source}");
            self.parse_warnings.push(ParseWarning { source, skipped });
        }
    }

    pub fn has_failed(&self, flow: FlowId) -> bool {
        self.flow_failures.iter().any(|f| f.flow == flow)
    }

    /// Whether nothing at all went wrong.
    pub fn is_clean(&self) -> bool {
        self.flow_failures.is_empty()
            && self.capture_errors.is_empty()
            && self.teardown_warnings.is_empty()
            && self.parse_warnings.is_empty()
            && self.sampler_gaps == 0
            && !self.aborted
    }
}
