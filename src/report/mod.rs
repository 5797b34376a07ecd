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
//! Parsers for the text captured from the measurement processes.
//!
//! Each kind of report has its own grammar in a submodule. All parsers are pure functions over
//! the captured text: lines they do not recognize are skipped, and lines that look like data but
//! cannot be used are counted in [`Report::skipped`].

use std::{io, path::Path};

use serde::{Deserialize, Serialize};

mod flow_report;
mod probe_report;
mod queue_report;

pub use flow_report::parse_flow_report;
pub use probe_report::parse_probe_report;
pub use queue_report::parse_queue_report;

/// Version of the report grammars. Stored with every result to know how it was parsed.
pub const GRAMMAR_VERSION: u32 = 1;

/// Parsed samples of a single report.
#[derive(Debug, Clone, PartialEq)]
pub struct Report<T> {
    /// Samples in the order of the report, non-decreasing in time.
    pub samples: Vec<T>,
    /// Number of malformed lines that were dropped.
    pub skipped: usize,
}

impl<T> Default for Report<T> {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
            skipped: 0,
        }
    }
}

/// Read and parse a report from disk.
pub fn read_report<T>(
    path: impl AsRef<Path>,
    parse: fn(&str) -> Report<T>,
) -> io::Result<Report<T>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(parse(&raw))
}

pub trait Timed {
    fn time(&self) -> f64;
}

/// Throughput of one flow during one reporting interval.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct FlowSample {
    /// Start of the interval in seconds since the sender started
    pub start: f64,
    /// End of the interval in seconds since the sender started
    pub end: f64,
    /// Throughput in Mbits/sec
    pub mbps: f64,
}

impl Timed for FlowSample {
    fn time(&self) -> f64 {
        self.start
    }
}

/// Backlog of the bottleneck queue at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct QueueSample {
    /// Unix timestamp in seconds
    pub time: f64,
    /// Queue length in packets
    pub len: u64,
}

impl Timed for QueueSample {
    fn time(&self) -> f64 {
        self.time
    }
}

/// A single probe of a latency probe.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RttSample {
    /// Unix timestamp in seconds (or the probe index if the probe did not print timestamps)
    pub time: f64,
    pub seq: u64,
    /// Round-trip time in milliseconds. `None` if no answer was received.
    pub rtt: Option<f64>,
}

impl Timed for RttSample {
    fn time(&self) -> f64 {
        self.time
    }
}

/// Whether the samples are ordered by time.
pub fn is_time_ordered<T: Timed>(samples: &[T]) -> bool {
    samples.windows(2).all(|w| w[0].time() <= w[1].time())
}
