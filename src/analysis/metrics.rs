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
//! Summary statistics of the measured series.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::report::{FlowSample, QueueSample, RttSample};

/// Throughput statistics of a single flow, in Mbits/sec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct FlowMetrics {
    /// Number of intervals the statistics are computed over. Zero if the flow produced nothing.
    pub samples: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation
    pub std: f64,
}

impl FlowMetrics {
    pub fn from_samples(samples: &[FlowSample]) -> Self {
        let values: Vec<f64> = samples.iter().map(|s| s.mbps).collect();
        Self::from_values(&values)
    }

    /// Statistics of a throughput series. An empty series has all statistics set to zero.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        Self {
            samples: values.len(),
            mean: Statistics::mean(values),
            min: Statistics::min(values),
            max: Statistics::max(values),
            std: Statistics::population_std_dev(values),
        }
    }
}

/// How full the bottleneck queue was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
pub enum QueueAssessment {
    /// More than 80% utilization, potential bufferbloat
    #[strum(serialize = "high (potential bufferbloat)")]
    High,
    /// More than 50% utilization
    #[strum(serialize = "moderate")]
    Moderate,
    #[strum(serialize = "low")]
    Low,
}

impl QueueAssessment {
    pub fn of(utilization: f64) -> Self {
        if utilization > 0.8 {
            Self::High
        } else if utilization > 0.5 {
            Self::Moderate
        } else {
            Self::Low
        }
    }
}

/// Occupancy of the bottleneck queue, in packets.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct QueueSummary {
    pub samples: usize,
    pub mean: f64,
    pub max: u64,
    /// `mean / max_queue`, clamped to `[0, 1]`
    pub utilization: f64,
    pub assessment: QueueAssessment,
}

impl QueueSummary {
    /// Returns `None` if there are no samples. Samples above `max_queue` are kept as they are
    /// (the backlog also counts packets of the rate limiter); only the utilization is clamped.
    pub fn new(samples: &[QueueSample], max_queue: u32) -> Option<Self> {
        let max = samples.iter().map(|s| s.len).max()?;
        let lens: Vec<f64> = samples.iter().map(|s| s.len as f64).collect();
        let mean = Statistics::mean(&lens);
        let utilization = (mean / max_queue as f64).clamp(0.0, 1.0);
        Some(Self {
            samples: samples.len(),
            mean,
            max,
            utilization,
            assessment: QueueAssessment::of(utilization),
        })
    }
}

/// Round-trip times of one or more probes, in ms.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RttSummary {
    /// Number of answered probes
    pub samples: usize,
    /// Number of probes without an answer
    pub missing: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    /// Coefficient of variation (`std / mean`). Lower is more stable.
    pub cv: Option<f64>,
}

impl RttSummary {
    /// Pool all given samples. Returns `None` if there are none.
    pub fn pooled<'a>(samples: impl IntoIterator<Item = &'a RttSample>) -> Option<Self> {
        let mut missing = 0;
        let mut rtts = Vec::new();
        for s in samples {
            match s.rtt {
                Some(rtt) => rtts.push(rtt),
                None => missing += 1,
            }
        }
        if rtts.is_empty() && missing == 0 {
            return None;
        }
        let stats = FlowMetrics::from_values(&rtts);
        Some(Self {
            samples: rtts.len(),
            missing,
            mean: stats.mean,
            min: stats.min,
            max: stats.max,
            std: stats.std,
            cv: (stats.mean > 0.0).then(|| stats.std / stats.mean),
        })
    }
}
