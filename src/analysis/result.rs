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
//! Describes the result of an experiment.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use serde::{Deserialize, Serialize};

use super::{
    fairness::Fairness,
    metrics::{FlowMetrics, QueueSummary, RttSummary},
};
use crate::{
    config::{Algorithm, ExperimentConfig, FlowId},
    error::Diagnostics,
};

/// Aggregate of all flows using the same algorithm.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AlgorithmSummary {
    /// Number of flows
    pub flows: usize,
    /// Sum of the mean throughput of all flows in Mbits/sec
    pub total: f64,
    /// Average throughput per flow in Mbits/sec
    pub avg_per_flow: f64,
    /// Pooled round-trip times of all probes of this algorithm's flows
    pub rtt: Option<RttSummary>,
}

/// Result of the analysis of a single experiment run. This is the record that is persisted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AnalysisResult {
    pub config: ExperimentConfig,
    /// Version of the report grammars used to parse the captured outputs
    pub grammar_version: u32,
    /// Throughput statistics of every flow of the configuration
    pub per_flow: BTreeMap<FlowId, FlowMetrics>,
    pub algorithms: BTreeMap<Algorithm, AlgorithmSummary>,
    pub fairness: Fairness,
    /// Algorithm with the highest total throughput. `None` on a tie or without a competitor.
    pub winner: Option<Algorithm>,
    /// Advantage of the leader over the runner-up in percent
    pub advantage: Option<f64>,
    /// Sum of all flows in Mbits/sec
    pub total_throughput: f64,
    /// Total throughput relative to the bottleneck bandwidth
    pub efficiency: f64,
    pub queue: Option<QueueSummary>,
    /// Round-trip times per probed `(source, target)` pair
    #[serde(default, with = "cc_compete_utils::serde::generic_hashmap")]
    pub probes: HashMap<(String, String), RttSummary>,
    /// Algorithm with the lowest RTT coefficient of variation
    pub most_stable: Option<Algorithm>,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl AnalysisResult {
    /// Number of flows for which at least one interval was measured.
    pub fn measured_flows(&self) -> usize {
        self.per_flow.values().filter(|m| m.samples > 0).count()
    }

    pub fn nothing_measured(&self) -> bool {
        self.measured_flows() == 0
    }
}

struct Opt<T>(Option<T>, usize);

impl<T: fmt::Display> fmt::Display for Opt<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(x) => write!(f, "{x:.prec$}", prec = self.1),
            None => f.write_str("undefined"),
        }
    }
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.config;
        writeln!(
            f,
            "Competition `{}`: {} flows, {} Mbit/s bottleneck, {} ms delay, {} packets queue, {} s",
            c.scenario,
            c.flows.len(),
            c.link.bandwidth,
            c.link.delay,
            c.link.max_queue,
            c.duration
        )?;
        for flow in &c.flows {
            let m = self.per_flow.get(&flow.id).copied().unwrap_or_default();
            writeln!(
                f,
                "  {} ({}): avg {:.2} Mbit/s (min {:.2}, max {:.2}, std {:.2})",
                flow.id, flow.algorithm, m.mean, m.min, m.max, m.std
            )?;
        }
        for (algo, s) in &self.algorithms {
            write!(
                f,
                "  {algo}: {} flow(s), total {:.2} Mbit/s, {:.2} Mbit/s per flow",
                s.flows, s.total, s.avg_per_flow
            )?;
            if let Some(rtt) = &s.rtt {
                write!(f, ", RTT {:.1} ms (cv {})", rtt.mean, Opt(rtt.cv, 3))?;
            }
            writeln!(f)?;
        }

        match (&self.winner, self.advantage) {
            (Some(w), adv) => writeln!(f, "Winner: {w} (+{}%)", Opt(adv, 1))?,
            (None, Some(_)) => writeln!(f, "Winner: none (tie)")?,
            (None, None) => writeln!(f, "Winner: none")?,
        }
        writeln!(
            f,
            "Total throughput: {:.2} Mbit/s ({:.1}% of the bottleneck)",
            self.total_throughput,
            self.efficiency * 100.0
        )?;
        write!(
            f,
            "Fairness: {} among flows, {} among algorithms",
            Opt(self.fairness.flows, 3),
            Opt(self.fairness.algorithms, 3)
        )?;
        match self.fairness.assessment {
            Some(a) => writeln!(f, " ({a})")?,
            None => writeln!(f)?,
        }
        if let Some(q) = &self.queue {
            writeln!(
                f,
                "Queue: mean {:.1} / {} packets ({:.1}%, {})",
                q.mean,
                c.link.max_queue,
                q.utilization * 100.0,
                q.assessment
            )?;
        }
        if let Some(algo) = &self.most_stable {
            writeln!(f, "Most stable RTT: {algo}")?;
        }

        let d = &self.diagnostics;
        if !d.is_clean() {
            write!(
                f,
                "Diagnostics: {} failed flows, {} capture errors, {} killed processes, {} malformed lines, {} sampler gaps",
                d.flow_failures.len(),
                d.capture_errors.len(),
                d.teardown_warnings.len(),
                d.parse_warnings.iter().map(|w| w.skipped).sum::<usize>(),
                d.sampler_gaps,
            )?;
            if d.aborted {
                write!(f, " (aborted)")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
