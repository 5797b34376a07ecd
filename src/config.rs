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
//! Describes an experiment: the bottleneck link, the competing flows and how long to measure.
//!
//! An [`ExperimentConfig`] is built once (from the command line or from a [`Scenario`]) and is
//! never mutated afterwards. Every component receives it by reference.

use std::{collections::HashSet, fmt, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// First port assigned to a flow. Flow `i` listens on `BASE_PORT + i`.
pub const BASE_PORT: u16 = 5001;

/// Unique identifier of a competing flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FlowId(pub u32);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow {}", self.0)
    }
}

/// Name of a TCP congestion-control algorithm as known to the kernel (e.g. `reno`, `bbr`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Algorithm(String);

impl Algorithm {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Algorithm {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One competing flow: a sender host pushing traffic to a receiver host.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FlowSpec {
    pub id: FlowId,
    pub algorithm: Algorithm,
    /// Name of the sending host
    pub sender: String,
    /// Name of the receiving host
    pub receiver: String,
    pub port: u16,
    /// Seconds after the experiment start at which the sender is started.
    #[serde(default)]
    pub start_offset: u64,
}

impl FlowSpec {
    /// Name used for all files belonging to this flow, e.g. `reno_flow_1`.
    pub fn name(&self) -> String {
        format!("{}_flow_{}", self.algorithm, self.id.0)
    }

    /// How long the sender of this flow must run such that it ends with the experiment.
    pub fn send_duration(&self, experiment_duration: u64) -> u64 {
        experiment_duration.saturating_sub(self.start_offset).max(1)
    }
}

/// Predefined competition scenarios. Each one expands into a list of flows.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumIter,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// One Reno flow against one BBR flow.
    #[strum(serialize = "reno_vs_bbr")]
    RenoVsBbr,
    /// Two Reno flows against two BBR flows.
    #[strum(serialize = "2reno_vs_2bbr")]
    #[serde(rename = "2reno_vs_2bbr")]
    TwoRenoVsTwoBbr,
    /// Two Reno flows against a single BBR flow.
    #[strum(serialize = "2reno_vs_1bbr")]
    #[serde(rename = "2reno_vs_1bbr")]
    TwoRenoVsOneBbr,
    /// Three Reno flows sharing the bottleneck.
    #[strum(serialize = "multiple_reno")]
    MultipleReno,
    /// Three BBR flows sharing the bottleneck.
    #[strum(serialize = "multiple_bbr")]
    MultipleBbr,
    /// Reno starts first, BBR joins 10 seconds later.
    #[strum(serialize = "time_shifted")]
    TimeShifted,
    /// Flows are given explicitly.
    #[strum(serialize = "custom")]
    Custom,
}

impl Scenario {
    /// The flows of this scenario as `(algorithm, start_offset)` pairs. `Custom` has none.
    pub fn layout(&self) -> Vec<(Algorithm, u64)> {
        let reno = || (Algorithm::new("reno"), 0);
        let bbr = || (Algorithm::new("bbr"), 0);
        match self {
            Self::RenoVsBbr => vec![reno(), bbr()],
            Self::TwoRenoVsTwoBbr => vec![reno(), reno(), bbr(), bbr()],
            Self::TwoRenoVsOneBbr => vec![reno(), reno(), bbr()],
            Self::MultipleReno => vec![reno(), reno(), reno()],
            Self::MultipleBbr => vec![bbr(), bbr(), bbr()],
            Self::TimeShifted => vec![reno(), (Algorithm::new("bbr"), 10)],
            Self::Custom => Vec::new(),
        }
    }
}

/// Parameters of the emulated bottleneck.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LinkParams {
    /// Bottleneck bandwidth in Mb/s
    pub bandwidth: f64,
    /// Bandwidth of the access links of all hosts in Mb/s
    pub host_bandwidth: f64,
    /// One-way propagation delay of the bottleneck in ms
    pub delay: f64,
    /// Maximum queue depth of the bottleneck in packets
    pub max_queue: u32,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            bandwidth: 10.0,
            host_bandwidth: 1000.0,
            delay: 50.0,
            max_queue: 100,
        }
    }
}

/// Immutable description of a single experiment run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExperimentConfig {
    pub link: LinkParams,
    /// Duration of the measurement in seconds
    pub duration: u64,
    pub scenario: Scenario,
    pub flows: Vec<FlowSpec>,
    /// Flows whose sender additionally runs a latency probe towards its receiver.
    #[serde(default)]
    pub probed_flows: Vec<FlowId>,
}

impl ExperimentConfig {
    /// Build and validate a configuration from an explicit flow list.
    pub fn new(
        link: LinkParams,
        duration: u64,
        scenario: Scenario,
        flows: Vec<FlowSpec>,
        probed_flows: Vec<FlowId>,
    ) -> Result<Self, ConfigurationError> {
        let config = Self {
            link,
            duration,
            scenario,
            flows,
            probed_flows,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration on a dumbbell: flow `i` is sent from host `h{i+1}` to host
    /// `h{n+i+1}` on port `5001 + i`. Every flow gets a latency probe if `probes` is set.
    pub fn dumbbell(
        link: LinkParams,
        duration: u64,
        scenario: Scenario,
        layout: Vec<(Algorithm, u64)>,
        probes: bool,
    ) -> Result<Self, ConfigurationError> {
        let n = layout.len();
        let flows = layout
            .into_iter()
            .enumerate()
            .map(|(i, (algorithm, start_offset))| FlowSpec {
                id: FlowId(i as u32 + 1),
                algorithm,
                sender: format!("h{}", i + 1),
                receiver: format!("h{}", n + i + 1),
                port: BASE_PORT + i as u16,
                start_offset,
            })
            .collect_vec();
        let probed_flows = if probes {
            flows.iter().map(|f| f.id).collect()
        } else {
            Vec::new()
        };
        Self::new(link, duration, scenario, flows, probed_flows)
    }

    /// Build the configuration of a predefined scenario.
    pub fn from_scenario(
        link: LinkParams,
        duration: u64,
        scenario: Scenario,
        probes: bool,
    ) -> Result<Self, ConfigurationError> {
        Self::dumbbell(link, duration, scenario, scenario.layout(), probes)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        fn invalid(name: &str, value: impl ToString) -> ConfigurationError {
            ConfigurationError::InvalidParameter {
                name: name.to_string(),
                value: value.to_string(),
            }
        }

        if !(self.link.bandwidth.is_finite() && self.link.bandwidth > 0.0) {
            return Err(invalid("bandwidth", self.link.bandwidth));
        }
        if !(self.link.host_bandwidth.is_finite() && self.link.host_bandwidth > 0.0) {
            return Err(invalid("host bandwidth", self.link.host_bandwidth));
        }
        if !(self.link.delay.is_finite() && self.link.delay >= 0.0) {
            return Err(invalid("delay", self.link.delay));
        }
        if self.link.max_queue == 0 {
            return Err(invalid("max queue", self.link.max_queue));
        }
        if self.duration == 0 {
            return Err(invalid("duration", self.duration));
        }
        if self.flows.is_empty() {
            return Err(ConfigurationError::NoFlows);
        }

        let mut ids = HashSet::new();
        let mut ports = HashSet::new();
        for flow in &self.flows {
            if !ids.insert(flow.id) {
                return Err(ConfigurationError::DuplicateFlow(flow.id));
            }
            if !ports.insert(flow.port) {
                return Err(ConfigurationError::DuplicatePort(flow.port));
            }
            if flow.algorithm.name().is_empty() {
                return Err(invalid("algorithm", format!("'' of {}", flow.id)));
            }
            if flow.sender == flow.receiver {
                return Err(invalid("receiver", format!("{} of {}", flow.receiver, flow.id)));
            }
            if flow.start_offset >= self.duration {
                return Err(ConfigurationError::OffsetTooLarge {
                    flow: flow.id,
                    offset: flow.start_offset,
                    duration: self.duration,
                });
            }
        }
        if let Some(id) = self.probed_flows.iter().find(|id| !ids.contains(id)) {
            return Err(ConfigurationError::UnknownFlow(*id));
        }

        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    pub fn flow(&self, id: FlowId) -> Option<&FlowSpec> {
        self.flows.iter().find(|f| f.id == id)
    }

    /// All algorithms competing in this experiment, sorted and without duplicates.
    pub fn algorithms(&self) -> Vec<Algorithm> {
        self.flows
            .iter()
            .map(|f| f.algorithm.clone())
            .sorted()
            .dedup()
            .collect()
    }

    /// Names of all sending hosts, in flow order.
    pub fn senders(&self) -> Vec<&str> {
        self.flows.iter().map(|f| f.sender.as_str()).collect()
    }

    /// Names of all receiving hosts, in flow order.
    pub fn receivers(&self) -> Vec<&str> {
        self.flows.iter().map(|f| f.receiver.as_str()).collect()
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn scenario_names() {
        assert_eq!(Scenario::from_str("2reno_vs_1bbr").unwrap(), Scenario::TwoRenoVsOneBbr);
        assert_eq!(Scenario::TimeShifted.to_string(), "time_shifted");
        for scenario in Scenario::iter() {
            assert_eq!(Scenario::from_str(&scenario.to_string()).unwrap(), scenario);
        }
    }

    #[test]
    fn dumbbell_layout() {
        let config = ExperimentConfig::from_scenario(
            LinkParams::default(),
            30,
            Scenario::TwoRenoVsOneBbr,
            true,
        )
        .unwrap();
        assert_eq!(config.flows.len(), 3);
        assert_eq!(config.senders(), vec!["h1", "h2", "h3"]);
        assert_eq!(config.receivers(), vec!["h4", "h5", "h6"]);
        assert_eq!(
            config.flows.iter().map(|f| f.port).collect_vec(),
            vec![5001, 5002, 5003]
        );
        assert_eq!(config.algorithms(), vec![Algorithm::new("bbr"), Algorithm::new("reno")]);
        assert_eq!(config.probed_flows.len(), 3);
        assert_eq!(config.flows[2].name(), "bbr_flow_3");
    }

    #[test]
    fn time_shifted_send_duration() {
        let config =
            ExperimentConfig::from_scenario(LinkParams::default(), 40, Scenario::TimeShifted, false)
                .unwrap();
        assert_eq!(config.flows[0].send_duration(config.duration), 40);
        assert_eq!(config.flows[1].send_duration(config.duration), 30);
        assert!(config.probed_flows.is_empty());
    }

    #[test]
    fn invalid_parameters() {
        let bad_bw = LinkParams {
            bandwidth: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            ExperimentConfig::from_scenario(bad_bw, 30, Scenario::RenoVsBbr, false),
            Err(ConfigurationError::InvalidParameter { .. })
        ));
        let bad_queue = LinkParams {
            max_queue: 0,
            ..Default::default()
        };
        assert!(
            ExperimentConfig::from_scenario(bad_queue, 30, Scenario::RenoVsBbr, false).is_err()
        );
        assert!(
            ExperimentConfig::from_scenario(LinkParams::default(), 0, Scenario::RenoVsBbr, false)
                .is_err()
        );
        assert_eq!(
            ExperimentConfig::from_scenario(LinkParams::default(), 30, Scenario::Custom, false),
            Err(ConfigurationError::NoFlows)
        );
        assert!(matches!(
            ExperimentConfig::from_scenario(LinkParams::default(), 5, Scenario::TimeShifted, false),
            Err(ConfigurationError::OffsetTooLarge { .. })
        ));
    }

    #[test]
    fn duplicate_ports() {
        let mut config =
            ExperimentConfig::from_scenario(LinkParams::default(), 30, Scenario::RenoVsBbr, false)
                .unwrap();
        config.flows[1].port = config.flows[0].port;
        assert_eq!(config.validate(), Err(ConfigurationError::DuplicatePort(5001)));
    }
}
