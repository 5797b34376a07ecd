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
//! Comparison of the competing flows.
//!
//! The [`Analyzer`] combines the throughput statistics of every flow with the queue and latency
//! series of a run into a single [`AnalysisResult`].

use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;
use thiserror::Error;

use crate::{
    config::{Algorithm, ExperimentConfig, FlowId},
    error::Diagnostics,
    report::{QueueSample, RttSample, GRAMMAR_VERSION},
};

pub mod fairness;
pub mod metrics;
pub mod result;

pub use fairness::{jain_index, Fairness, FairnessAssessment};
pub use metrics::{FlowMetrics, QueueAssessment, QueueSummary, RttSummary};
pub use result::{AlgorithmSummary, AnalysisResult};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("{0} is not part of the experiment")]
    UnknownFlow(FlowId),
}

/// RTT samples of the probe running alongside one flow.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSeries {
    pub flow: FlowId,
    pub source: String,
    pub target: String,
    pub samples: Vec<RttSample>,
}

/// Computes the [`AnalysisResult`] of an experiment.
#[derive(Debug, Clone)]
pub struct Analyzer<'a> {
    config: &'a ExperimentConfig,
    queue: Vec<QueueSample>,
    probes: Vec<ProbeSeries>,
    diagnostics: Diagnostics,
}

impl<'a> Analyzer<'a> {
    pub fn new(config: &'a ExperimentConfig) -> Self {
        Self {
            config,
            queue: Vec::new(),
            probes: Vec::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Set the queue series of the bottleneck.
    pub fn set_queue(&mut self, queue: Vec<QueueSample>) {
        self.queue = queue;
    }

    /// Set the RTT series of all probes.
    pub fn set_probes(&mut self, probes: Vec<ProbeSeries>) {
        self.probes = probes;
    }

    /// Set the diagnostics to be stored with the result.
    pub fn set_diagnostics(&mut self, diagnostics: Diagnostics) {
        self.diagnostics = diagnostics;
    }

    /// Compare all flows of the experiment.
    ///
    /// Flows of the configuration that are missing in `flow_metrics` are reported with empty
    /// metrics. Flows missing in `flow_to_algorithm` use the algorithm of their configuration.
    pub fn analyze(
        &self,
        flow_metrics: &HashMap<FlowId, FlowMetrics>,
        flow_to_algorithm: &HashMap<FlowId, Algorithm>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let config = self.config;
        if let Some(id) = flow_metrics
            .keys()
            .chain(flow_to_algorithm.keys())
            .chain(self.probes.iter().map(|p| &p.flow))
            .find(|id| config.flow(**id).is_none())
        {
            return Err(AnalysisError::UnknownFlow(*id));
        }

        let algorithm_of = |id: FlowId| -> Algorithm {
            flow_to_algorithm
                .get(&id)
                .cloned()
                .or_else(|| config.flow(id).map(|f| f.algorithm.clone()))
                .unwrap_or_else(|| Algorithm::new("unknown"))
        };

        let per_flow: BTreeMap<FlowId, FlowMetrics> = config
            .flows
            .iter()
            .map(|f| (f.id, flow_metrics.get(&f.id).copied().unwrap_or_default()))
            .collect();

        let mut algorithms: BTreeMap<Algorithm, AlgorithmSummary> = BTreeMap::new();
        for (algo, means) in &per_flow
            .iter()
            .map(|(id, m)| (algorithm_of(*id), m.mean))
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .group_by(|(a, _)| a.clone())
        {
            let means = means.map(|(_, m)| m).collect_vec();
            let total: f64 = means.iter().sum();
            let rtt = RttSummary::pooled(
                self.probes
                    .iter()
                    .filter(|p| algorithm_of(p.flow) == algo)
                    .flat_map(|p| p.samples.iter()),
            );
            algorithms.insert(
                algo,
                AlgorithmSummary {
                    flows: means.len(),
                    total,
                    avg_per_flow: total / means.len() as f64,
                    rtt,
                },
            );
        }

        let (winner, advantage) = fairness::leader(algorithms.iter().map(|(a, s)| (a, s.total)));
        let total_throughput: f64 = algorithms.values().map(|s| s.total).sum();
        let fairness = Fairness::new(
            &per_flow.values().map(|m| m.mean).collect_vec(),
            &algorithms.values().map(|s| s.total).collect_vec(),
        );

        let probes = self
            .probes
            .iter()
            .filter_map(|p| {
                RttSummary::pooled(&p.samples)
                    .map(|s| ((p.source.clone(), p.target.clone()), s))
            })
            .collect();

        let most_stable = algorithms
            .iter()
            .filter_map(|(a, s)| Some((a, s.rtt.as_ref()?.cv?)))
            .min_by(|(_, x), (_, y)| x.total_cmp(y))
            .map(|(a, _)| a.clone());

        Ok(AnalysisResult {
            config: config.clone(),
            grammar_version: GRAMMAR_VERSION,
            per_flow,
            algorithms,
            fairness,
            winner,
            advantage,
            total_throughput,
            efficiency: total_throughput / config.link.bandwidth,
            queue: QueueSummary::new(&self.queue, config.link.max_queue),
            probes,
            most_stable,
            diagnostics: self.diagnostics.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{LinkParams, Scenario};

    fn constant(value: f64, n: usize) -> FlowMetrics {
        FlowMetrics::from_values(&vec![value; n])
    }

    fn config(scenario: Scenario) -> ExperimentConfig {
        ExperimentConfig::from_scenario(LinkParams::default(), 30, scenario, true).unwrap()
    }

    fn algorithms_of(config: &ExperimentConfig) -> HashMap<FlowId, Algorithm> {
        config
            .flows
            .iter()
            .map(|f| (f.id, f.algorithm.clone()))
            .collect()
    }

    #[test]
    fn reno_vs_bbr() {
        let config = config(Scenario::RenoVsBbr);
        let metrics = HashMap::from([(FlowId(1), constant(2.0, 5)), (FlowId(2), constant(8.0, 5))]);
        let mut analyzer = Analyzer::new(&config);
        analyzer.set_queue(
            [60, 60, 60]
                .into_iter()
                .enumerate()
                .map(|(i, len)| QueueSample {
                    time: i as f64,
                    len,
                })
                .collect(),
        );
        let result = analyzer.analyze(&metrics, &algorithms_of(&config)).unwrap();

        let reno = Algorithm::new("reno");
        let bbr = Algorithm::new("bbr");
        assert_eq!(result.per_flow.len(), 2);
        assert_eq!(result.algorithms[&reno].total, 2.0);
        assert_eq!(result.algorithms[&bbr].total, 8.0);
        assert_eq!(result.winner, Some(bbr));
        assert_eq!(result.advantage, Some(300.0));
        assert_eq!(result.fairness.flows, Some(100.0 / 136.0));
        assert_eq!(result.fairness.algorithms, Some(100.0 / 136.0));
        assert_eq!(result.fairness.assessment, Some(FairnessAssessment::Good));
        assert_eq!(result.total_throughput, 10.0);
        assert_eq!(result.efficiency, 1.0);
        assert_eq!(result.queue.unwrap().utilization, 0.6);
        assert!(result.probes.is_empty());
        assert_eq!(result.most_stable, None);
    }

    #[test]
    fn single_flow() {
        let config = ExperimentConfig::dumbbell(
            LinkParams::default(),
            30,
            Scenario::Custom,
            vec![(Algorithm::new("cubic"), 0)],
            false,
        )
        .unwrap();
        let metrics = HashMap::from([(FlowId(1), constant(9.5, 3))]);
        let result = Analyzer::new(&config)
            .analyze(&metrics, &algorithms_of(&config))
            .unwrap();
        assert_eq!(result.fairness.flows, Some(1.0));
        assert_eq!(result.winner, None);
        assert_eq!(result.advantage, None);
        assert_eq!(result.queue, None);
    }

    #[test]
    fn equal_flows_are_fair() {
        let config = config(Scenario::MultipleBbr);
        let metrics = config
            .flows
            .iter()
            .map(|f| (f.id, FlowMetrics::from_values(&[5.0, 5.0, 5.0])))
            .collect();
        let result = Analyzer::new(&config)
            .analyze(&metrics, &algorithms_of(&config))
            .unwrap();
        assert_eq!(result.fairness.flows, Some(1.0));
        assert_eq!(result.fairness.algorithms, Some(1.0));
        assert_eq!(result.algorithms[&Algorithm::new("bbr")].flows, 3);
        assert_eq!(result.algorithms[&Algorithm::new("bbr")].avg_per_flow, 5.0);
    }

    #[test]
    fn missing_flows_are_empty() {
        let config = config(Scenario::TwoRenoVsTwoBbr);
        let metrics = HashMap::from([(FlowId(3), constant(4.0, 2))]);
        let result = Analyzer::new(&config)
            .analyze(&metrics, &HashMap::new())
            .unwrap();
        assert_eq!(result.per_flow.len(), 4);
        assert!(result.per_flow.keys().all(|id| config.flow(*id).is_some()));
        assert_eq!(result.per_flow[&FlowId(1)], FlowMetrics::default());
        assert_eq!(result.measured_flows(), 1);
        assert_eq!(result.winner, Some(Algorithm::new("bbr")));
        assert_eq!(result.advantage, None);

        let nothing = Analyzer::new(&config)
            .analyze(&HashMap::new(), &HashMap::new())
            .unwrap();
        assert!(nothing.nothing_measured());
        assert_eq!(nothing.fairness.flows, None);
        assert_eq!(nothing.winner, None);
    }

    #[test]
    fn unknown_flow() {
        let config = config(Scenario::RenoVsBbr);
        let metrics = HashMap::from([(FlowId(7), constant(1.0, 1))]);
        assert_eq!(
            Analyzer::new(&config).analyze(&metrics, &HashMap::new()),
            Err(AnalysisError::UnknownFlow(FlowId(7)))
        );
    }

    #[test]
    fn rtt_per_algorithm() {
        let config = config(Scenario::TwoRenoVsOneBbr);
        let series = |flow: u32, rtts: &[f64]| ProbeSeries {
            flow: FlowId(flow),
            source: format!("h{flow}"),
            target: format!("h{}", flow + 3),
            samples: rtts
                .iter()
                .enumerate()
                .map(|(i, rtt)| RttSample {
                    time: i as f64,
                    seq: i as u64 + 1,
                    rtt: Some(*rtt),
                })
                .collect(),
        };
        let mut analyzer = Analyzer::new(&config);
        analyzer.set_probes(vec![
            series(1, &[100.0, 100.0]),
            series(2, &[100.0, 100.0]),
            series(3, &[100.0, 300.0]),
        ]);
        let result = analyzer.analyze(&HashMap::new(), &HashMap::new()).unwrap();

        let reno = &result.algorithms[&Algorithm::new("reno")];
        assert_eq!(reno.rtt.unwrap().samples, 4);
        assert_eq!(reno.rtt.unwrap().cv, Some(0.0));
        assert_eq!(result.algorithms[&Algorithm::new("bbr")].rtt.unwrap().cv, Some(0.5));
        assert_eq!(result.most_stable, Some(Algorithm::new("reno")));
        assert_eq!(result.probes.len(), 3);
        assert_eq!(result.probes[&("h3".to_string(), "h6".to_string())].max, 300.0);
    }
}
