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
//! Persistence of the results.
//!
//! Every run writes into its own directory: the [`AnalysisResult`] as `competition_results.json`
//! next to the series files. Runs are additionally indexed in `runs.csv` in the root directory,
//! from which [`comparison_markdown`] builds a report over many runs.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use cc_compete_utils::{other::append_csv, serde::RunRecord};
use itertools::Itertools;
use thiserror::Error;

use crate::{
    analysis::AnalysisResult,
    config::FlowSpec,
    report::{FlowSample, RttSample},
};

pub const RESULT_FILENAME: &str = "competition_results.json";
pub const QUEUE_FILENAME: &str = "queue.csv";
pub const RUN_INDEX_FILENAME: &str = "runs.csv";
pub const SUMMARY_FILENAME: &str = "competition_summary.md";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// The output directory of a single run.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Open the store, creating the directory if necessary.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn result_path(&self) -> PathBuf {
        self.dir.join(RESULT_FILENAME)
    }

    pub fn queue_path(&self) -> PathBuf {
        self.dir.join(QUEUE_FILENAME)
    }

    /// Persist the result. The file is replaced atomically, such that readers never see a
    /// partially written record.
    pub fn write(&self, result: &AnalysisResult) -> Result<PathBuf, StoreError> {
        let path = self.result_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(result)?)?;
        fs::rename(&tmp, &path)?;
        log::debug!("[store] result written to {path:?}");
        Ok(path)
    }

    pub fn read(&self) -> Result<AnalysisResult, StoreError> {
        read_result(self.result_path())
    }

    /// Write the throughput series of a flow to `<flow>_throughput.csv`.
    pub fn write_throughput_series(
        &self,
        flow: &FlowSpec,
        samples: &[FlowSample],
    ) -> Result<PathBuf, StoreError> {
        let path = self.dir.join(format!("{}_throughput.csv", flow.name()));
        let mut csv = csv::Writer::from_path(&path)?;
        for s in samples {
            csv.serialize(s)?;
        }
        csv.flush()?;
        Ok(path)
    }

    /// Write the RTT series of a probe to `<name>_rtt.csv`.
    pub fn write_rtt_series(
        &self,
        name: &str,
        samples: &[RttSample],
    ) -> Result<PathBuf, StoreError> {
        let path = self.dir.join(format!("{name}_rtt.csv"));
        let mut csv = csv::Writer::from_path(&path)?;
        for s in samples {
            csv.serialize(s)?;
        }
        csv.flush()?;
        Ok(path)
    }
}

pub fn read_result(path: impl AsRef<Path>) -> Result<AnalysisResult, StoreError> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Append a run to the index in `root`.
pub fn append_run_record(root: impl AsRef<Path>, record: &RunRecord) -> Result<(), StoreError> {
    let mut csv = append_csv(root.as_ref().join(RUN_INDEX_FILENAME))?;
    csv.serialize(record)?;
    csv.flush()?;
    Ok(())
}

pub fn read_run_index(root: impl AsRef<Path>) -> Result<Vec<RunRecord>, StoreError> {
    let mut csv = csv::Reader::from_path(root.as_ref().join(RUN_INDEX_FILENAME))?;
    Ok(csv.deserialize().collect::<Result<Vec<RunRecord>, _>>()?)
}

/// Read the results of all runs below `root`, ordered by the name of their directory. Results
/// that cannot be read are skipped with a warning.
pub fn collect_results(
    root: impl AsRef<Path>,
) -> Result<Vec<(String, AnalysisResult)>, StoreError> {
    let pattern = root.as_ref().join("*").join(RESULT_FILENAME);
    let mut results = Vec::new();
    for path in glob::glob(&pattern.to_string_lossy())?.filter_map(|p| p.ok()) {
        let run = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match read_result(&path) {
            Ok(result) => results.push((run, result)),
            Err(e) => log::warn!("[store] skipping {path:?}: {e}"),
        }
    }
    results.sort_by(|(a, _), (b, _)| human_sort::compare(a, b));
    Ok(results)
}

/// Markdown report comparing the given runs.
pub fn comparison_markdown(results: &[(String, AnalysisResult)]) -> String {
    let opt = |x: Option<f64>, prec: usize| match x {
        Some(x) => format!("{x:.prec$}"),
        None => "-".to_string(),
    };

    let mut md = String::new();
    let _ = writeln!(md, "# TCP Competition Analysis Report\n");
    let _ = writeln!(
        md,
        "| Run | Scenario | Flows | Winner | Advantage | Total [Mbit/s] | Fairness (flows) | Fairness (algorithms) | Queue |"
    );
    let _ = writeln!(md, "|---|---|---|---|---|---|---|---|---|");
    for (run, r) in results {
        let _ = writeln!(
            md,
            "| {run} | {} | {} | {} | {} | {:.2} | {} | {} | {} |",
            r.config.scenario,
            r.config.flows.len(),
            r.winner.as_ref().map(|w| w.to_string()).unwrap_or_else(|| "-".to_string()),
            r.advantage.map(|a| format!("{a:.1}%")).unwrap_or_else(|| "-".to_string()),
            r.total_throughput,
            opt(r.fairness.flows, 3),
            opt(r.fairness.algorithms, 3),
            opt(r.queue.map(|q| q.utilization * 100.0), 1),
        );
    }

    for (run, r) in results {
        let _ = writeln!(md, "\n## {run}\n");
        for (algo, s) in &r.algorithms {
            let _ = writeln!(
                md,
                "- **{algo}:** {} flow(s), {:.2} Mbit/s total, {:.2} Mbit/s per flow",
                s.flows, s.total, s.avg_per_flow
            );
        }
        let _ = writeln!(
            md,
            "- **Total throughput:** {:.2} Mbit/s ({:.1}% of {} Mbit/s)",
            r.total_throughput,
            r.efficiency * 100.0,
            r.config.link.bandwidth
        );
        if let Some(a) = r.fairness.assessment {
            let _ = writeln!(md, "- **Fairness:** {a}");
        }
        let failed = r.diagnostics.flow_failures.iter().map(|f| f.flow.to_string()).join(", ");
        if !failed.is_empty() {
            let _ = writeln!(md, "- **Failed flows:** {failed}");
        }
    }
    md
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        analysis::{Analyzer, FlowMetrics},
        config::{ExperimentConfig, FlowId, LinkParams, Scenario},
    };

    fn temp_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("cc-compete-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        root
    }

    fn result(scenario: Scenario, means: &[f64]) -> AnalysisResult {
        let config =
            ExperimentConfig::from_scenario(LinkParams::default(), 30, scenario, false).unwrap();
        let metrics: HashMap<FlowId, FlowMetrics> = config
            .flows
            .iter()
            .zip(means)
            .map(|(f, m)| (f.id, FlowMetrics::from_values(&[*m])))
            .collect();
        Analyzer::new(&config).analyze(&metrics, &HashMap::new()).unwrap()
    }

    #[test]
    fn result_survives_the_store() {
        let root = temp_root("store-result");
        let store = ResultStore::new(root.join("run")).unwrap();
        let mut written = result(Scenario::RenoVsBbr, &[2.0, 8.0]);
        written.probes.insert(
            ("h1".to_string(), "h3".to_string()),
            crate::analysis::RttSummary::pooled(&[
                RttSample {
                    time: 0.0,
                    seq: 1,
                    rtt: Some(100.0),
                },
                RttSample {
                    time: 0.1,
                    seq: 2,
                    rtt: Some(120.0),
                },
            ])
            .unwrap(),
        );
        // needs the exact float parser to come back unchanged
        written.efficiency = 0.09090909090909093;
        store.write(&written).unwrap();
        assert!(!store.result_path().with_extension("json.tmp").exists());
        assert_eq!(store.read().unwrap(), written);

        let path = store
            .write_throughput_series(
                &written.config.flows[0],
                &[FlowSample {
                    start: 0.0,
                    end: 1.0,
                    mbps: 2.5,
                }],
            )
            .unwrap();
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "start,end,mbps\n0.0,1.0,2.5\n"
        );
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn run_index_and_comparison() {
        let root = temp_root("store-index");
        for (i, (scenario, means)) in [
            (Scenario::RenoVsBbr, vec![2.0, 8.0]),
            (Scenario::MultipleReno, vec![3.0, 3.0, 3.0]),
        ]
        .into_iter()
        .enumerate()
        {
            let run_dir = format!("run_{}", 10 - i * 8);
            let result = result(scenario, &means);
            ResultStore::new(root.join(&run_dir))
                .unwrap()
                .write(&result)
                .unwrap();
            append_run_record(
                &root,
                &RunRecord {
                    execution_timestamp: "2024-11-12_18-00-44".to_string(),
                    execution_duration: 31.5,
                    scenario: scenario.to_string(),
                    run_dir,
                    result_filename: RESULT_FILENAME.to_string(),
                    num_flows: means.len(),
                    winner: result.winner.map(|w| w.to_string()),
                    fairness_index: result.fairness.flows,
                },
            )
            .unwrap();
        }

        let index = read_run_index(&root).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].winner.as_deref(), Some("bbr"));
        assert_eq!(index[1].winner, None);

        let results = collect_results(&root).unwrap();
        assert_eq!(
            results.iter().map(|(r, _)| r.as_str()).collect_vec(),
            vec!["run_2", "run_10"]
        );
        let md = comparison_markdown(&results);
        assert!(md.contains("| run_10 | reno_vs_bbr | 2 | bbr | 300.0% | 10.00 | 0.735 |"));
        assert!(md.contains("| run_2 | multiple_reno | 3 | - | - | 9.00 | 1.000 |"));
        assert!(md.contains("- **reno:** 3 flow(s), 9.00 Mbit/s total, 3.00 Mbit/s per flow"));

        fs::remove_dir_all(&root).unwrap();
    }
}
