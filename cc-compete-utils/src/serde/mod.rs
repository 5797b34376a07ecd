//! Serde helpers and records shared between the experiment runner and the reporting tools.

use serde::{Deserialize, Serialize};

pub mod generic_hashmap;

/// Struct used to (de-)serialize one line of the run index (`runs.csv`) that is appended after
/// every experiment.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunRecord {
    /// Human-readable formatted timestamp when the run was started
    pub execution_timestamp: String,
    /// Overall duration of this run, including provisioning and teardown
    pub execution_duration: f64,
    /// Name of the scenario that was executed
    pub scenario: String,
    /// Directory (relative to the index) holding all outputs of the run
    pub run_dir: String,
    /// Filename of the saved result record
    pub result_filename: String,
    /// Number of competing flows
    pub num_flows: usize,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub fairness_index: Option<f64>,
}
