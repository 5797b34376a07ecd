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
//! Library for running competitions between TCP congestion-control algorithms on an emulated
//! bottleneck, and for analyzing who wins.
//!
//! An experiment is described by an [`config::ExperimentConfig`] and executed by the
//! [`coordinator::Coordinator`] on a [`topology::Topology`]. The flows, latency probes and the
//! queue sampler write raw reports, which are parsed by [`report`] and condensed into an
//! [`analysis::AnalysisResult`] that the [`store::ResultStore`] persists.

pub mod analysis;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod flow;
pub mod probe;
pub mod process;
pub mod report;
pub mod sampler;
pub mod store;
pub mod topology;
pub mod util;

pub mod prelude {
    pub use super::{
        analysis::{AnalysisResult, Analyzer},
        config::{Algorithm, ExperimentConfig, FlowId, FlowSpec, LinkParams, Scenario},
        coordinator::{AbortHandle, Coordinator, CoordinatorError, RunnerOptions},
        error::Diagnostics,
        store::ResultStore,
        topology::{netns::NetnsTopology, Topology},
    };
}
