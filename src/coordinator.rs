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
//! Runs a single experiment from provisioning to teardown.
//!
//! The [`Coordinator`] walks through the phases `Idle -> Provisioning -> Running -> Draining ->
//! Analyzed -> TornDown`. Only errors before `Running` abort the experiment. Everything that goes
//! wrong afterwards is recorded in the diagnostics of the result. The topology is torn down
//! exactly once, no matter where the experiment stopped.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use itertools::Itertools;
use thiserror::Error;
use tokio::{
    sync::watch,
    time::{interval, timeout_at, Instant, MissedTickBehavior},
};

use crate::{
    analysis::{AnalysisError, AnalysisResult, Analyzer, FlowMetrics, ProbeSeries},
    config::ExperimentConfig,
    error::{CaptureError, Diagnostics, TeardownWarning, TopologyError},
    flow::{FlowDriver, FlowHandle},
    probe::{probe_count, start_probe, ProbeHandle},
    process::MeasurementHandle,
    report::{parse_flow_report, parse_probe_report, parse_queue_report, read_report},
    sampler::{QueueSampler, SamplerHandle},
    store::{ResultStore, StoreError},
    topology::{Endpoints, HostCommand, Topology},
};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Topology Error: {0}")]
    Topology(#[from] TopologyError),
    #[error("Result Store Error: {0}")]
    Store(#[from] StoreError),
    #[error("Analysis Error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("Aborted before the measurement started")]
    Aborted,
    #[error("None of the flows could be measured")]
    NothingMeasured(Box<AnalysisResult>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Phase {
    Idle,
    Provisioning,
    Running,
    Draining,
    Analyzed,
    #[strum(serialize = "Torn-down")]
    TornDown,
}

/// Timing of the coordinator that is not part of the experiment itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunnerOptions {
    /// Time between starting a receiver and its sender
    pub receiver_grace: Duration,
    /// Interval of the supervision loop
    pub poll_interval: Duration,
    /// Interval of the progress messages
    pub progress_interval: Duration,
    /// Time the senders get beyond the experiment duration before they are stopped
    pub completion_slack: Duration,
    /// Time all processes get to exit after being terminated, before they are killed
    pub drain_grace: Duration,
    /// Interval of the queue sampler
    pub sample_interval: Duration,
    /// Interval between two latency probes
    pub probe_interval: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            receiver_grace: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            progress_interval: Duration::from_secs(2),
            completion_slack: Duration::from_secs(2),
            drain_grace: Duration::from_secs(5),
            sample_interval: Duration::from_millis(100),
            probe_interval: Duration::from_millis(100),
        }
    }
}

/// Aborts a running experiment. The coordinator stops all measurements, analyzes what was
/// captured so far and tears the topology down.
#[derive(Debug, Clone)]
pub struct AbortHandle(Arc<watch::Sender<bool>>);

impl AbortHandle {
    pub fn abort(&self) {
        log::warn!("[coordinator] abort requested");
        self.0.send_replace(true);
    }
}

pub struct Coordinator<T: Topology> {
    config: ExperimentConfig,
    topology: T,
    options: RunnerOptions,
    output_dir: PathBuf,
    phase: Phase,
    torn_down: bool,
    abort: Arc<watch::Sender<bool>>,
}

impl<T: Topology> Coordinator<T> {
    pub fn new(config: ExperimentConfig, topology: T, output_dir: impl Into<PathBuf>) -> Self {
        let (abort, _) = watch::channel(false);
        Self {
            config,
            topology,
            options: RunnerOptions::default(),
            output_dir: output_dir.into(),
            phase: Phase::Idle,
            torn_down: false,
            abort: Arc::new(abort),
        }
    }

    pub fn set_options(&mut self, options: RunnerOptions) {
        self.options = options;
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.abort.clone())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run the experiment and tear the topology down afterwards.
    ///
    /// If none of the flows could be measured, the (persisted) best-effort result is returned
    /// in [`CoordinatorError::NothingMeasured`].
    pub async fn run(mut self) -> Result<AnalysisResult, CoordinatorError> {
        let result = self.execute().await;
        if let Err(e) = &result {
            log::error!("[coordinator] experiment failed in phase {}: {e}", self.phase);
        }
        self.teardown().await;
        result
    }

    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Err(e) = self.topology.teardown().await {
            log::error!("[coordinator] teardown failed: {e}");
        }
        enter(&mut self.phase, Phase::TornDown);
    }

    async fn execute(&mut self) -> Result<AnalysisResult, CoordinatorError> {
        let mut abort = self.abort.subscribe();
        let opts = self.options;

        enter(&mut self.phase, Phase::Provisioning);
        let store = ResultStore::new(&self.output_dir)?;
        let endpoints = self.topology.provision(&self.config).await?;
        check_reachability(&self.topology, &endpoints, &self.config).await?;
        if *abort.borrow_and_update() {
            return Err(CoordinatorError::Aborted);
        }

        enter(&mut self.phase, Phase::Running);
        let config = &self.config;
        let topology: &dyn Topology = &self.topology;
        let mut diagnostics = Diagnostics::default();

        let mut sampler: Option<SamplerHandle> = match topology
            .bottleneck()
            .map_err(CaptureError::from)
            .and_then(|reader| {
                QueueSampler::new(reader, opts.sample_interval).start(&store.queue_path())
            }) {
            Ok(handle) => Some(handle),
            Err(e) => {
                diagnostics.capture_error(format!("queue sampler: {e}"));
                None
            }
        };

        let t0 = Instant::now() + opts.receiver_grace;
        let driver = FlowDriver::new(
            topology,
            &endpoints,
            config,
            store.dir(),
            opts.receiver_grace,
        );
        let mut flows: Vec<FlowHandle> = Vec::new();
        for spec in &config.flows {
            match driver.start_flow(spec, t0).await {
                Ok(flow) => flows.push(flow),
                Err(e) => diagnostics.flow_failed(spec.id, e),
            }
        }

        let count = probe_count(config.duration(), opts.probe_interval);
        let mut probes: Vec<ProbeHandle> = Vec::new();
        let probed = config
            .probed_flows
            .iter()
            .filter_map(|id| config.flow(*id))
            .filter(|spec| !diagnostics.has_failed(spec.id))
            .collect_vec();
        for spec in probed {
            let sink = store.dir().join(format!("{}_ping.txt", spec.name()));
            let started = endpoints
                .get(&spec.sender)
                .and_then(|src| Ok((src, endpoints.get(&spec.receiver)?)))
                .map_err(CaptureError::from)
                .and_then(|(src, dst)| {
                    start_probe(topology, src, dst, count, opts.probe_interval, &sink, spec.id)
                });
            match started {
                Ok(probe) => probes.push(probe),
                Err(e) => diagnostics.capture_error(format!("probe of {}: {e}", spec.id)),
            }
        }

        // supervise
        let deadline = t0 + config.duration() + opts.completion_slack;
        let mut ticker = interval(opts.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_progress = Instant::now();
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = abort.changed() => {
                    if changed.is_err() || *abort.borrow_and_update() {
                        log::warn!("[coordinator] aborting the measurement");
                        diagnostics.aborted = true;
                        break;
                    }
                }
            }
            let now = Instant::now();
            for flow in flows.iter_mut() {
                if let Err(e) = flow.launch_due(topology, now) {
                    diagnostics.flow_failed(flow.spec().id, e);
                }
            }
            if now >= deadline {
                log::info!("[coordinator] experiment duration elapsed");
                break;
            }
            if flows.iter_mut().all(|f| f.is_finished()) {
                log::info!("[coordinator] all senders completed");
                break;
            }
            if now.duration_since(last_progress) >= opts.progress_interval {
                log::info!(
                    "Experiment running... {:.0} s / {} s",
                    now.saturating_duration_since(t0).as_secs_f64(),
                    config.duration
                );
                last_progress = now;
            }
        }

        enter(&mut self.phase, Phase::Draining);
        {
            let mut handles: Vec<&mut dyn MeasurementHandle> = Vec::new();
            if let Some(s) = sampler.as_mut() {
                handles.push(s);
            }
            handles.extend(flows.iter_mut().map(|f| f as &mut dyn MeasurementHandle));
            handles.extend(probes.iter_mut().map(|p| p as &mut dyn MeasurementHandle));
            drain(handles, opts.drain_grace, &mut diagnostics).await;
        }
        if let Some(summary) = sampler.as_ref().and_then(|s| s.summary()) {
            log::debug!("[coordinator] {} queue samples", summary.samples);
            diagnostics.sampler_gaps = summary.gaps;
        }

        enter(&mut self.phase, Phase::Analyzed);
        let mut flow_metrics = HashMap::new();
        for flow in flows.iter().filter(|f| f.has_started()) {
            let spec = flow.spec();
            let report = match read_report(flow.output(), parse_flow_report) {
                Ok(report) => report,
                Err(e) => {
                    diagnostics
                        .flow_failed(spec.id, format!("cannot read {:?}: {e}", flow.output()));
                    continue;
                }
            };
            diagnostics.parse_warning(spec.name(), report.skipped);
            if report.samples.is_empty() {
                diagnostics.flow_failed(spec.id, "no throughput was reported");
            }
            if let Err(e) = store.write_throughput_series(spec, &report.samples) {
                diagnostics.capture_error(e);
            }
            flow_metrics.insert(spec.id, FlowMetrics::from_samples(&report.samples));
        }
        let flow_to_algorithm = config
            .flows
            .iter()
            .map(|f| (f.id, f.algorithm.clone()))
            .collect();

        let queue = if sampler.is_some() {
            match read_report(store.queue_path(), parse_queue_report) {
                Ok(report) => {
                    diagnostics.parse_warning("queue", report.skipped);
                    report.samples
                }
                Err(e) => {
                    diagnostics.capture_error(format!("cannot read the queue series: {e}"));
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut series = Vec::new();
        for probe in &probes {
            let name = config
                .flow(probe.flow())
                .map(|f| f.name())
                .unwrap_or_else(|| format!("{}_{}", probe.source(), probe.target()));
            match read_report(probe.output(), parse_probe_report) {
                Ok(report) => {
                    diagnostics.parse_warning(format!("{name} probe"), report.skipped);
                    if let Err(e) = store.write_rtt_series(&name, &report.samples) {
                        diagnostics.capture_error(e);
                    }
                    series.push(ProbeSeries {
                        flow: probe.flow(),
                        source: probe.source().to_string(),
                        target: probe.target().to_string(),
                        samples: report.samples,
                    });
                }
                Err(e) => {
                    diagnostics.capture_error(format!("cannot read {:?}: {e}", probe.output()))
                }
            }
        }

        let mut analyzer = Analyzer::new(config);
        analyzer.set_queue(queue);
        analyzer.set_probes(series);
        analyzer.set_diagnostics(diagnostics);
        let result = analyzer.analyze(&flow_metrics, &flow_to_algorithm)?;
        store.write(&result)?;

        if result.nothing_measured() {
            return Err(CoordinatorError::NothingMeasured(Box::new(result)));
        }
        log::info!(
            "[coordinator] measured {} of {} flows",
            result.measured_flows(),
            config.flows.len()
        );
        Ok(result)
    }
}

fn enter(phase: &mut Phase, next: Phase) {
    log::debug!("[coordinator] {phase} -> {next}");
    *phase = next;
}

/// Check that every receiver is reachable from every sender.
async fn check_reachability(
    topology: &dyn Topology,
    endpoints: &Endpoints,
    config: &ExperimentConfig,
) -> Result<(), TopologyError> {
    let senders = config.senders().into_iter().unique().collect_vec();
    let receivers = config.receivers().into_iter().unique().collect_vec();
    for from in &senders {
        let src = endpoints.get(from)?;
        for to in &receivers {
            let dst = endpoints.get(to)?;
            let ping = HostCommand::new("ping")
                .args(["-c", "1", "-W", "1"])
                .arg(dst.addr);
            if !topology.execute(src, &ping).await?.success {
                return Err(TopologyError::Unreachable {
                    from: src.name.clone(),
                    to: dst.name.clone(),
                });
            }
        }
    }
    log::debug!(
        "[coordinator] {} receivers reachable from {} senders",
        receivers.len(),
        senders.len()
    );
    Ok(())
}

/// Terminate all handles and wait for them with a shared grace period. Handles that are still
/// running afterwards are killed.
async fn drain(
    mut handles: Vec<&mut dyn MeasurementHandle>,
    grace: Duration,
    diagnostics: &mut Diagnostics,
) {
    let finished_early = handles.iter_mut().map(|h| h.is_finished()).collect_vec();
    for h in handles.iter_mut() {
        if let Err(e) = h.terminate() {
            diagnostics.capture_error(format!("cannot terminate {}: {e}", h.label()));
        }
    }

    let deadline = Instant::now() + grace;
    for (h, early) in handles.into_iter().zip(finished_early) {
        let waited = timeout_at(deadline, h.wait()).await;
        match waited {
            Ok(Ok(Some(status))) if early && !status.success() => {
                diagnostics.capture_error(CaptureError::Exited {
                    label: h.label().to_string(),
                    status: status.to_string(),
                });
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => diagnostics.capture_error(format!("{}: {e}", h.label())),
            Err(_) => {
                if let Err(e) = h.kill().await {
                    log::error!("[coordinator] cannot kill {}: {e}", h.label());
                }
                diagnostics.teardown_warning(TeardownWarning::new(h.label(), grace));
            }
        }
    }
}
