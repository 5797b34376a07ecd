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
//! Latency probes running alongside the flows.

use std::{
    fs::File,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use crate::{
    config::FlowId,
    error::CaptureError,
    process::{MeasurementHandle, ProcessHandle},
    topology::{Endpoint, HostCommand, Topology},
};

/// Number of probes spaced by `interval` that fit into `duration`. At least one.
pub fn probe_count(duration: Duration, interval: Duration) -> u64 {
    if interval.is_zero() {
        return 1;
    }
    ((duration.as_secs_f64() / interval.as_secs_f64()).floor() as u64).max(1)
}

/// Start a train of `count` ICMP echo probes from `source` to `target`, spaced by `interval`.
/// The output of `ping` is written to `sink`. Unanswered probes are reported by `ping` and kept
/// as missing samples.
pub fn start_probe(
    topology: &dyn Topology,
    source: &Endpoint,
    target: &Endpoint,
    count: u64,
    interval: Duration,
    sink: &Path,
    flow: FlowId,
) -> Result<ProbeHandle, CaptureError> {
    let cmd = HostCommand::new("ping")
        .args(["-D", "-O"])
        .args(["-i", &interval.as_secs_f64().to_string()])
        .args(["-c", &count.to_string()])
        .arg(target.addr);
    let process = topology.execute_background(source, &cmd, Stdio::from(File::create(sink)?))?;
    log::debug!(
        "[probe] {count} probes from {} to {} every {:?}",
        source.name,
        target.name,
        interval
    );
    Ok(ProbeHandle {
        label: format!("probe {} -> {}", source.name, target.name),
        flow,
        source: source.name.clone(),
        target: target.name.clone(),
        output: sink.to_path_buf(),
        process,
    })
}

#[derive(Debug)]
pub struct ProbeHandle {
    label: String,
    flow: FlowId,
    source: String,
    target: String,
    output: PathBuf,
    process: ProcessHandle,
}

impl ProbeHandle {
    /// The flow whose endpoints are probed.
    pub fn flow(&self) -> FlowId {
        self.flow
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

#[async_trait::async_trait]
impl MeasurementHandle for ProbeHandle {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_finished(&mut self) -> bool {
        MeasurementHandle::is_finished(&mut self.process)
    }

    async fn wait(&mut self) -> Result<Option<ExitStatus>, CaptureError> {
        Ok(Some(self.process.wait().await?))
    }

    fn terminate(&mut self) -> Result<(), CaptureError> {
        self.process.terminate()
    }

    async fn kill(&mut self) -> Result<(), CaptureError> {
        self.process.kill().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::{ExperimentConfig, LinkParams, Scenario},
        report::{parse_probe_report, read_report},
        topology::testing::FakeTopology,
    };

    #[test]
    fn count() {
        assert_eq!(probe_count(Duration::from_secs(30), Duration::from_millis(100)), 300);
        assert_eq!(probe_count(Duration::from_secs(1), Duration::from_secs(2)), 1);
        assert_eq!(probe_count(Duration::from_secs(1), Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn probe_output() {
        let config =
            ExperimentConfig::from_scenario(LinkParams::default(), 3, Scenario::RenoVsBbr, true)
                .unwrap();
        let mut topo = FakeTopology::new();
        let endpoints = topo.provision(&config).await.unwrap();
        let dir = std::env::temp_dir().join(format!("cc-compete-probe-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sink = dir.join("ping.txt");

        let mut probe = start_probe(
            &topo,
            endpoints.get("h1").unwrap(),
            endpoints.get("h3").unwrap(),
            3,
            Duration::from_millis(100),
            &sink,
            FlowId(1),
        )
        .unwrap();
        assert_eq!(probe.label(), "probe h1 -> h3");
        assert!(probe.wait().await.unwrap().unwrap().success());
        probe.terminate().unwrap();
        assert!(probe.is_finished());

        let report = read_report(probe.output(), parse_probe_report).unwrap();
        let rtts = report.samples.iter().map(|s| s.rtt).collect::<Vec<_>>();
        assert_eq!(rtts, vec![Some(100.0), None, Some(120.0)]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
