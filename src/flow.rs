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
//! Traffic generators of the competing flows.
//!
//! Every flow consists of a receiver (`iperf -s`) on the receiving host and a sender (`iperf -c`)
//! on the sending host, whose congestion control is set before anything is started. The sender is
//! only launched once the receiver had time to bind its port, and not before the start offset of
//! the flow has passed. Launching is driven by the coordinator through [`FlowHandle::launch_due`].

use std::{
    fs::File,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::time::Instant;

use crate::{
    config::{Algorithm, ExperimentConfig, FlowSpec},
    error::{CaptureError, ConfigurationError},
    process::{MeasurementHandle, ProcessHandle},
    topology::{Endpoint, Endpoints, HostCommand, Topology},
};

const CC_SYSCTL: &str = "net.ipv4.tcp_congestion_control";
const AVAILABLE_CC_SYSCTL: &str = "net.ipv4.tcp_available_congestion_control";

/// Starts the flows of an experiment.
pub struct FlowDriver<'a> {
    topology: &'a dyn Topology,
    endpoints: &'a Endpoints,
    duration: u64,
    output_dir: PathBuf,
    receiver_grace: Duration,
}

impl<'a> FlowDriver<'a> {
    pub fn new(
        topology: &'a dyn Topology,
        endpoints: &'a Endpoints,
        config: &ExperimentConfig,
        output_dir: impl Into<PathBuf>,
        receiver_grace: Duration,
    ) -> Self {
        Self {
            topology,
            endpoints,
            duration: config.duration,
            output_dir: output_dir.into(),
            receiver_grace,
        }
    }

    /// File receiving the interval reports of the sender of `spec`.
    pub fn output_path(&self, spec: &FlowSpec) -> PathBuf {
        self.output_dir.join(format!("{}_output.txt", spec.name()))
    }

    /// Select the congestion control of `host`.
    pub async fn set_congestion_control(
        &self,
        host: &Endpoint,
        algorithm: &Algorithm,
    ) -> Result<(), CaptureError> {
        let set = HostCommand::new("sysctl")
            .arg("-w")
            .arg(format!("{CC_SYSCTL}={algorithm}"));
        if self.topology.execute(host, &set).await?.success {
            log::debug!("[{}] congestion control set to {algorithm}", host.name);
            return Ok(());
        }

        let query = HostCommand::new("sysctl").arg("-n").arg(AVAILABLE_CC_SYSCTL);
        let available = self.topology.execute(host, &query).await?.stdout;
        Err(ConfigurationError::UnsupportedAlgorithm {
            host: host.name.clone(),
            algorithm: algorithm.to_string(),
            available: available.trim().to_string(),
        }
        .into())
    }

    /// Set the congestion control of the sender and start the receiver of a flow. The sender is
    /// scheduled for `max(now + receiver grace, start + start offset)`.
    pub async fn start_flow(
        &self,
        spec: &FlowSpec,
        start: Instant,
    ) -> Result<FlowHandle, CaptureError> {
        let sender = self.endpoints.get(&spec.sender)?.clone();
        let receiver = self.endpoints.get(&spec.receiver)?.clone();

        self.set_congestion_control(&sender, &spec.algorithm).await?;

        let server_log = File::create(
            self.output_dir
                .join(format!("{}_receiver.txt", spec.name())),
        )?;
        let server = HostCommand::new("iperf")
            .arg("-s")
            .args(["-p", &spec.port.to_string()])
            .args(["-i", "1"]);
        let receiver_proc = self
            .topology
            .execute_background(&receiver, &server, Stdio::from(server_log))?;

        let not_before = (Instant::now() + self.receiver_grace)
            .max(start + Duration::from_secs(spec.start_offset));
        log::debug!(
            "[{}] receiver listening on {}:{}, sender starts in {:.1}s",
            spec.id,
            receiver.name,
            spec.port,
            not_before.saturating_duration_since(Instant::now()).as_secs_f64()
        );

        Ok(FlowHandle {
            label: format!("{} ({})", spec.id, spec.algorithm),
            spec: spec.clone(),
            sender_host: sender,
            receiver_addr: receiver,
            send_duration: spec.send_duration(self.duration),
            output: self.output_path(spec),
            receiver: receiver_proc,
            sender: SenderState::Pending { not_before },
        })
    }
}

#[derive(Debug)]
enum SenderState {
    /// Waiting for the receiver grace period and the start offset
    Pending { not_before: Instant },
    Running(ProcessHandle),
    /// Terminated before it was launched, or the launch failed
    Cancelled,
}

/// Handle on a started flow.
#[derive(Debug)]
pub struct FlowHandle {
    label: String,
    spec: FlowSpec,
    sender_host: Endpoint,
    receiver_addr: Endpoint,
    send_duration: u64,
    output: PathBuf,
    receiver: ProcessHandle,
    sender: SenderState,
}

impl FlowHandle {
    pub fn spec(&self) -> &FlowSpec {
        &self.spec
    }

    /// File receiving the interval reports of the sender.
    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.sender, SenderState::Pending { .. })
    }

    pub fn has_started(&self) -> bool {
        matches!(self.sender, SenderState::Running(_))
    }

    /// Launch the sender if it is due at `now`. Returns whether it was launched.
    pub fn launch_due(
        &mut self,
        topology: &dyn Topology,
        now: Instant,
    ) -> Result<bool, CaptureError> {
        match self.sender {
            SenderState::Pending { not_before } if not_before <= now => {}
            _ => return Ok(false),
        }

        let client = HostCommand::new("iperf")
            .args(["-c", &self.receiver_addr.addr.to_string()])
            .args(["-p", &self.spec.port.to_string()])
            .args(["-t", &self.send_duration.to_string()])
            .args(["-i", "1"]);
        let launched = File::create(&self.output)
            .map_err(CaptureError::from)
            .and_then(|out| {
                Ok(topology.execute_background(&self.sender_host, &client, Stdio::from(out))?)
            });
        match launched {
            Ok(proc) => {
                log::info!(
                    "[{}] {} started sending for {}s",
                    self.spec.id,
                    self.spec.algorithm,
                    self.send_duration
                );
                self.sender = SenderState::Running(proc);
                Ok(true)
            }
            Err(e) => {
                self.sender = SenderState::Cancelled;
                Err(e)
            }
        }
    }

    /// Number of termination signals sent to the sender and receiver.
    pub fn signals_sent(&self) -> usize {
        let sender = match &self.sender {
            SenderState::Running(p) => p.signals_sent(),
            _ => 0,
        };
        sender + self.receiver.signals_sent()
    }
}

#[async_trait::async_trait]
impl MeasurementHandle for FlowHandle {
    fn label(&self) -> &str {
        &self.label
    }

    /// Whether the sender is done. The receiver runs until it is terminated.
    fn is_finished(&mut self) -> bool {
        match &mut self.sender {
            SenderState::Pending { .. } => false,
            SenderState::Running(p) => MeasurementHandle::is_finished(p),
            SenderState::Cancelled => true,
        }
    }

    /// Wait for the sender to exit. After `terminate`, the receiver is reaped as well.
    async fn wait(&mut self) -> Result<Option<ExitStatus>, CaptureError> {
        let status = match &mut self.sender {
            SenderState::Running(p) => Some(p.wait().await?),
            _ => None,
        };
        if self.receiver.signals_sent() > 0 {
            self.receiver.wait().await?;
        }
        Ok(status)
    }

    fn terminate(&mut self) -> Result<(), CaptureError> {
        if self.is_pending() {
            log::debug!("[{}] cancelled before the sender started", self.spec.id);
            self.sender = SenderState::Cancelled;
        }
        let sender = match &mut self.sender {
            SenderState::Running(p) => p.terminate(),
            _ => Ok(()),
        };
        let receiver = self.receiver.terminate();
        sender.and(receiver)
    }

    async fn kill(&mut self) -> Result<(), CaptureError> {
        if let SenderState::Running(p) = &mut self.sender {
            p.kill().await?;
        }
        self.receiver.kill().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::{LinkParams, Scenario},
        report::{parse_flow_report, read_report},
        topology::testing::{FakeTopology, AVAILABLE},
    };

    fn out_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cc-compete-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn setup(
        layout: Vec<(Algorithm, u64)>,
    ) -> (FakeTopology, Endpoints, ExperimentConfig) {
        let config =
            ExperimentConfig::dumbbell(LinkParams::default(), 3, Scenario::Custom, layout, false)
                .unwrap();
        let mut topo = FakeTopology::new();
        let endpoints = topo.provision(&config).await.unwrap();
        (topo, endpoints, config)
    }

    #[tokio::test]
    async fn flow_lifecycle() {
        let (topo, endpoints, config) = setup(vec![(Algorithm::new("reno"), 0)]).await;
        let dir = out_dir("flow-lifecycle");
        let driver = FlowDriver::new(&topo, &endpoints, &config, &dir, Duration::from_millis(20));

        let mut flow = driver.start_flow(&config.flows[0], Instant::now()).await.unwrap();
        assert!(flow.is_pending());
        assert!(!flow.is_finished());
        assert!(!flow.launch_due(&topo, Instant::now()).unwrap());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(flow.launch_due(&topo, Instant::now()).unwrap());
        assert!(flow.has_started());
        assert!(!flow.launch_due(&topo, Instant::now()).unwrap());

        let status = flow.wait().await.unwrap().unwrap();
        assert!(status.success());
        assert!(flow.is_finished());

        // terminating after completion only stops the receiver, and only once
        flow.terminate().unwrap();
        flow.terminate().unwrap();
        assert_eq!(flow.signals_sent(), 1);
        flow.wait().await.unwrap();
        flow.terminate().unwrap();
        assert_eq!(flow.signals_sent(), 1);

        let report = read_report(flow.output(), parse_flow_report).unwrap();
        assert_eq!(report.samples.len(), 3);
        assert!(report.samples.iter().all(|s| s.mbps == 2.0));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn unsupported_algorithm() {
        let (topo, endpoints, config) = setup(vec![(Algorithm::new("vegas"), 0)]).await;
        let dir = out_dir("flow-unsupported");
        let driver = FlowDriver::new(&topo, &endpoints, &config, &dir, Duration::ZERO);

        match driver.start_flow(&config.flows[0], Instant::now()).await {
            Err(CaptureError::Configuration(ConfigurationError::UnsupportedAlgorithm {
                host,
                algorithm,
                available,
            })) => {
                assert_eq!(host, "h1");
                assert_eq!(algorithm, "vegas");
                assert_eq!(available, AVAILABLE);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn cancel_pending_sender() {
        let (topo, endpoints, config) = setup(vec![(Algorithm::new("bbr"), 2)]).await;
        let dir = out_dir("flow-cancel");
        let driver = FlowDriver::new(&topo, &endpoints, &config, &dir, Duration::ZERO);

        let mut flow = driver.start_flow(&config.flows[0], Instant::now()).await.unwrap();
        assert!(!flow.launch_due(&topo, Instant::now()).unwrap());

        flow.terminate().unwrap();
        assert!(flow.is_finished());
        assert!(!flow.launch_due(&topo, Instant::now() + Duration::from_secs(5)).unwrap());
        assert!(!flow.has_started());
        assert_eq!(flow.wait().await.unwrap(), None);
        assert!(!flow.output().exists());
        assert_eq!(flow.signals_sent(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
