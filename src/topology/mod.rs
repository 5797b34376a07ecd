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
//! The emulated network the experiment runs on.
//!
//! The [`Topology`] trait is everything the coordinator needs from the emulator: provision the
//! hosts of a configuration, run commands on them, read the backlog of the bottleneck and tear
//! everything down again. [`netns::NetnsTopology`] implements it with Linux network namespaces.

use std::{collections::HashMap, fmt, net::Ipv4Addr, process::Stdio, sync::Arc};

use crate::{
    config::ExperimentConfig, error::TopologyError, process::ProcessHandle,
    sampler::BacklogReader,
};

pub mod netns;

/// A command to run on one of the emulated hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    program: String,
    args: Vec<String>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.args.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Whether the argument list contains `arg`.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// An emulated host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub addr: Ipv4Addr,
}

/// All hosts created by [`Topology::provision`], by name.
#[derive(Debug, Clone, Default)]
pub struct Endpoints(HashMap<String, Endpoint>);

impl Endpoints {
    pub fn insert(&mut self, endpoint: Endpoint) {
        self.0.insert(endpoint.name.clone(), endpoint);
    }

    pub fn get(&self, name: &str) -> Result<&Endpoint, TopologyError> {
        self.0
            .get(name)
            .ok_or_else(|| TopologyError::UnknownHost(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Endpoint> for Endpoints {
    fn from_iter<T: IntoIterator<Item = Endpoint>>(iter: T) -> Self {
        let mut endpoints = Self::default();
        iter.into_iter().for_each(|e| endpoints.insert(e));
        endpoints
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

#[async_trait::async_trait]
pub trait Topology: Send + Sync {
    /// Create all hosts, links and the shaped bottleneck of `config`.
    async fn provision(&mut self, config: &ExperimentConfig) -> Result<Endpoints, TopologyError>;

    /// Run `cmd` on `host` and wait for it to complete.
    async fn execute(
        &self,
        host: &Endpoint,
        cmd: &HostCommand,
    ) -> Result<CommandOutput, TopologyError>;

    /// Spawn `cmd` on `host` without waiting for it, writing its standard output to `stdout`.
    fn execute_background(
        &self,
        host: &Endpoint,
        cmd: &HostCommand,
        stdout: Stdio,
    ) -> Result<ProcessHandle, TopologyError>;

    /// Reader for the backlog of the bottleneck queue.
    fn bottleneck(&self) -> Result<Arc<dyn BacklogReader>, TopologyError>;

    /// Release every resource created by `provision`. Calling it again has no effect.
    async fn teardown(&mut self) -> Result<(), TopologyError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! A topology that runs canned local processes instead of touching the network.

    use std::{
        collections::HashMap,
        net::Ipv4Addr,
        process::Stdio,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };

    use tokio::process::Command;

    use super::*;
    use crate::error::CaptureError;

    pub const AVAILABLE: &str = "reno cubic bbr";

    #[derive(Debug, Default)]
    pub struct FakeTopology {
        pub teardowns: Arc<AtomicUsize>,
        pub provisions: Arc<AtomicUsize>,
        /// Fail the reachability check
        pub unreachable: bool,
        /// Fail `provision` itself
        pub fail_provision: bool,
        /// Throughput reported by the sender of each algorithm in Mbits/sec
        pub rates: HashMap<String, f64>,
        algorithms: Mutex<HashMap<String, String>>,
    }

    impl FakeTopology {
        pub fn new() -> Self {
            Self {
                rates: HashMap::from([("reno".to_string(), 2.0), ("bbr".to_string(), 8.0)]),
                ..Default::default()
            }
        }

        /// A topology whose `provision` fails.
        pub fn failing_provision() -> Self {
            Self {
                fail_provision: true,
                ..Self::new()
            }
        }

        /// A topology on which no host can reach another.
        pub fn unreachable_hosts() -> Self {
            Self {
                unreachable: true,
                ..Self::new()
            }
        }

        pub fn teardown_count(&self) -> Arc<AtomicUsize> {
            self.teardowns.clone()
        }

        fn algorithm_of(&self, host: &str) -> Option<String> {
            self.algorithms.lock().unwrap().get(host).cloned()
        }

        fn sender_report(&self, host: &str, secs: u64) -> Vec<String> {
            let rate = self
                .algorithm_of(host)
                .and_then(|a| self.rates.get(&a).copied())
                .unwrap_or(1.0);
            let mut lines = vec![
                "------------------------------------------------------------".to_string(),
                "Client connecting to 10.0.0.7, TCP port 5001".to_string(),
            ];
            for i in 0..secs {
                lines.push(format!(
                    "[  3] {i:>4}.0-{:>4}.0 sec  1.00 MBytes  {rate:.2} Mbits/sec",
                    i + 1
                ));
            }
            lines.push(format!(
                "[  3]    0.0-{secs:>4}.0 sec  9.00 MBytes  {rate:.2} Mbits/sec"
            ));
            lines
        }
    }

    #[async_trait::async_trait]
    impl Topology for FakeTopology {
        async fn provision(
            &mut self,
            config: &ExperimentConfig,
        ) -> Result<Endpoints, TopologyError> {
            self.provisions.fetch_add(1, Ordering::SeqCst);
            if self.fail_provision {
                return Err(TopologyError::Provision("refused by the test".to_string()));
            }
            Ok(config
                .senders()
                .into_iter()
                .chain(config.receivers())
                .enumerate()
                .map(|(i, name)| Endpoint {
                    name: name.to_string(),
                    addr: Ipv4Addr::new(10, 0, 0, i as u8 + 1),
                })
                .collect())
        }

        async fn execute(
            &self,
            host: &Endpoint,
            cmd: &HostCommand,
        ) -> Result<CommandOutput, TopologyError> {
            let ok = |stdout: &str| CommandOutput {
                success: true,
                stdout: stdout.to_string(),
                stderr: String::new(),
            };
            let fail = |stderr: &str| CommandOutput {
                success: false,
                stdout: String::new(),
                stderr: stderr.to_string(),
            };
            match cmd.program() {
                "ping" if self.unreachable => Ok(fail("100% packet loss")),
                "ping" => Ok(ok("1 packets transmitted, 1 received")),
                "sysctl" if cmd.has_arg("-n") => Ok(ok(&format!("{AVAILABLE}\n"))),
                "sysctl" => {
                    let algo = cmd
                        .get_args()
                        .iter()
                        .find_map(|a| a.strip_prefix("net.ipv4.tcp_congestion_control="))
                        .unwrap_or_default();
                    if AVAILABLE.split_whitespace().any(|a| a == algo) {
                        self.algorithms
                            .lock()
                            .unwrap()
                            .insert(host.name.clone(), algo.to_string());
                        Ok(ok(""))
                    } else {
                        Ok(fail("Invalid argument"))
                    }
                }
                _ => Ok(ok("")),
            }
        }

        fn execute_background(
            &self,
            host: &Endpoint,
            cmd: &HostCommand,
            stdout: Stdio,
        ) -> Result<ProcessHandle, TopologyError> {
            let mut command = match cmd.program() {
                "iperf" if cmd.has_arg("-s") => {
                    let mut c = Command::new("sleep");
                    c.arg("30");
                    c
                }
                "iperf" => {
                    let secs = cmd
                        .get_args()
                        .iter()
                        .skip_while(|a| *a != "-t")
                        .nth(1)
                        .and_then(|t| t.parse().ok())
                        .unwrap_or(1);
                    let mut c = Command::new("printf");
                    c.arg("%s\n").args(self.sender_report(&host.name, secs));
                    c
                }
                "ping" => {
                    let mut c = Command::new("printf");
                    c.arg("%s\n").args([
                        "PING 10.0.0.4 (10.0.0.4) 56(84) bytes of data.",
                        "[1700000000.100000] 64 bytes from 10.0.0.4: icmp_seq=1 ttl=64 time=100.0 ms",
                        "[1700000000.200000] no answer yet for icmp_seq=2",
                        "[1700000000.300000] 64 bytes from 10.0.0.4: icmp_seq=3 ttl=64 time=120.0 ms",
                    ]);
                    c
                }
                other => Command::new(other),
            };
            let child = command
                .stdout(stdout)
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()?;
            Ok(ProcessHandle::new(format!("{} on {}", cmd.program(), host.name), child))
        }

        fn bottleneck(&self) -> Result<Arc<dyn BacklogReader>, TopologyError> {
            Ok(Arc::new(FixedBacklog(60)))
        }

        async fn teardown(&mut self) -> Result<(), TopologyError> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// A bottleneck whose backlog never changes.
    #[derive(Debug)]
    pub struct FixedBacklog(pub u64);

    #[async_trait::async_trait]
    impl BacklogReader for FixedBacklog {
        async fn read_backlog(&self) -> Result<u64, CaptureError> {
            Ok(self.0)
        }

        fn iface(&self) -> &str {
            "s1-eth1"
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_display() {
        let cmd = HostCommand::new("iperf")
            .arg("-c")
            .arg(Ipv4Addr::new(10, 0, 0, 4))
            .args(["-p", "5001"]);
        assert_eq!(cmd.to_string(), "iperf -c 10.0.0.4 -p 5001");
        assert!(cmd.has_arg("-c"));
        assert!(!cmd.has_arg("-s"));
    }

    #[test]
    fn unknown_host() {
        let endpoints: Endpoints = [Endpoint {
            name: "h1".to_string(),
            addr: Ipv4Addr::new(10, 0, 0, 1),
        }]
        .into_iter()
        .collect();
        assert_eq!(endpoints.len(), 1);
        assert!(endpoints.get("h1").is_ok());
        assert!(matches!(
            endpoints.get("h9"),
            Err(TopologyError::UnknownHost(h)) if h == "h9"
        ));
    }
}
