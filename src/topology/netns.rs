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
//! Dumbbell topology built from Linux network namespaces.
//!
//! Every host lives in its own namespace and is connected by a veth pair to one of two switch
//! namespaces (`s1` for senders, `s2` for receivers), each of which bridges its ports. The two
//! switches are connected by the bottleneck link, which is shaped with `tc` on both ends. The
//! sender side carries the rate limit and the queue whose backlog is sampled.
//!
//! Requires root (or `CAP_NET_ADMIN`), `iproute2` and the programs run on the hosts.

use std::{process::Stdio, sync::Arc};

use ipnet::Ipv4Net;
use lazy_static::lazy_static;
use regex::Regex;
use tokio::process::Command;

use super::{CommandOutput, Endpoint, Endpoints, HostCommand, Topology};
use crate::{
    config::ExperimentConfig,
    error::{CaptureError, TopologyError},
    process::ProcessHandle,
    sampler::BacklogReader,
};

/// Prefix of all namespaces created by this topology.
pub const NS_PREFIX: &str = "ccc-";
const SUBNET: &str = "10.0.0.0/24";
const SENDER_SWITCH: &str = "s1";
const RECEIVER_SWITCH: &str = "s2";
const BOTTLENECK_IFACE: &str = "s1-eth0";
const BOTTLENECK_PEER: &str = "s2-eth0";

lazy_static! {
    static ref BACKLOG: Regex = Regex::new(r"backlog\s[^\s]+\s(\d+)p").unwrap();
}

#[derive(Debug, Default)]
pub struct NetnsTopology {
    /// Namespaces that currently exist and must be deleted on teardown.
    namespaces: Vec<String>,
}

impl NetnsTopology {
    pub fn new() -> Self {
        Self::default()
    }

    fn ns(name: &str) -> String {
        format!("{NS_PREFIX}{name}")
    }

    async fn add_namespace(&mut self, name: &str) -> Result<(), TopologyError> {
        let ns = Self::ns(name);
        // leftovers of an earlier run that was not torn down
        let _ = Command::new("ip").args(["netns", "del", &ns]).output().await;
        ip(&["netns", "add", &ns]).await?;
        self.namespaces.push(ns.clone());
        ip(&["-n", &ns, "link", "set", "lo", "up"]).await
    }

    async fn add_switch(&mut self, name: &str) -> Result<(), TopologyError> {
        self.add_namespace(name).await?;
        let ns = Self::ns(name);
        ip(&["-n", &ns, "link", "add", "br0", "type", "bridge"]).await?;
        ip(&["-n", &ns, "link", "set", "br0", "up"]).await
    }

    /// Connect `iface_a` in namespace `a` with `iface_b` in namespace `b`.
    async fn add_link(
        &self,
        a: &str,
        iface_a: &str,
        b: &str,
        iface_b: &str,
    ) -> Result<(), TopologyError> {
        let (ns_a, ns_b) = (Self::ns(a), Self::ns(b));
        ip(&[
            "link", "add", iface_a, "netns", &ns_a, "type", "veth", "peer", "name", iface_b,
            "netns", &ns_b,
        ])
        .await?;
        ip(&["-n", &ns_a, "link", "set", iface_a, "up"]).await?;
        ip(&["-n", &ns_b, "link", "set", iface_b, "up"]).await
    }

    async fn attach(&self, switch: &str, iface: &str) -> Result<(), TopologyError> {
        ip(&["-n", &Self::ns(switch), "link", "set", iface, "master", "br0"]).await
    }

    async fn add_host(
        &mut self,
        name: &str,
        switch: &str,
        addr: Ipv4Net,
        host_bandwidth: f64,
    ) -> Result<Endpoint, TopologyError> {
        self.add_namespace(name).await?;
        let iface = format!("{name}-eth0");
        let port = format!("{switch}-{name}");
        self.add_link(name, &iface, switch, &port).await?;
        self.attach(switch, &port).await?;
        let ns = Self::ns(name);
        ip(&["-n", &ns, "addr", "add", &addr.to_string(), "dev", &iface]).await?;
        tc(
            &ns,
            &[
                "qdisc", "add", "dev", &iface, "root", "tbf", "rate",
                &format!("{host_bandwidth}mbit"), "burst", "64kb", "latency", "100ms",
            ],
        )
        .await?;
        log::debug!("[netns] added {name} ({addr}) at {switch}");
        Ok(Endpoint {
            name: name.to_string(),
            addr: addr.addr(),
        })
    }

    async fn add_bottleneck(&self, config: &ExperimentConfig) -> Result<(), TopologyError> {
        self.add_link(SENDER_SWITCH, BOTTLENECK_IFACE, RECEIVER_SWITCH, BOTTLENECK_PEER)
            .await?;
        self.attach(SENDER_SWITCH, BOTTLENECK_IFACE).await?;
        self.attach(RECEIVER_SWITCH, BOTTLENECK_PEER).await?;

        let link = &config.link;
        let s1 = Self::ns(SENDER_SWITCH);
        let s2 = Self::ns(RECEIVER_SWITCH);
        let delay = format!("{}ms", link.delay);
        let limit = link.max_queue.to_string();
        // rate limit with a child netem holding the queue of `max_queue` packets
        tc(
            &s1,
            &[
                "qdisc", "add", "dev", BOTTLENECK_IFACE, "root", "handle", "1:", "tbf", "rate",
                &format!("{}mbit", link.bandwidth), "burst", "15k", "latency", "1000ms",
            ],
        )
        .await?;
        tc(
            &s1,
            &[
                "qdisc", "add", "dev", BOTTLENECK_IFACE, "parent", "1:1", "handle", "10:",
                "netem", "delay", &delay, "limit", &limit,
            ],
        )
        .await?;
        tc(
            &s2,
            &[
                "qdisc", "add", "dev", BOTTLENECK_PEER, "root", "netem", "delay", &delay,
                "limit", &limit,
            ],
        )
        .await?;
        log::debug!(
            "[netns] bottleneck {BOTTLENECK_IFACE}: {} Mbit/s, {delay}, {limit} packets",
            link.bandwidth
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl Topology for NetnsTopology {
    async fn provision(&mut self, config: &ExperimentConfig) -> Result<Endpoints, TopologyError> {
        if !self.namespaces.is_empty() {
            return Err(TopologyError::Provision(
                "the topology is already provisioned".to_string(),
            ));
        }
        let subnet: Ipv4Net = SUBNET
            .parse()
            .map_err(|e| TopologyError::Provision(format!("{e}")))?;
        let mut addrs = subnet
            .hosts()
            .map(|a| Ipv4Net::new(a, subnet.prefix_len()));

        self.add_switch(SENDER_SWITCH).await?;
        self.add_switch(RECEIVER_SWITCH).await?;
        self.add_bottleneck(config).await?;

        let hosts = config
            .senders()
            .into_iter()
            .map(|h| (h, SENDER_SWITCH))
            .chain(config.receivers().into_iter().map(|h| (h, RECEIVER_SWITCH)));
        let mut endpoints = Endpoints::default();
        for (name, switch) in hosts {
            if endpoints.get(name).is_ok() {
                continue;
            }
            let addr = addrs
                .next()
                .ok_or_else(|| TopologyError::Provision(format!("{SUBNET} is exhausted")))?
                .map_err(|e| TopologyError::Provision(e.to_string()))?;
            endpoints.insert(
                self.add_host(name, switch, addr, config.link.host_bandwidth)
                    .await?,
            );
        }
        log::info!(
            "[netns] provisioned {} hosts behind a {} Mbit/s bottleneck",
            endpoints.len(),
            config.link.bandwidth
        );
        Ok(endpoints)
    }

    async fn execute(
        &self,
        host: &Endpoint,
        cmd: &HostCommand,
    ) -> Result<CommandOutput, TopologyError> {
        let output = Command::new("ip")
            .args(["netns", "exec", &Self::ns(&host.name), cmd.program()])
            .args(cmd.get_args())
            .output()
            .await?;
        Ok(output.into())
    }

    fn execute_background(
        &self,
        host: &Endpoint,
        cmd: &HostCommand,
        stdout: Stdio,
    ) -> Result<ProcessHandle, TopologyError> {
        let child = Command::new("ip")
            .args(["netns", "exec", &Self::ns(&host.name), cmd.program()])
            .args(cmd.get_args())
            .stdout(stdout)
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(ProcessHandle::new(
            format!("{} on {}", cmd.program(), host.name),
            child,
        ))
    }

    fn bottleneck(&self) -> Result<Arc<dyn BacklogReader>, TopologyError> {
        let ns = Self::ns(SENDER_SWITCH);
        if !self.namespaces.contains(&ns) {
            return Err(TopologyError::NotProvisioned);
        }
        Ok(Arc::new(TcBacklogReader {
            namespace: ns,
            iface: BOTTLENECK_IFACE.to_string(),
        }))
    }

    async fn teardown(&mut self) -> Result<(), TopologyError> {
        let mut result = Ok(());
        for ns in std::mem::take(&mut self.namespaces).into_iter().rev() {
            if let Err(e) = ip(&["netns", "del", &ns]).await {
                log::warn!("[netns] could not delete {ns}: {e}");
                result = Err(e);
            }
        }
        result
    }
}

impl NetnsTopology {
    /// Delete the remaining namespaces without a runtime. Returns how many deletions were
    /// attempted.
    fn release_blocking(&mut self) -> usize {
        let remaining = std::mem::take(&mut self.namespaces);
        for ns in remaining.iter().rev() {
            match std::process::Command::new("ip")
                .args(["netns", "del", ns])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
            {
                Ok(status) if status.success() => log::debug!("[netns] released {ns}"),
                Ok(status) => log::warn!("[netns] could not delete {ns}: {status}"),
                Err(e) => log::warn!("[netns] could not delete {ns}: {e}"),
            }
        }
        remaining.len()
    }
}

/// Namespaces that were not torn down (the run was cancelled or panicked) are deleted here.
impl Drop for NetnsTopology {
    fn drop(&mut self) {
        if !self.namespaces.is_empty() {
            log::warn!(
                "[netns] {} namespaces left without teardown",
                self.namespaces.len()
            );
            self.release_blocking();
        }
    }
}

/// Reads the backlog of a qdisc with `tc -s qdisc show`.
#[derive(Debug, Clone)]
pub struct TcBacklogReader {
    namespace: String,
    iface: String,
}

#[async_trait::async_trait]
impl BacklogReader for TcBacklogReader {
    async fn read_backlog(&self) -> Result<u64, CaptureError> {
        let output = Command::new("tc")
            .args(["-n", &self.namespace, "-s", "qdisc", "show", "dev", &self.iface])
            .output()
            .await?;
        let backlog_err = |reason: String| CaptureError::Backlog {
            iface: self.iface.clone(),
            reason,
        };
        if !output.status.success() {
            return Err(backlog_err(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        parse_backlog(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| backlog_err("no backlog in the qdisc statistics".to_string()))
    }

    fn iface(&self) -> &str {
        &self.iface
    }
}

/// Extract the backlog in packets of the first (root) qdisc from `tc -s qdisc show`.
pub fn parse_backlog(stats: &str) -> Option<u64> {
    BACKLOG
        .captures(stats)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

async fn ip(args: &[&str]) -> Result<(), TopologyError> {
    run("ip", args).await
}

async fn tc(namespace: &str, args: &[&str]) -> Result<(), TopologyError> {
    let mut full = vec!["-n", namespace];
    full.extend_from_slice(args);
    run("tc", &full).await
}

async fn run(program: &str, args: &[&str]) -> Result<(), TopologyError> {
    let output = Command::new(program).args(args).output().await?;
    if output.status.success() {
        log::trace!("[netns] {program} {}", args.join(" "));
        Ok(())
    } else {
        Err(TopologyError::Command {
            cmd: format!("{program} {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backlog_of_root_qdisc() {
        let stats = "qdisc tbf 1: root refcnt 2 rate 10Mbit burst 15Kb lat 1.0s \n \
                     Sent 3581052 bytes 2421 pkt (dropped 12, overlimits 1040 requeues 0) \n \
                     backlog 90850b 61p requeues 0\n\
                     qdisc netem 10: parent 1:1 limit 100 delay 50ms\n \
                     Sent 3581052 bytes 2421 pkt (dropped 0, overlimits 0 requeues 0) \n \
                     backlog 89336b 60p requeues 0\n";
        assert_eq!(parse_backlog(stats), Some(61));
        assert_eq!(parse_backlog(" backlog 0b 0p requeues 0"), Some(0));
        assert_eq!(parse_backlog("qdisc noqueue 0: root refcnt 2"), None);
    }

    #[test]
    fn not_provisioned() {
        let topo = NetnsTopology::new();
        assert!(matches!(topo.bottleneck(), Err(TopologyError::NotProvisioned)));
    }

    #[tokio::test]
    async fn teardown_without_provision() {
        let mut topo = NetnsTopology::new();
        topo.teardown().await.unwrap();
        topo.teardown().await.unwrap();
    }

    #[test]
    fn leftover_namespaces_are_released() {
        let mut topo = NetnsTopology::new();
        assert_eq!(topo.release_blocking(), 0);

        topo.namespaces
            .push(NetnsTopology::ns(&format!("none-{}", std::process::id())));
        assert_eq!(topo.release_blocking(), 1);
        assert!(topo.namespaces.is_empty());
        // nothing left for drop
        assert_eq!(topo.release_blocking(), 0);
    }
}
