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
use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use super::{Report, RttSample};

lazy_static! {
    static ref TIMESTAMP: Regex = Regex::new(r"^\[(\d+(?:\.\d+)?)\]").unwrap();
    static ref SEQ: Regex = Regex::new(r"icmp_seq=(\d+)").unwrap();
    static ref RTT: Regex = Regex::new(r"time=(\S+)\s*ms").unwrap();
    static ref TRANSMITTED: Regex = Regex::new(r"^(\d+) packets transmitted").unwrap();
}

/// Parse the output of `ping -D -O` into one sample per probe.
///
/// Probes reported as unanswered (or unreachable) are kept as missing samples. If the answer
/// arrives late, the missing sample is filled in. Without `-D` timestamps, the index of the probe
/// is used as time. Probes that were transmitted (according to the statistics of `ping`) but never
/// reported at all are appended as missing samples at the end.
pub fn parse_probe_report(raw: &str) -> Report<RttSample> {
    let mut report: Report<RttSample> = Report::default();
    let mut by_seq: HashMap<u64, usize> = HashMap::new();
    let mut last = 0.0_f64;
    let mut transmitted = None;

    for line in raw.lines() {
        if let Some(n) = TRANSMITTED
            .captures(line.trim())
            .and_then(|c| c[1].parse::<u64>().ok())
        {
            transmitted = Some(n);
            continue;
        }
        let Some(seq) = SEQ.captures(line).and_then(|c| c[1].parse::<u64>().ok()) else {
            continue;
        };
        let rtt = match RTT.captures(line) {
            Some(c) => match c[1].parse::<f64>() {
                Ok(rtt) if rtt.is_finite() && rtt >= 0.0 => Some(rtt),
                _ => {
                    report.skipped += 1;
                    continue;
                }
            },
            None => None,
        };

        if let Some(&i) = by_seq.get(&seq) {
            // late answer to a probe reported as missing, or a duplicate
            if report.samples[i].rtt.is_none() {
                report.samples[i].rtt = rtt;
            }
            continue;
        }

        let time = TIMESTAMP
            .captures(line)
            .and_then(|c| c[1].parse::<f64>().ok())
            .unwrap_or(report.samples.len() as f64)
            .max(last);
        last = time;
        by_seq.insert(seq, report.samples.len());
        report.samples.push(RttSample { time, seq, rtt });
    }

    for seq in (1..=transmitted.unwrap_or(0)).filter(|seq| !by_seq.contains_key(seq)) {
        report.samples.push(RttSample {
            time: last,
            seq,
            rtt: None,
        });
    }

    report
}
