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
use lazy_static::lazy_static;
use regex::Regex;

use super::{FlowSample, Report};

lazy_static! {
    /// `<start>-<end> sec ... <value> <unit>/sec`
    static ref INTERVAL: Regex = Regex::new(
        r"(\d+(?:\.\d+)?)\s*-\s*(\d+(?:\.\d+)?)\s+sec\b.*?\s(\d+(?:\.\d+)?)\s+([KMGT]?)(bits|Bytes)/sec"
    )
    .unwrap();
}

/// Parse the periodic interval reports of a traffic generator into a throughput series in
/// Mbits/sec.
///
/// The summary line the generator prints at the end covers the whole transfer. It starts before
/// the end of the last interval and is dropped, such that the series never goes back in time.
pub fn parse_flow_report(raw: &str) -> Report<FlowSample> {
    let mut report = Report::default();
    let mut last_end = f64::NEG_INFINITY;

    for line in raw.lines() {
        let Some(caps) = INTERVAL.captures(line) else {
            continue;
        };
        let (Ok(start), Ok(end), Ok(value)) = (
            caps[1].parse::<f64>(),
            caps[2].parse::<f64>(),
            caps[3].parse::<f64>(),
        ) else {
            report.skipped += 1;
            continue;
        };
        if end < start {
            report.skipped += 1;
            continue;
        }
        if start < last_end {
            log::trace!("dropping summary line `{}`", line.trim());
            continue;
        }
        last_end = end;
        report.samples.push(FlowSample {
            start,
            end,
            mbps: to_mbps(value, &caps[4], &caps[5]),
        });
    }

    report
}

/// Convert a rate with the given SI prefix and unit (`bits` or `Bytes`) to Mbits/sec.
fn to_mbps(value: f64, prefix: &str, unit: &str) -> f64 {
    let bits = if unit == "Bytes" { value * 8.0 } else { value };
    match prefix {
        "" => bits / 1e6,
        "K" => bits / 1e3,
        "G" => bits * 1e3,
        "T" => bits * 1e6,
        _ => bits,
    }
}
