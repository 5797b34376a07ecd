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
use super::{QueueSample, Report};

/// Parse the `time,len` lines written by the queue sampler.
///
/// Lines that cannot be parsed, or that go back in time, are skipped and counted. Empty lines are
/// ignored.
pub fn parse_queue_report(raw: &str) -> Report<QueueSample> {
    let mut report = Report::default();
    let mut last = f64::NEG_INFINITY;

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let parsed = line.split_once(',').and_then(|(time, len)| {
            Some((
                time.trim().parse::<f64>().ok()?,
                len.trim().parse::<u64>().ok()?,
            ))
        });
        match parsed {
            Some((time, len)) if time.is_finite() && time >= last => {
                last = time;
                report.samples.push(QueueSample { time, len });
            }
            _ => report.skipped += 1,
        }
    }

    report
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn skip_malformed() {
        let raw = "1.0,3\n1.1,4\nnot a sample\n1.2,-1\n\n1.05,9\n1.3, 150 \n1.4\n";
        let report = parse_queue_report(raw);
        assert_eq!(
            report.samples,
            vec![
                QueueSample { time: 1.0, len: 3 },
                QueueSample { time: 1.1, len: 4 },
                QueueSample { time: 1.3, len: 150 },
            ]
        );
        assert_eq!(report.skipped, 4);
    }
}
