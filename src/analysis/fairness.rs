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
//! Jain's fairness index and the winner of a competition.

use std::cmp::Ordering;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::config::Algorithm;

/// Jain's fairness index `(Σx)² / (N·Σx²)` of the given throughputs.
///
/// The index lies in `[1/N, 1]` and is exactly 1 if all values are equal. It is undefined (`None`)
/// if there are no values or all of them are zero.
pub fn jain_index(throughputs: &[f64]) -> Option<f64> {
    if throughputs.is_empty() {
        return None;
    }
    let sum: f64 = throughputs.iter().sum();
    let sum_sq: f64 = throughputs.iter().map(|x| x * x).sum();
    if sum_sq <= 0.0 || !sum_sq.is_finite() {
        return None;
    }
    Some((sum * sum / (throughputs.len() as f64 * sum_sq)).min(1.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
pub enum FairnessAssessment {
    Excellent,
    Good,
    Moderate,
    Poor,
}

impl FairnessAssessment {
    pub fn of(index: f64) -> Self {
        if index >= 0.9 {
            Self::Excellent
        } else if index >= 0.7 {
            Self::Good
        } else if index >= 0.5 {
            Self::Moderate
        } else {
            Self::Poor
        }
    }
}

/// Fairness of a competition, computed among the individual flows and among the per-algorithm
/// totals.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Fairness {
    /// Index over the mean throughput of every flow
    pub flows: Option<f64>,
    /// Index over the total throughput of every algorithm
    pub algorithms: Option<f64>,
    /// Assessment of the index over all flows
    pub assessment: Option<FairnessAssessment>,
}

impl Fairness {
    pub fn new(flow_means: &[f64], algorithm_totals: &[f64]) -> Self {
        let flows = jain_index(flow_means);
        Self {
            flows,
            algorithms: jain_index(algorithm_totals),
            assessment: flows.map(FairnessAssessment::of),
        }
    }
}

/// Determine the leading algorithm and its advantage over the runner-up in percent.
///
/// - With fewer than two algorithms, there is no winner and no advantage.
/// - On a tie, there is no winner and the advantage is 0%.
/// - The advantage is undefined if the total of either algorithm is zero.
pub fn leader<'a>(
    totals: impl IntoIterator<Item = (&'a Algorithm, f64)>,
) -> (Option<Algorithm>, Option<f64>) {
    let ranked = totals
        .into_iter()
        .sorted_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(Ordering::Equal))
        .collect_vec();
    let [(first, a), (_, b), ..] = ranked.as_slice() else {
        return (None, None);
    };
    let advantage = (*a > 0.0 && *b > 0.0).then(|| (a - b).abs() / a.min(*b) * 100.0);
    if a == b {
        (None, advantage)
    } else {
        (Some((*first).clone()), advantage)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equal_shares() {
        assert_eq!(jain_index(&[5.0, 5.0]), Some(1.0));
        assert!((jain_index(&[3.3, 3.3, 3.3, 3.3]).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(jain_index(&[7.0]), Some(1.0));
    }

    #[test]
    fn unequal_shares() {
        assert_eq!(jain_index(&[8.0, 2.0]), Some(100.0 / 136.0));
        let starved = jain_index(&[10.0, 0.0, 0.0, 0.0]).unwrap();
        assert!((starved - 0.25).abs() < 1e-12);
        for xs in [[1.0, 2.0, 3.0], [0.1, 9.0, 0.0], [4.0, 4.0, 4.1]] {
            let j = jain_index(&xs).unwrap();
            assert!(j >= 1.0 / 3.0 && j <= 1.0);
        }
    }

    #[test]
    fn undefined_index() {
        assert_eq!(jain_index(&[]), None);
        assert_eq!(jain_index(&[0.0, 0.0]), None);
        assert_eq!(Fairness::new(&[0.0], &[0.0]).assessment, None);
    }

    #[test]
    fn assessment() {
        assert_eq!(FairnessAssessment::of(0.95), FairnessAssessment::Excellent);
        assert_eq!(FairnessAssessment::of(100.0 / 136.0), FairnessAssessment::Good);
        assert_eq!(FairnessAssessment::of(0.5), FairnessAssessment::Moderate);
        assert_eq!(FairnessAssessment::of(0.3), FairnessAssessment::Poor);
    }

    #[test]
    fn winner_and_advantage() {
        let reno = Algorithm::new("reno");
        let bbr = Algorithm::new("bbr");
        let cubic = Algorithm::new("cubic");

        assert_eq!(
            leader([(&reno, 2.0), (&bbr, 8.0)]),
            (Some(bbr.clone()), Some(300.0))
        );
        assert_eq!(leader([(&reno, 2.0)]), (None, None));
        assert_eq!(leader([(&reno, 4.0), (&bbr, 4.0)]), (None, Some(0.0)));
        assert_eq!(leader([(&reno, 0.0), (&bbr, 5.0)]), (Some(bbr.clone()), None));
        assert_eq!(
            leader([(&reno, 1.0), (&bbr, 6.0), (&cubic, 3.0)]),
            (Some(bbr), Some(100.0))
        );
    }
}
