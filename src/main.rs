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
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::{Duration, Instant},
};

use clap::Parser;

use cc_compete::{
    prelude::*,
    store::{append_run_record, RESULT_FILENAME},
    util,
};
use cc_compete_utils::{other::get_timestamp, serde::RunRecord};

/// Exit code of a run that was interrupted with Ctrl-C.
const EXIT_ABORTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Bandwidth of the bottleneck link in Mbit/s.
    #[arg(short = 'b', long, default_value_t = 10.0)]
    bw_net: f64,
    /// Bandwidth of the host links in Mbit/s.
    #[arg(short = 'B', long, default_value_t = 1000.0)]
    bw_host: f64,
    /// One-way delay of the bottleneck link in ms.
    #[arg(long, default_value_t = 50.0)]
    delay: f64,
    /// Directory in which a new directory is created for this run.
    #[arg(short, long, default_value = "results")]
    dir: String,
    /// Duration of the experiment in seconds.
    #[arg(short, long, default_value_t = 30)]
    time: u64,
    /// Maximum queue size of the bottleneck in packets.
    #[arg(long, default_value_t = 100)]
    maxq: u32,
    /// Competition to run. Ignored if flows are given with `--flow`.
    #[arg(long, default_value = "reno_vs_bbr")]
    scenario: Scenario,
    /// Add a flow as `<algorithm>[@<start offset in seconds>]`. Can be applied multiple times and
    /// selects the custom scenario.
    #[arg(long = "flow", value_parser = util::parse_flow)]
    flows: Vec<(Algorithm, u64)>,
    /// Do not measure the RTT of the flows.
    #[arg(long)]
    no_probes: bool,
    /// Seconds that processes get to exit after the experiment before they are killed.
    #[arg(long, default_value_t = 5.0)]
    drain_grace: f64,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    util::init_logging();
    let args = Args::parse();

    let link = LinkParams {
        bandwidth: args.bw_net,
        host_bandwidth: args.bw_host,
        delay: args.delay,
        max_queue: args.maxq,
    };
    let (scenario, layout) = if args.flows.is_empty() {
        (args.scenario, args.scenario.layout())
    } else {
        (Scenario::Custom, args.flows.clone())
    };
    let config = ExperimentConfig::dumbbell(link, args.time, scenario, layout, !args.no_probes)?;
    if !(args.drain_grace.is_finite() && args.drain_grace >= 0.0) {
        return Err(format!("Invalid drain grace: {}", args.drain_grace).into());
    }

    let timestamp = get_timestamp();
    let root = PathBuf::from(&args.dir);
    let run_name = format!("{scenario}_{timestamp}");
    let run_dir = root.join(&run_name);

    log::info!(
        "Running `{scenario}` with {} flows for {}s on a {} Mbit/s bottleneck",
        config.flows.len(),
        config.duration,
        config.link.bandwidth
    );

    let mut coordinator = Coordinator::new(config, NetnsTopology::new(), &run_dir);
    coordinator.set_options(RunnerOptions {
        drain_grace: Duration::from_secs_f64(args.drain_grace),
        ..Default::default()
    });
    let abort = coordinator.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    let start = Instant::now();
    let result = match coordinator.run().await {
        Ok(result) => result,
        Err(CoordinatorError::NothingMeasured(result)) => {
            println!("{result}");
            record_run(&root, &timestamp, &run_name, start, &result)?;
            return Err(format!("None of the flows could be measured, see {run_dir:?}").into());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{result}");
    record_run(&root, &timestamp, &run_name, start, &result)?;
    log::info!("Results saved to {run_dir:?}");

    if result.diagnostics.aborted {
        log::warn!("The experiment was aborted, results are incomplete");
        return Ok(ExitCode::from(EXIT_ABORTED));
    }
    Ok(ExitCode::SUCCESS)
}

/// Append the run to the index of `root`.
fn record_run(
    root: &Path,
    timestamp: &str,
    run_name: &str,
    start: Instant,
    result: &AnalysisResult,
) -> Result<(), Box<dyn std::error::Error>> {
    append_run_record(
        root,
        &RunRecord {
            execution_timestamp: timestamp.to_string(),
            execution_duration: start.elapsed().as_secs_f64(),
            scenario: result.config.scenario.to_string(),
            run_dir: run_name.to_string(),
            result_filename: RESULT_FILENAME.to_string(),
            num_flows: result.config.flows.len(),
            winner: result.winner.as_ref().map(|w| w.to_string()),
            fairness_index: result.fairness.flows,
        },
    )?;
    Ok(())
}
