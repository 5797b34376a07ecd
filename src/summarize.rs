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
use std::{fs, path::PathBuf};

use clap::Parser;

use cc_compete::{
    store::{collect_results, comparison_markdown, read_run_index, SUMMARY_FILENAME},
    util,
};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Directory holding the run directories.
    #[arg(short, long, default_value = "results")]
    dir: String,
    /// Write the comparison to this file instead of `<dir>/competition_summary.md`.
    #[arg(short, long)]
    output: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();
    let args = Args::parse();

    let results = collect_results(&args.dir)?;
    if results.is_empty() {
        return Err(format!("No results found in {}", args.dir).into());
    }

    match read_run_index(&args.dir) {
        Ok(index) => {
            for run in index
                .iter()
                .filter(|run| !results.iter().any(|(name, _)| *name == run.run_dir))
            {
                log::warn!("Run {} is indexed but has no readable result", run.run_dir);
            }
        }
        Err(e) => log::debug!("No run index in {}: {e}", args.dir),
    }

    let output = args
        .output
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&args.dir).join(SUMMARY_FILENAME));
    fs::write(&output, comparison_markdown(&results))?;
    log::info!("Compared {} runs in {output:?}", results.len());

    Ok(())
}
