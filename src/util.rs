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
//! Utility module collection of functions

use std::path::Path;

use crate::{config::Algorithm, error::ConfigurationError};

/// Logging config that is used if present in the working directory.
pub const LOG_CONFIG: &str = "log4rs.yml";

/// Initialize logging from `log4rs.yml`, or with `pretty_env_logger` (default level `info`,
/// overridable by `RUST_LOG`) if that file does not exist.
pub fn init_logging() {
    if Path::new(LOG_CONFIG).exists() {
        match log4rs::init_file(LOG_CONFIG, Default::default()) {
            Ok(()) => return,
            Err(e) => eprintln!("Cannot load {LOG_CONFIG}: {e}"),
        }
    }
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(log::LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let _ = builder.try_init();
}

/// Parse a flow given on the command line as `<algorithm>[@<start offset in seconds>]`.
pub fn parse_flow(s: &str) -> Result<(Algorithm, u64), ConfigurationError> {
    let invalid = || ConfigurationError::InvalidParameter {
        name: "flow".to_string(),
        value: s.to_string(),
    };
    let (algorithm, offset) = match s.split_once('@') {
        Some((algorithm, offset)) => (algorithm, offset.trim().parse().map_err(|_| invalid())?),
        None => (s, 0),
    };
    let algorithm = algorithm.trim();
    if algorithm.is_empty() || algorithm.contains(char::is_whitespace) {
        return Err(invalid());
    }
    Ok((Algorithm::new(algorithm.to_lowercase()), offset))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flow_argument() {
        assert_eq!(parse_flow("bbr").unwrap(), (Algorithm::new("bbr"), 0));
        assert_eq!(parse_flow("Cubic@10").unwrap(), (Algorithm::new("cubic"), 10));
        assert!(parse_flow("").is_err());
        assert!(parse_flow("@5").is_err());
        assert!(parse_flow("reno@soon").is_err());
        assert!(parse_flow("reno@-1").is_err());
    }
}
