//! Module containing some utility functions that didn't fit anywhere else.

use std::{fs, path::Path};

use time::{format_description, OffsetDateTime};

/// Produces a timestamp `String` of the current time in YYYY-MM-DD_HH-mm-SS format.
pub fn get_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format_description::parse("[year]-[month]-[day]_[hour]-[minute]-[second]")
        .ok()
        .and_then(|fmt| now.format(&fmt).ok())
        .unwrap_or_else(|| now.unix_timestamp().to_string())
}

/// Seconds since the unix epoch, with sub-second precision.
pub fn unix_time() -> f64 {
    let now = OffsetDateTime::now_utc();
    now.unix_timestamp() as f64 + now.nanosecond() as f64 * 1e-9
}

/// Open a csv writer on `path`. If the file already holds data, new rows are appended without
/// repeating the header.
pub fn append_csv(path: impl AsRef<Path>) -> std::io::Result<csv::Writer<fs::File>> {
    let path = path.as_ref();
    let has_data = path.exists() && fs::metadata(path)?.len() > 0;
    if has_data {
        log::trace!("appending to {path:?}");
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(csv::WriterBuilder::new()
        .has_headers(!has_data)
        .from_writer(file))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timestamp_format() {
        let ts = get_timestamp();
        // 2024-11-12_18-00-44
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], "_");
    }

    #[test]
    fn append_csv_writes_header_once() {
        #[derive(::serde::Serialize)]
        struct Row {
            a: u32,
        }

        let mut path = std::env::temp_dir();
        path.push(format!("cc_compete_utils_append_{}.csv", std::process::id()));
        let _ = fs::remove_file(&path);

        for a in 0..2 {
            let mut w = append_csv(&path).unwrap();
            w.serialize(Row { a }).unwrap();
            w.flush().unwrap();
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "a\n0\n1\n");
        let _ = fs::remove_file(&path);
    }
}
